//! EMSA-PSS verification (RFC 8017 §9.1.2)
//!
//! Decodes the message recovered from a signature and checks it against the
//! expected image digest. Malformed encodings reject as [`Error::Format`];
//! a well-formed encoding whose recomputed hash differs rejects as
//! [`Error::SignatureMismatch`] — the distinction is diagnostic only, both
//! are fatal to admission and there is no retry path.

use alloc::vec;

use log::debug;

use crate::engine::SharedEngine;
use crate::hash::{Digest, HashAlgorithm, HashOp, HashTask, ShaAccelerator};
use crate::mgf::mgf1;
use crate::Error;

/// Fixed final byte of a valid PSS encoding
const TRAILER: u8 = 0xBC;

/// Verify a PSS-encoded message against the expected digest
///
/// # Arguments
/// * `engine` - Shared hashing engine, used for MGF1 and the final hash
/// * `algo` - Hash algorithm of the PSS parameter set
/// * `em` - Encoded message recovered by decryption, key-size bytes
/// * `mhash` - Digest of the signed plaintext
/// * `key_bits` - Bit length of the RSA modulus
/// * `salt_len` - Expected salt length in bytes
pub fn verify<A>(
    engine: &SharedEngine<A>,
    algo: HashAlgorithm,
    em: &[u8],
    mhash: &Digest,
    key_bits: u32,
    salt_len: usize,
) -> Result<(), Error>
where
    A: ShaAccelerator,
{
    let hash_len = algo.digest_size();

    if mhash.algorithm() != algo {
        return Err(Error::Config);
    }

    if key_bits == 0 || em.len() != (key_bits as usize + 7) / 8 {
        return Err(Error::Config);
    }

    // Bits used by the encoding in its first byte; the bits above that
    // boundary must be clear before anything is hashed
    let ms_bits = ((key_bits - 1) % 8) as u32;
    let top_mask = (0xFFu16 << ms_bits) as u8;

    if em[0] & top_mask != 0 {
        return Err(Error::Format);
    }

    // A boundary on a byte edge leaves the whole first byte unused
    let em = if ms_bits == 0 { &em[1..] } else { em };
    let em_len = em.len();

    if em_len < hash_len + 2 {
        return Err(Error::Format);
    }

    if salt_len > em_len - hash_len - 2 {
        return Err(Error::Format);
    }

    if em[em_len - 1] != TRAILER {
        return Err(Error::Format);
    }

    let db_len = em_len - hash_len - 1;
    let (masked_db, rest) = em.split_at(db_len);
    let h = &rest[..hash_len];

    // DB = maskedDB XOR MGF1(H)
    let mut db = vec![0u8; db_len];
    mgf1(engine, algo, h, &mut db)?;

    for (byte, masked) in db.iter_mut().zip(masked_db) {
        *byte ^= *masked;
    }

    if ms_bits != 0 {
        db[0] &= !top_mask;
    }

    // DB must be 0x00.. || 0x01 || salt, with exactly salt_len salt bytes
    let pad_len = db_len - salt_len - 1;

    if db[..pad_len].iter().any(|byte| *byte != 0) {
        return Err(Error::Format);
    }

    if db[pad_len] != 0x01 {
        return Err(Error::Format);
    }

    let salt = &db[pad_len + 1..];

    // H' = Hash(0x00 x 8 || mHash || salt)
    let total = 8 + hash_len + salt_len;
    let mut m_prime = vec![0u8; total];
    m_prime[8..8 + hash_len].copy_from_slice(mhash.as_bytes());
    m_prime[8 + hash_len..].copy_from_slice(salt);

    let mut op = HashOp::begin(engine, algo, total as u64)?;
    op.insert(&HashTask::Buffer(&m_prime))?;
    let h_prime = op.finish()?;

    if h_prime.as_bytes() != h {
        debug!("PSS hash comparison failed");
        return Err(Error::SignatureMismatch);
    }

    Ok(())
}
