//! MGF1 mask generation (RFC 8017 appendix B.2.1)
//!
//! Repeatedly hashes `seed || counter` (counter is a 4-byte big-endian
//! integer starting at 0) and concatenates the digests until the requested
//! mask length is produced, truncating the final digest. Each round is a
//! single-task digest on the shared hashing engine; the engine lease is taken
//! per round, so rounds of the same invocation never starve each other.

use crate::engine::SharedEngine;
use crate::hash::{HashAlgorithm, HashOp, HashTask, ShaAccelerator, MAX_DIGEST_SIZE};
use crate::Error;

/// Fill `mask` with the MGF1 expansion of `seed`
///
/// `seed` must be empty or exactly one digest long (`Config` otherwise);
/// PSS only ever feeds it the embedded hash `H`.
pub fn mgf1<A>(
    engine: &SharedEngine<A>,
    algo: HashAlgorithm,
    seed: &[u8],
    mask: &mut [u8],
) -> Result<(), Error>
where
    A: ShaAccelerator,
{
    if !seed.is_empty() && seed.len() != algo.digest_size() {
        return Err(Error::Config);
    }

    let digest_size = algo.digest_size();
    let mut round = [0u8; MAX_DIGEST_SIZE + 4];
    let round_len = seed.len() + 4;

    round[..seed.len()].copy_from_slice(seed);

    let mut counter: u32 = 0;
    let mut filled = 0;

    while filled < mask.len() {
        round[seed.len()..round_len].copy_from_slice(&counter.to_be_bytes());

        let mut op = HashOp::begin(engine, algo, round_len as u64)?;
        op.insert(&HashTask::Buffer(&round[..round_len]))?;
        let digest = op.finish()?;

        let take = (mask.len() - filled).min(digest_size);
        mask[filled..filled + take].copy_from_slice(&digest.as_bytes()[..take]);

        filled += take;
        counter += 1;
    }

    Ok(())
}
