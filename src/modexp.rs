//! Public-key signature decryption over the shared asymmetric engine
//!
//! Recovers the PSS-encoded message from a signature by computing
//! `signature^e mod n` over a fixed-size operand equal to the key size. Two
//! interchangeable backends implement [`ModExpAccelerator`]: [`SoftModExp`]
//! computes with `num-bigint`, while [`BankModExp`] drives the bank-addressed
//! hardware engine through a [`PkaBus`] — operands loaded in the engine's
//! little-endian word order, computation triggered, status polled within a
//! bounded window, and the result explicitly reversed back to the canonical
//! big-endian form PSS works in.

use alloc::vec;
use alloc::vec::Vec;

use log::debug;

use num_bigint::{traits::ModInverse, BigUint, ToBigUint};
use num_traits::cast::ToPrimitive;
use num_traits::Zero;

use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;

use zeroize::Zeroize;

use crate::engine::{Accelerator, SharedEngine, POLL_LIMIT};
use crate::{EngineStatus, Error};

/// RSA-3072 key size in bytes; the only operand width the engine accepts
pub const RSA3072_BYTES: usize = 384;

const RSA3072_WORDS: usize = RSA3072_BYTES / 4;

/// Status word the engine reports on successful completion
const STATUS_OK: u32 = 0;

/// RSA public key components, fixed per build/configuration
///
/// The modulus is held in the canonical big-endian representation; backends
/// that need another order convert at their own boundary.
#[derive(Clone)]
pub struct KeyMaterial {
    modulus: [u8; RSA3072_BYTES],
    exponent: u32,
    montgomery: Option<MontgomeryFactors>,
}

/// Precomputed Montgomery operands for the hardware engine
///
/// `rr` is `R^2 mod n` for `R = 2^3072`; `n0` is `-n^-1 mod 2^32`.
#[derive(Clone)]
pub struct MontgomeryFactors {
    pub rr: [u8; RSA3072_BYTES],
    pub n0: u32,
}

impl KeyMaterial {
    /// Key material without the Montgomery precomputation
    ///
    /// Sufficient for the software backend; the bank-addressed engine
    /// requires the precomputed factors.
    pub fn new(modulus: [u8; RSA3072_BYTES], exponent: u32) -> Self {
        Self {
            modulus,
            exponent,
            montgomery: None,
        }
    }

    pub fn with_montgomery(mut self, factors: MontgomeryFactors) -> Self {
        self.montgomery = Some(factors);
        self
    }

    /// Build key material, including the Montgomery factors, from a standard
    /// RSA public key
    ///
    /// # Arguments
    /// * `pub_key` - RSA-3072 public key; anything else is a `Config` error
    pub fn derive(pub_key: &RsaPublicKey) -> Result<Self, Error> {
        let exponent = pub_key.e().to_u32().ok_or(Error::Config)?;
        let n = pub_key.n();

        let bytes = n.to_bytes_be();
        if bytes.len() != RSA3072_BYTES {
            return Err(Error::Config);
        }

        let mut modulus = [0u8; RSA3072_BYTES];
        modulus.copy_from_slice(&bytes);

        // n0 = -n^-1 mod 2^32
        let r32 = 1usize.to_biguint().ok_or(Error::Config)? << 32;
        let inv = n
            .mod_inverse(r32.clone())
            .ok_or(Error::Config)?
            .to_biguint()
            .ok_or(Error::Config)?;
        let n0 = ((&r32 - (inv % &r32)) % &r32).to_u32().ok_or(Error::Config)?;

        // R^2 mod n for R = 2^(key bits)
        let rr_big = (1usize.to_biguint().ok_or(Error::Config)? << (RSA3072_BYTES * 8 * 2)) % n;
        let rr_bytes = rr_big.to_bytes_be();
        let mut rr = [0u8; RSA3072_BYTES];
        rr[RSA3072_BYTES - rr_bytes.len()..].copy_from_slice(&rr_bytes);

        Ok(Self {
            modulus,
            exponent,
            montgomery: Some(MontgomeryFactors { rr, n0 }),
        })
    }

    pub fn modulus(&self) -> &[u8; RSA3072_BYTES] {
        &self.modulus
    }

    pub fn exponent(&self) -> u32 {
        self.exponent
    }

    pub fn montgomery(&self) -> Option<&MontgomeryFactors> {
        self.montgomery.as_ref()
    }

    /// Key size in bytes
    pub const fn size(&self) -> usize {
        RSA3072_BYTES
    }

    /// Bit length of the modulus
    pub fn bits(&self) -> u32 {
        for (i, byte) in self.modulus.iter().enumerate() {
            if *byte != 0 {
                return (RSA3072_BYTES - i) as u32 * 8 - byte.leading_zeros();
            }
        }

        0
    }
}

/// PSS-encoded message recovered by decryption
///
/// Always exactly the key size; scrubbed when dropped.
pub struct EncodedMessage(Vec<u8>);

impl EncodedMessage {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for EncodedMessage {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for EncodedMessage {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Backend contract for the asymmetric engine
pub trait ModExpAccelerator: Accelerator {
    /// Compute `signature^e mod n` into `out`
    ///
    /// `signature` and `out` are canonical big-endian and both exactly the
    /// key size; the transform is a fixed-size permutation with no implicit
    /// truncation or extension.
    fn mod_exp(
        &mut self,
        signature: &[u8],
        key: &KeyMaterial,
        out: &mut [u8],
    ) -> Result<(), Error>;
}

/// Decrypt a signature into its PSS-encoded message
///
/// Claims the shared asymmetric engine for the duration of the call; the
/// exclusive-access token is released on every exit path.
pub fn decrypt<M>(
    engine: &SharedEngine<M>,
    signature: &[u8],
    key: &KeyMaterial,
) -> Result<EncodedMessage, Error>
where
    M: ModExpAccelerator,
{
    if signature.len() != key.size() {
        return Err(Error::Config);
    }

    let mut lease = engine.lease()?;

    let mut out = vec![0u8; key.size()];
    lease.mod_exp(signature, key, &mut out)?;

    debug!("signature decrypted ({}B encoded message)", out.len());

    Ok(EncodedMessage(out))
}

/// Software rendition of the asymmetric engine, backed by `num-bigint`
pub struct SoftModExp {
    token: bool,
}

impl SoftModExp {
    pub const fn new() -> Self {
        Self { token: false }
    }
}

impl Default for SoftModExp {
    fn default() -> Self {
        Self::new()
    }
}

impl Accelerator for SoftModExp {
    fn soft_reset(&mut self) -> Result<(), Error> {
        Ok(())
    }

    fn acquire(&mut self) -> Result<(), Error> {
        if self.token {
            return Err(Error::ResourceBusy);
        }

        self.token = true;
        Ok(())
    }

    fn release(&mut self) {
        self.token = false;
    }
}

impl ModExpAccelerator for SoftModExp {
    fn mod_exp(
        &mut self,
        signature: &[u8],
        key: &KeyMaterial,
        out: &mut [u8],
    ) -> Result<(), Error> {
        if signature.len() != key.size() || out.len() != key.size() {
            return Err(Error::Config);
        }

        let n = BigUint::from_bytes_be(key.modulus());
        if n.is_zero() {
            return Err(Error::Engine(EngineStatus::InvalidOperation));
        }

        let base = BigUint::from_bytes_be(signature);
        if base >= n {
            // The representative is outside the permutation's domain
            return Err(Error::Engine(EngineStatus::InvalidOperation));
        }

        let result = base.modpow(&BigUint::from(key.exponent()), &n);

        let bytes = result.to_bytes_be();
        out.fill(0);
        out[key.size() - bytes.len()..].copy_from_slice(&bytes);

        Ok(())
    }
}

/// Operand banks of the hardware engine
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OperandSlot {
    Modulus,
    Exponent,
    Base,
    MontgomeryRr,
    MontgomeryN0,
}

/// Register-level access to the bank-addressed asymmetric engine
///
/// Operand words are in the engine's native little-endian word order, least
/// significant word first.
pub trait PkaBus {
    /// Soft-reset the engine
    fn reset(&mut self) -> Result<(), Error>;

    /// Try to claim the engine's hardware mutex
    fn try_lock(&mut self) -> bool;

    /// Release the engine's hardware mutex
    fn unlock(&mut self);

    /// Load an operand into its bank
    fn load_operand(&mut self, slot: OperandSlot, words: &[u32]) -> Result<(), Error>;

    /// Trigger the modular exponentiation over `op_words`-word operands
    fn start(&mut self, op_words: u32) -> Result<(), Error>;

    /// Sample the status register: `None` while busy, the status word once
    /// the operation has ended
    fn poll(&mut self) -> Result<Option<u32>, Error>;

    /// Read the result bank
    fn read_result(&mut self, words: &mut [u32]) -> Result<(), Error>;
}

/// The bank-addressed hardware path of the asymmetric engine
pub struct BankModExp<B>
where
    B: PkaBus,
{
    bus: B,
}

impl<B> BankModExp<B>
where
    B: PkaBus,
{
    pub const fn new(bus: B) -> Self {
        Self { bus }
    }
}

impl<B> Accelerator for BankModExp<B>
where
    B: PkaBus,
{
    fn soft_reset(&mut self) -> Result<(), Error> {
        self.bus.reset()
    }

    fn acquire(&mut self) -> Result<(), Error> {
        if self.bus.try_lock() {
            Ok(())
        } else {
            Err(Error::ResourceBusy)
        }
    }

    fn release(&mut self) {
        self.bus.unlock()
    }
}

impl<B> ModExpAccelerator for BankModExp<B>
where
    B: PkaBus,
{
    fn mod_exp(
        &mut self,
        signature: &[u8],
        key: &KeyMaterial,
        out: &mut [u8],
    ) -> Result<(), Error> {
        if signature.len() != RSA3072_BYTES || out.len() != RSA3072_BYTES {
            return Err(Error::Config);
        }

        // The hardware path cannot run without the precomputed factors
        let factors = key.montgomery().ok_or(Error::Config)?;

        let mut words = [0u32; RSA3072_WORDS];

        be_to_words(key.modulus(), &mut words);
        self.bus.load_operand(OperandSlot::Modulus, &words)?;

        be_to_words(&factors.rr, &mut words);
        self.bus.load_operand(OperandSlot::MontgomeryRr, &words)?;

        self.bus
            .load_operand(OperandSlot::MontgomeryN0, &[factors.n0])?;

        words = [0; RSA3072_WORDS];
        words[0] = key.exponent();
        self.bus.load_operand(OperandSlot::Exponent, &words)?;

        be_to_words(signature, &mut words);
        self.bus.load_operand(OperandSlot::Base, &words)?;

        self.bus.start(RSA3072_WORDS as u32)?;

        let mut status = None;
        for _ in 0..POLL_LIMIT {
            if let Some(code) = self.bus.poll()? {
                status = Some(code);
                break;
            }
        }

        let code = status.ok_or(Error::Timeout)?;
        if code != STATUS_OK {
            return Err(Error::Engine(EngineStatus::from_code(code)));
        }

        let mut result = [0u32; RSA3072_WORDS];
        self.bus.read_result(&mut result)?;

        // Normalize from the engine's LE word order back to canonical BE
        words_to_be(&result, out);

        Ok(())
    }
}

fn be_to_words(bytes: &[u8], words: &mut [u32]) {
    for (i, word) in words.iter_mut().enumerate() {
        let end = bytes.len() - i * 4;
        *word = u32::from_be_bytes([bytes[end - 4], bytes[end - 3], bytes[end - 2], bytes[end - 1]]);
    }
}

fn words_to_be(words: &[u32], out: &mut [u8]) {
    for (i, word) in words.iter().enumerate() {
        let end = out.len() - i * 4;
        out[end - 4..end].copy_from_slice(&word.to_be_bytes());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn test_modulus() -> [u8; RSA3072_BYTES] {
        let mut n = [0u8; RSA3072_BYTES];
        for (i, byte) in n.iter_mut().enumerate() {
            *byte = (i as u8).wrapping_mul(31).wrapping_add(7);
        }

        n[0] |= 0x80;
        n[RSA3072_BYTES - 1] |= 1;

        n
    }

    fn test_key() -> KeyMaterial {
        let n = BigUint::from_bytes_be(&test_modulus());
        let pub_key = RsaPublicKey::new(n, BigUint::from(65537u32)).unwrap();

        KeyMaterial::derive(&pub_key).unwrap()
    }

    fn test_base() -> [u8; RSA3072_BYTES] {
        let mut base = test_modulus();
        base[0] = 0x10;
        base
    }

    #[test]
    fn derive_produces_montgomery_factors() {
        let key = test_key();
        let n = BigUint::from_bytes_be(key.modulus());

        assert_eq!(key.bits(), 3072);
        assert_eq!(key.exponent(), 65537);

        let factors = key.montgomery().unwrap();

        // n * n0 must be -1 mod 2^32
        let n_low = u32::from_be_bytes([
            key.modulus()[RSA3072_BYTES - 4],
            key.modulus()[RSA3072_BYTES - 3],
            key.modulus()[RSA3072_BYTES - 2],
            key.modulus()[RSA3072_BYTES - 1],
        ]);
        assert_eq!(n_low.wrapping_mul(factors.n0), u32::MAX);

        let rr = BigUint::from_bytes_be(&factors.rr);
        let expected = (1usize.to_biguint().unwrap() << (RSA3072_BYTES * 8 * 2)) % &n;
        assert_eq!(rr, expected);
    }

    #[test]
    fn soft_backend_matches_reference_modpow() {
        let key = test_key();
        let base = test_base();
        let engine = SharedEngine::new(SoftModExp::new());

        let decoded = decrypt(&engine, &base, &key).unwrap();

        let n = BigUint::from_bytes_be(key.modulus());
        let expected = BigUint::from_bytes_be(&base).modpow(&BigUint::from(65537u32), &n);

        assert_eq!(BigUint::from_bytes_be(decoded.as_bytes()), expected);
        assert_eq!(decoded.len(), RSA3072_BYTES);
    }

    #[test]
    fn rejects_representative_out_of_range() {
        let key = test_key();
        let engine = SharedEngine::new(SoftModExp::new());

        let oversized = *key.modulus();

        assert_eq!(
            decrypt(&engine, &oversized, &key).err(),
            Some(Error::Engine(EngineStatus::InvalidOperation))
        );
    }

    #[test]
    fn rejects_short_signature() {
        let key = test_key();
        let engine = SharedEngine::new(SoftModExp::new());

        assert_eq!(decrypt(&engine, &[0u8; 10], &key).err(), Some(Error::Config));
    }

    /// Simulated bank-addressed engine for exercising the hardware path
    #[derive(Default)]
    struct SimBus {
        locked: bool,
        modulus: Vec<u32>,
        exponent: Vec<u32>,
        base: Vec<u32>,
        status: Option<u32>,
        result: Vec<u32>,
        /// Status word forced on completion instead of computing
        forced_status: Option<u32>,
        /// Never report completion when set
        stuck: bool,
    }

    impl PkaBus for SimBus {
        fn reset(&mut self) -> Result<(), Error> {
            self.status = None;
            self.result.clear();
            Ok(())
        }

        fn try_lock(&mut self) -> bool {
            if self.locked {
                return false;
            }

            self.locked = true;
            true
        }

        fn unlock(&mut self) {
            self.locked = false;
        }

        fn load_operand(&mut self, slot: OperandSlot, words: &[u32]) -> Result<(), Error> {
            match slot {
                OperandSlot::Modulus => self.modulus = words.to_vec(),
                OperandSlot::Exponent => self.exponent = words.to_vec(),
                OperandSlot::Base => self.base = words.to_vec(),
                OperandSlot::MontgomeryRr | OperandSlot::MontgomeryN0 => (),
            }

            Ok(())
        }

        fn start(&mut self, op_words: u32) -> Result<(), Error> {
            if self.stuck {
                return Ok(());
            }

            if let Some(code) = self.forced_status {
                self.status = Some(code);
                return Ok(());
            }

            let n = BigUint::from_bytes_le(&words_le_bytes(&self.modulus));
            let e = BigUint::from_bytes_le(&words_le_bytes(&self.exponent));
            let base = BigUint::from_bytes_le(&words_le_bytes(&self.base));

            let value = base.modpow(&e, &n);
            let bytes = value.to_bytes_le();

            let mut result = vec![0u32; op_words as usize];
            for (i, byte) in bytes.iter().enumerate() {
                result[i / 4] |= (*byte as u32) << (8 * (i % 4));
            }

            self.result = result;
            self.status = Some(STATUS_OK);

            Ok(())
        }

        fn poll(&mut self) -> Result<Option<u32>, Error> {
            Ok(self.status)
        }

        fn read_result(&mut self, words: &mut [u32]) -> Result<(), Error> {
            words.copy_from_slice(&self.result);
            Ok(())
        }
    }

    fn words_le_bytes(words: &[u32]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(words.len() * 4);
        for word in words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        bytes
    }

    #[test]
    fn bank_backend_matches_soft_backend() {
        let key = test_key();
        let base = test_base();

        let soft = SharedEngine::new(SoftModExp::new());
        let bank = SharedEngine::new(BankModExp::new(SimBus::default()));

        let from_soft = decrypt(&soft, &base, &key).unwrap();
        let from_bank = decrypt(&bank, &base, &key).unwrap();

        assert_eq!(from_soft.as_bytes(), from_bank.as_bytes());
    }

    #[test]
    fn bank_backend_requires_montgomery_factors() {
        let key = KeyMaterial::new(test_modulus(), 65537);
        let engine = SharedEngine::new(BankModExp::new(SimBus::default()));

        assert_eq!(
            decrypt(&engine, &test_base(), &key).err(),
            Some(Error::Config)
        );
    }

    #[test]
    fn engine_status_maps_to_closed_set() {
        let key = test_key();

        for (code, status) in [
            (1, EngineStatus::InvalidOperation),
            (2, EngineStatus::StackUnderflow),
            (3, EngineStatus::StackOverflow),
            (4, EngineStatus::Watchdog),
            (5, EngineStatus::MemoryCollision),
            (6, EngineStatus::OperationSizeExceeded),
            (99, EngineStatus::Unknown),
        ] {
            let engine = SharedEngine::new(BankModExp::new(SimBus {
                forced_status: Some(code),
                ..Default::default()
            }));

            assert_eq!(
                decrypt(&engine, &test_base(), &key).err(),
                Some(Error::Engine(status))
            );

            // The token must have been released despite the failure
            assert!(engine.lease().is_ok());
        }
    }

    #[test]
    fn stuck_engine_times_out() {
        let key = test_key();
        let engine = SharedEngine::new(BankModExp::new(SimBus {
            stuck: true,
            ..Default::default()
        }));

        assert_eq!(
            decrypt(&engine, &test_base(), &key).err(),
            Some(Error::Timeout)
        );
        assert!(engine.lease().is_ok());
    }

    #[test]
    fn word_order_round_trips() {
        let bytes = test_modulus();
        let mut words = [0u32; RSA3072_WORDS];
        let mut back = [0u8; RSA3072_BYTES];

        be_to_words(&bytes, &mut words);
        words_to_be(&words, &mut back);

        assert_eq!(bytes, back);

        // Least significant word first
        assert_eq!(
            words[0],
            u32::from_be_bytes([
                bytes[RSA3072_BYTES - 4],
                bytes[RSA3072_BYTES - 3],
                bytes[RSA3072_BYTES - 2],
                bytes[RSA3072_BYTES - 1],
            ])
        );
    }
}
