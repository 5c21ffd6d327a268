//! Multi-task digest computation over the shared hashing accelerator
//!
//! A digest is declared up front with its total message length, then fed as a
//! sequence of tasks whose sources may differ: intermediate chunks can stream
//! straight out of the external image region, while the final chunk usually
//! comes from a local staging buffer. The digest is computed over the logical
//! concatenation of all tasks regardless of where each one lived.
//!
//! Intermediate tasks must be a multiple of the algorithm's block size; only
//! the task that completes the declared length may be a partial block.

use log::debug;

use sha2::{Digest as _, Sha256, Sha384};

use crate::engine::{Accelerator, Lease, SharedEngine};
use crate::Error;

/// Largest digest size produced by any supported algorithm
pub const MAX_DIGEST_SIZE: usize = 48;

/// SHA-384 chaining state (FIPS 180-4 §5.3.4)
///
/// SHA-384 runs on a 512-bit-wide core, so the accelerator must be seeded
/// with this state instead of the core's native initial vector.
const SHA384_INIT: [u64; 8] = [
    0xcbbb9d5dc1059ed8,
    0x629a292a367cd507,
    0x9159015a3070dd17,
    0x152fecd8f70e5939,
    0x67332667ffc00b31,
    0x8eb44a8768581511,
    0xdb0c2e0d64f98fa7,
    0x47b5481dbefa4fa4,
];

/// Digest functions accepted for image verification
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
}

impl HashAlgorithm {
    /// Native chunk size; intermediate tasks must be a multiple of this
    pub const fn block_size(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Sha384 => 128,
        }
    }

    /// Output size in bytes
    pub const fn digest_size(&self) -> usize {
        match self {
            Self::Sha256 => 32,
            Self::Sha384 => 48,
        }
    }

    /// Non-default chaining state the accelerator must be seeded with, if any
    ///
    /// `None` means the core's own initial vector for this mode is correct.
    pub const fn initial_state(&self) -> Option<&'static [u64; 8]> {
        match self {
            Self::Sha256 => None,
            Self::Sha384 => Some(&SHA384_INIT),
        }
    }
}

/// Output of a completed digest, in the algorithm's fixed byte order
#[derive(Debug, Clone)]
pub struct Digest {
    algo: HashAlgorithm,
    bytes: [u8; MAX_DIGEST_SIZE],
}

impl Digest {
    fn zeroed(algo: HashAlgorithm) -> Self {
        Self {
            algo,
            bytes: [0; MAX_DIGEST_SIZE],
        }
    }

    /// The algorithm that produced this digest
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    /// The digest bytes, `digest_size()` long
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.algo.digest_size()]
    }
}

impl PartialEq for Digest {
    fn eq(&self, other: &Self) -> bool {
        self.algo == other.algo && self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Digest {}

impl AsRef<[u8]> for Digest {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// An external, address-mapped storage region holding untrusted image bytes
///
/// The core only ever reads it, never writes. Reads outside the region are an
/// [`Error::Config`].
pub trait ImageStore {
    /// Total addressable size in bytes
    fn size(&self) -> u64;

    /// Fill `out` with the bytes starting at `offset`
    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), Error>;
}

/// [`ImageStore`] over a plain byte slice, for host-side use and tests
pub struct MemStore<'a>(pub &'a [u8]);

impl ImageStore for MemStore<'_> {
    fn size(&self) -> u64 {
        self.0.len() as u64
    }

    fn read(&self, offset: u64, out: &mut [u8]) -> Result<(), Error> {
        let start = usize::try_from(offset).map_err(|_| Error::Config)?;
        let end = start.checked_add(out.len()).ok_or(Error::Config)?;

        if end > self.0.len() {
            return Err(Error::Config);
        }

        out.copy_from_slice(&self.0[start..end]);

        Ok(())
    }
}

/// One chunk of the message being digested
pub enum HashTask<'d> {
    /// Stream directly from the external region over the given DMA port
    Region {
        store: &'d dyn ImageStore,
        offset: u64,
        len: u32,
        port: u8,
    },
    /// Consume a local staging buffer
    Buffer(&'d [u8]),
}

impl HashTask<'_> {
    /// Byte length this task contributes to the message
    pub fn len(&self) -> u64 {
        match self {
            Self::Region { len, .. } => *len as u64,
            Self::Buffer(data) => data.len() as u64,
        }
    }
}

/// Backend contract for the hashing accelerator
///
/// All waits inside an implementation are bounded by
/// [`POLL_LIMIT`](crate::engine::POLL_LIMIT) polling iterations; expiry
/// surfaces as [`Error::Timeout`] and a hard engine error as
/// [`Error::EngineFault`].
pub trait ShaAccelerator: Accelerator {
    /// Select the digest mode and declare the total message length
    fn configure(&mut self, algo: HashAlgorithm, total_len: u64) -> Result<(), Error>;

    /// Seed a non-default chaining state before the first task
    fn load_state(&mut self, state: &[u64; 8]) -> Result<(), Error>;

    /// Ingest `len` bytes from the external region starting at `offset`
    fn dma_region(
        &mut self,
        store: &dyn ImageStore,
        offset: u64,
        len: u32,
        port: u8,
    ) -> Result<(), Error>;

    /// Ingest bytes from a local buffer
    fn dma_buffer(&mut self, data: &[u8]) -> Result<(), Error>;

    /// Read the digest registers into `out` in the algorithm's byte order
    ///
    /// With `clear` set the registers are scrubbed after the read so no
    /// digest persists across operations. This is the only way the internal
    /// hash registers are ever observed.
    fn read_digest(&mut self, out: &mut [u8], clear: bool) -> Result<(), Error>;
}

/// One in-flight digest over the shared hashing accelerator
///
/// Holds the engine lease for its whole lifetime; dropping the operation (on
/// success or any error path) releases the exclusive-access token.
pub struct HashOp<'e, A>
where
    A: ShaAccelerator,
{
    lease: Lease<'e, A>,
    algo: HashAlgorithm,
    remaining: u64,
}

impl<'e, A> HashOp<'e, A>
where
    A: ShaAccelerator,
{
    /// Claim the accelerator and open a digest of `total_len` message bytes
    pub fn begin(
        engine: &'e SharedEngine<A>,
        algo: HashAlgorithm,
        total_len: u64,
    ) -> Result<Self, Error> {
        let mut lease = engine.lease()?;

        lease.configure(algo, total_len)?;

        if let Some(state) = algo.initial_state() {
            lease.load_state(state)?;
        }

        Ok(Self {
            lease,
            algo,
            remaining: total_len,
        })
    }

    /// Message bytes still outstanding before the digest can be read
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Submit the next chunk of the message
    ///
    /// Rejects (`Config`) a task longer than the remaining length, and any
    /// non-final task whose length is not a block-size multiple.
    pub fn insert(&mut self, task: &HashTask<'_>) -> Result<(), Error> {
        let len = task.len();

        if len == 0 || len > self.remaining {
            return Err(Error::Config);
        }

        let last = len == self.remaining;
        if !last && len % self.algo.block_size() as u64 != 0 {
            return Err(Error::Config);
        }

        match task {
            HashTask::Region {
                store,
                offset,
                len,
                port,
            } => {
                let end = offset.checked_add(*len as u64).ok_or(Error::Config)?;
                if end > store.size() {
                    return Err(Error::Config);
                }

                debug!("hash task: {}B from region offset {:#x}", len, offset);

                self.lease.dma_region(*store, *offset, *len, *port)?;
            }
            HashTask::Buffer(data) => {
                debug!("hash task: {}B from local buffer", data.len());

                self.lease.dma_buffer(data)?;
            }
        }

        self.remaining -= len;

        Ok(())
    }

    /// Read the digest out and clear the accelerator's hash registers
    ///
    /// The declared length must have been consumed exactly.
    pub fn finish(mut self) -> Result<Digest, Error> {
        if self.remaining != 0 {
            return Err(Error::Config);
        }

        let mut digest = Digest::zeroed(self.algo);
        let size = self.algo.digest_size();

        self.lease.read_digest(&mut digest.bytes[..size], true)?;

        Ok(digest)
    }
}

enum SoftCore {
    Idle,
    Sha256(Sha256),
    Sha384(Sha384),
}

/// Software rendition of the hashing accelerator, backed by `sha2`
///
/// Used off-chip and on targets without the dedicated block. The token
/// protocol is honored so the exclusivity discipline stays identical to the
/// hardware path.
pub struct SoftSha {
    core: SoftCore,
    regs: [u8; MAX_DIGEST_SIZE],
    regs_len: usize,
    token: bool,
}

impl SoftSha {
    pub const fn new() -> Self {
        Self {
            core: SoftCore::Idle,
            regs: [0; MAX_DIGEST_SIZE],
            regs_len: 0,
            token: false,
        }
    }

    fn update(&mut self, data: &[u8]) -> Result<(), Error> {
        match &mut self.core {
            SoftCore::Idle => Err(Error::Config),
            SoftCore::Sha256(hasher) => {
                hasher.update(data);
                Ok(())
            }
            SoftCore::Sha384(hasher) => {
                hasher.update(data);
                Ok(())
            }
        }
    }
}

impl Default for SoftSha {
    fn default() -> Self {
        Self::new()
    }
}

impl Accelerator for SoftSha {
    fn soft_reset(&mut self) -> Result<(), Error> {
        self.core = SoftCore::Idle;
        self.regs = [0; MAX_DIGEST_SIZE];
        self.regs_len = 0;

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

impl ShaAccelerator for SoftSha {
    fn configure(&mut self, algo: HashAlgorithm, _total_len: u64) -> Result<(), Error> {
        self.core = match algo {
            HashAlgorithm::Sha256 => SoftCore::Sha256(Sha256::new()),
            HashAlgorithm::Sha384 => SoftCore::Sha384(Sha384::new()),
        };

        Ok(())
    }

    fn load_state(&mut self, state: &[u64; 8]) -> Result<(), Error> {
        // The software core computes truncated variants natively, so only the
        // published variant vectors are meaningful here
        match &self.core {
            SoftCore::Sha384(_) if *state == SHA384_INIT => Ok(()),
            _ => Err(Error::Config),
        }
    }

    fn dma_region(
        &mut self,
        store: &dyn ImageStore,
        mut offset: u64,
        len: u32,
        _port: u8,
    ) -> Result<(), Error> {
        let mut window = [0u8; 128];
        let mut left = len as usize;

        while left > 0 {
            let take = left.min(window.len());

            store.read(offset, &mut window[..take])?;
            self.update(&window[..take])?;

            offset += take as u64;
            left -= take;
        }

        Ok(())
    }

    fn dma_buffer(&mut self, data: &[u8]) -> Result<(), Error> {
        self.update(data)
    }

    fn read_digest(&mut self, out: &mut [u8], clear: bool) -> Result<(), Error> {
        match core::mem::replace(&mut self.core, SoftCore::Idle) {
            SoftCore::Sha256(hasher) => {
                self.regs[..32].copy_from_slice(&hasher.finalize());
                self.regs_len = 32;
            }
            SoftCore::Sha384(hasher) => {
                self.regs[..48].copy_from_slice(&hasher.finalize());
                self.regs_len = 48;
            }
            SoftCore::Idle => {
                // Re-reading already-latched registers is allowed until they
                // are cleared
                if self.regs_len == 0 {
                    return Err(Error::Config);
                }
            }
        }

        if out.len() != self.regs_len {
            return Err(Error::Config);
        }

        out.copy_from_slice(&self.regs[..self.regs_len]);

        if clear {
            self.regs = [0; MAX_DIGEST_SIZE];
            self.regs_len = 0;
        }

        Ok(())
    }
}
