//! Signature-verification core for hardware-rooted ucode secure boot
//!
//! Before an auxiliary firmware image ("ucode") is admitted into a protected
//! memory region and allowed to run at elevated privilege, it must be proven
//! to carry a valid RSA-3072 PSS signature from a trusted authority. This
//! crate is exactly that proof: the fragmented-source hashing engine, the
//! EMSA-PSS (RFC 8017 §9.1.2) verifier with its MGF1 mask generation, the
//! public-key modular exponentiation over the shared asymmetric engine, and
//! the exclusive-access discipline both shared accelerators require.
//!
//! The crate is `no_std` (but needs `alloc` because the Rust Crypto stack
//! needs it) so that the same pipeline runs on the verifying microcontroller
//! and off-chip, e.g. for host-side validation of images before they are
//! flashed. Hardware accelerators sit behind the [`hash::ShaAccelerator`] and
//! [`modexp::ModExpAccelerator`] traits; software backends driven by `sha2`
//! and `num-bigint` are provided for targets without the dedicated blocks.
#![no_std]

extern crate alloc;

use core::fmt::{self, Display};

pub mod compose;
pub mod engine;
pub mod hash;
pub mod mgf;
pub mod modexp;
pub mod pss;
pub mod validate;

/// The RSA crate is re-exported for user convenience
/// so that users of the lib do not have to explicitly depend on it
pub mod rsa {
    pub use ::rsa::*;
}

pub use compose::{compose, ImageMetadata, ImageReference};
pub use engine::{Accelerator, Lease, SharedEngine, POLL_LIMIT};
pub use hash::{Digest, HashAlgorithm, HashOp, HashTask, ImageStore, MemStore, SoftSha};
pub use modexp::{decrypt, BankModExp, EncodedMessage, KeyMaterial, SoftModExp};
pub use validate::{KeySet, KeyStore, SignatureDescriptor, ValidationError, ValidationId, Validator};

/// Errors that can occur inside the verification pipeline
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// Caller or internal invariant violated; always a defect, never an
    /// expected runtime outcome
    Config,
    /// The image tail plus metadata exceeds the fixed staging buffer
    BufferTooSmall,
    /// The decrypted signature does not parse as a valid PSS encoding
    Format,
    /// The encoding parsed but the recomputed hash does not match
    SignatureMismatch,
    /// The hashing accelerator signalled a hard error
    EngineFault,
    /// An accelerator did not reach ready within the bounded polling window
    Timeout,
    /// The shared accelerator is already held by another operation
    ResourceBusy,
    /// The asymmetric engine reported a failure status
    Engine(EngineStatus),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Config => write!(f, "Invariant violation"),
            Self::BufferTooSmall => write!(f, "Staging buffer too small"),
            Self::Format => write!(f, "Invalid PSS encoding"),
            Self::SignatureMismatch => write!(f, "Signature mismatch"),
            Self::EngineFault => write!(f, "Hash engine fault"),
            Self::Timeout => write!(f, "Engine timeout"),
            Self::ResourceBusy => write!(f, "Engine busy"),
            Self::Engine(status) => write!(f, "Asymmetric engine error: {:?}", status),
        }
    }
}

/// Failure statuses reported by the asymmetric engine
///
/// The raw status word is mapped onto this closed set; none of these are
/// retryable without re-initializing the engine.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum EngineStatus {
    InvalidOperation,
    StackUnderflow,
    StackOverflow,
    Watchdog,
    MemoryCollision,
    OperationSizeExceeded,
    Unknown,
}

impl EngineStatus {
    pub(crate) fn from_code(code: u32) -> Self {
        match code {
            1 => Self::InvalidOperation,
            2 => Self::StackUnderflow,
            3 => Self::StackOverflow,
            4 => Self::Watchdog,
            5 => Self::MemoryCollision,
            6 => Self::OperationSizeExceeded,
            _ => Self::Unknown,
        }
    }
}
