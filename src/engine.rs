//! Exclusive-access discipline for the shared crypto accelerators
//!
//! Two shared hardware resources exist system-wide: the hashing accelerator
//! and the asymmetric (modular-exponentiation) accelerator. At most one
//! operation may be in flight on each at any instant. Both are modelled as a
//! [`SharedEngine`] whose [`lease`](SharedEngine::lease) follows the
//! acquisition protocol: soft-reset the block to a known state, then claim
//! its exclusive-access token. Acquisition failure is a fatal
//! [`Error::ResourceBusy`], never retried with backoff.
//!
//! The token is returned by [`Lease`]'s `Drop` impl, so release happens on
//! every exit path including early error returns.

use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use crate::Error;

/// Upper bound on status-polling iterations for any single hardware wait
///
/// Expiry is a normal fatal outcome ([`Error::Timeout`]) for the call, not a
/// cancellation signal.
pub const POLL_LIMIT: u32 = 100_000;

/// Token protocol every shared accelerator implements
pub trait Accelerator {
    /// Bring the block to a known idle state
    ///
    /// An in-progress operation from an unrelated caller must never be
    /// observable after this returns.
    fn soft_reset(&mut self) -> Result<(), Error>;

    /// Claim the block's exclusive-access token
    fn acquire(&mut self) -> Result<(), Error>;

    /// Return the exclusive-access token; must be infallible
    fn release(&mut self);
}

/// A shared accelerator with single-owner access
pub struct SharedEngine<T>(Mutex<T>);

impl<T> SharedEngine<T>
where
    T: Accelerator,
{
    /// Wrap an accelerator for shared use
    pub const fn new(accel: T) -> Self {
        Self(Mutex::new(accel))
    }

    /// Reset the accelerator and claim exclusive ownership of it
    ///
    /// Returns [`Error::ResourceBusy`] if the engine is already held.
    pub fn lease(&self) -> Result<Lease<'_, T>, Error> {
        let mut hw = self.0.try_lock().ok_or(Error::ResourceBusy)?;

        hw.soft_reset()?;
        hw.acquire()?;

        Ok(Lease { hw })
    }
}

/// Exclusive ownership of a shared accelerator for one operation
///
/// Dropping the lease releases the exclusive-access token unconditionally.
pub struct Lease<'a, T>
where
    T: Accelerator,
{
    hw: MutexGuard<'a, T>,
}

impl<T> Deref for Lease<'_, T>
where
    T: Accelerator,
{
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.hw
    }
}

impl<T> DerefMut for Lease<'_, T>
where
    T: Accelerator,
{
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.hw
    }
}

impl<T> Drop for Lease<'_, T>
where
    T: Accelerator,
{
    fn drop(&mut self) {
        self.hw.release();
    }
}
