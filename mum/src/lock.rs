//!
//! Generic lock
//!
//! One lock API for code that doesn't care which primitive backs it. By
//! default a `LockHandle` is a spinlock; with the `mutex-lock` feature it is a
//! mutex. The spinlock flavor never reports `LockStatus::Abandoned`.
//!

use crate::backend::Backend;
use crate::context::Context;
use crate::result::{LockStatus, MumError};

#[cfg(feature = "mutex-lock")]
pub type LockHandle = crate::mutex::MutexHandle;

#[cfg(not(feature = "mutex-lock"))]
pub type LockHandle = crate::spinlock::SpinlockHandle;

impl<B: Backend> Context<B> {
    pub fn lock_create(&self) -> Result<LockHandle, MumError> {
        #[cfg(feature = "mutex-lock")]
        return self.mutex_create();
        #[cfg(not(feature = "mutex-lock"))]
        return self.spinlock_create();
    }

    pub fn lock_destroy(&self, handle: LockHandle) -> Result<(), MumError> {
        #[cfg(feature = "mutex-lock")]
        return self.mutex_destroy(handle);
        #[cfg(not(feature = "mutex-lock"))]
        return self.spinlock_destroy(handle);
    }

    pub fn lock_lock(&self, handle: LockHandle) -> Result<LockStatus, MumError> {
        #[cfg(feature = "mutex-lock")]
        return self.mutex_lock(handle);
        #[cfg(not(feature = "mutex-lock"))]
        return self.spinlock_lock(handle).map(|()| LockStatus::Acquired);
    }

    pub fn lock_unlock(&self, handle: LockHandle) -> Result<(), MumError> {
        #[cfg(feature = "mutex-lock")]
        return self.mutex_unlock(handle);
        #[cfg(not(feature = "mutex-lock"))]
        return self.spinlock_unlock(handle);
    }
}
