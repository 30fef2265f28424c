//!
//! Mutex Primitive
//!
//! A blocking mutual-exclusion lock backed by the context's backend. Only the
//! thread that locked it may unlock it. When the owner terminates while still
//! holding it, the next `mutex_lock` succeeds with `LockStatus::Abandoned`.
//!
//! Usage:
//! ```rust,ignore
//! let m = ctx.mutex_create()?;
//! if ctx.mutex_lock(m)? == LockStatus::Abandoned {
//!     // repair the protected state
//! }
//! ctx.mutex_unlock(m)?;
//! ctx.mutex_destroy(m)?;
//! ```
//!

use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::backend::Backend;
use crate::context::Context;
use crate::registry::RawHandle;
use crate::result::{LockStatus, MumError, Outcome, PrimitiveKind, ResultCode};
use crate::thread::testcancel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MutexHandle {
    raw: RawHandle,
}

impl MutexHandle {
    pub fn raw(self) -> RawHandle {
        self.raw
    }
}

impl Outcome for MutexHandle {
    fn result_code(&self) -> ResultCode {
        ResultCode::Success
    }
}

impl<B: Backend> Context<B> {
    pub fn mutex_create(&self) -> Result<MutexHandle, MumError> {
        self.ensure_live()?;
        let native = B::create_mutex()?;
        let raw = self.mutexes.insert(Arc::new(native))?;
        let raw = self.admit(&self.mutexes, raw, |native| {
            drop(native);
            Ok(())
        })?;
        debug!(backend = B::NAME, index = raw.index(), "mutex created");
        Ok(MutexHandle { raw })
    }

    /// Destroy an unlocked mutex. A mutex that is locked, or that another
    /// thread is blocked on, is left intact and reported as a destroy failure.
    pub fn mutex_destroy(&self, handle: MutexHandle) -> Result<(), MumError> {
        self.ensure_live()?;
        self.mutexes
            .remove(handle.raw, |native| match Arc::try_unwrap(native) {
                Ok(native) => B::destroy_mutex(native).map_err(|(native, e)| (Arc::new(native), e)),
                Err(native) => Err((
                    native,
                    MumError::DestroyCallFailed {
                        kind: PrimitiveKind::Mutex,
                        os_code: None,
                    },
                )),
            })?;
        debug!(index = handle.raw.index(), "mutex destroyed");
        Ok(())
    }

    /// Block until the calling thread owns the mutex.
    pub fn mutex_lock(&self, handle: MutexHandle) -> Result<LockStatus, MumError> {
        self.ensure_live()?;
        testcancel();

        // Blocking happens outside the hold.
        let native = self.mutexes.with_hold(handle.raw, |native| Arc::clone(native))?;
        trace!(index = handle.raw.index(), "locking mutex");
        let status = B::lock_mutex(&native)?;

        if status == LockStatus::Abandoned {
            warn!(
                index = handle.raw.index(),
                "mutex owner terminated while holding it"
            );
        }
        Ok(status)
    }

    pub fn mutex_unlock(&self, handle: MutexHandle) -> Result<(), MumError> {
        self.ensure_live()?;
        self.mutexes
            .with_hold(handle.raw, |native| B::unlock_mutex(native))?
    }
}
