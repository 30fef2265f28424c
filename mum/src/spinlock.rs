//!
//! Spinlock Primitive
//!
//! A busy-wait lock that never enters the kernel. The state is one word,
//! 0 unlocked and 1 locked; `lock` retries a compare-and-swap from 0 to 1
//! until it wins, `unlock` stores 0. Both use sequentially consistent
//! ordering. There is no backoff and no yielding, so hold it only for a
//! handful of instructions.
//!
//! Usage:
//! ```rust,ignore
//! let lock = ctx.spinlock_create()?;
//! ctx.spinlock_lock(lock)?;
//! counter += 1;
//! ctx.spinlock_unlock(lock)?;
//! ctx.spinlock_destroy(lock)?;
//! ```
//!

use std::hint;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::debug;

use crate::backend::Backend;
use crate::context::Context;
use crate::registry::RawHandle;
use crate::result::{MumError, Outcome, ResultCode};

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;

#[derive(Debug, Default)]
pub struct RawSpinlock {
    state: AtomicU32,
}

impl RawSpinlock {
    pub const fn new() -> Self {
        Self {
            state: AtomicU32::new(UNLOCKED),
        }
    }

    pub fn lock(&self) {
        while self
            .state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            hint::spin_loop();
        }
    }

    pub fn try_lock(&self) -> bool {
        self.state
            .compare_exchange(UNLOCKED, LOCKED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    pub fn unlock(&self) {
        self.state.store(UNLOCKED, Ordering::SeqCst);
    }

    pub fn is_locked(&self) -> bool {
        self.state.load(Ordering::SeqCst) == LOCKED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SpinlockHandle {
    raw: RawHandle,
}

impl SpinlockHandle {
    pub fn raw(self) -> RawHandle {
        self.raw
    }
}

impl Outcome for SpinlockHandle {
    fn result_code(&self) -> ResultCode {
        ResultCode::Success
    }
}

impl<B: Backend> Context<B> {
    pub fn spinlock_create(&self) -> Result<SpinlockHandle, MumError> {
        self.ensure_live()?;
        let raw = self.spinlocks.insert(Arc::new(RawSpinlock::new()))?;
        let raw = self.admit(&self.spinlocks, raw, |_| Ok(()))?;
        debug!(index = raw.index(), "spinlock created");
        Ok(SpinlockHandle { raw })
    }

    pub fn spinlock_destroy(&self, handle: SpinlockHandle) -> Result<(), MumError> {
        self.ensure_live()?;
        self.spinlocks.remove(handle.raw, |_| Ok(()))?;
        debug!(index = handle.raw.index(), "spinlock destroyed");
        Ok(())
    }

    pub fn spinlock_lock(&self, handle: SpinlockHandle) -> Result<(), MumError> {
        self.ensure_live()?;
        let lock = self.spinlocks.with_hold(handle.raw, |lock| Arc::clone(lock))?;
        lock.lock();
        Ok(())
    }

    pub fn spinlock_unlock(&self, handle: SpinlockHandle) -> Result<(), MumError> {
        self.ensure_live()?;
        self.spinlocks.with_hold(handle.raw, |lock| lock.unlock())
    }
}
