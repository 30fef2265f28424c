//!
//! Process-wide context
//!
//! For programs that want one context for their whole lifetime without
//! threading a reference through every call. `init` installs a context built
//! on `NativeBackend`, `term` tears it down, and the free functions here
//! forward to it.
//!
//! Every forwarding function resets the installed result sink (see
//! `set_global_result`) to `Success` on entry and stores its own outcome on
//! return, so callers can read the code of the last operation from the cell.
//!

use std::mem;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::debug;

use crate::config::ContextConfig;
use crate::context::Context;
use crate::mutex::MutexHandle;
use crate::result::{LockStatus, MumError, ResultCode, record, reported};
use crate::spinlock::SpinlockHandle;
use crate::thread::ThreadHandle;

pub use crate::lock::LockHandle;
pub use crate::thread::{exit, testcancel};

enum GlobalState {
    Uninitialized,
    Live(Arc<Context>),
    Terminated,
}

static GLOBAL: RwLock<GlobalState> = RwLock::new(GlobalState::Uninitialized);

pub fn init(config: ContextConfig) -> Result<(), MumError> {
    reported(|| {
        let mut state = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
        if let GlobalState::Live(_) = *state {
            return Err(MumError::AlreadyInitialized);
        }
        *state = GlobalState::Live(Arc::new(Context::new(config)));
        debug!("global context installed");
        Ok(())
    })
}

pub fn term() -> Result<(), MumError> {
    reported(|| {
        let context = {
            let mut state = GLOBAL.write().unwrap_or_else(PoisonError::into_inner);
            match mem::replace(&mut *state, GlobalState::Terminated) {
                GlobalState::Live(context) => context,
                GlobalState::Uninitialized => {
                    *state = GlobalState::Uninitialized;
                    return Err(MumError::NotInitialized);
                }
                GlobalState::Terminated => return Err(MumError::AlreadyTerminated),
            }
        };
        // Other holders of the Arc see a dead context from here on.
        context.terminate()
    })
}

/// The installed context, if one is live.
pub fn context() -> Result<Arc<Context>, MumError> {
    match &*GLOBAL.read().unwrap_or_else(PoisonError::into_inner) {
        GlobalState::Live(context) => Ok(Arc::clone(context)),
        _ => Err(MumError::NotInitialized),
    }
}

pub fn thread_create<A, F, T>(entry: F, arg: A) -> Result<ThreadHandle<T>, MumError>
where
    A: Send + 'static,
    F: FnOnce(A) -> T + Send + 'static,
    T: Send + 'static,
{
    reported(|| context()?.thread_create(entry, arg))
}

pub fn thread_destroy<T>(handle: ThreadHandle<T>) -> Result<(), MumError> {
    reported(|| context()?.thread_destroy(handle))
}

pub fn thread_wait<T>(handle: ThreadHandle<T>) -> Result<(), MumError> {
    reported(|| context()?.thread_wait(handle))
}

pub fn thread_get_return_value<T: Send + 'static>(handle: ThreadHandle<T>) -> Result<T, MumError> {
    record(ResultCode::Success);
    let result = context().and_then(|context| context.thread_get_return_value(handle));
    record(
        result
            .as_ref()
            .map_or_else(MumError::code, |_| ResultCode::Success),
    );
    result
}

pub fn mutex_create() -> Result<MutexHandle, MumError> {
    reported(|| context()?.mutex_create())
}

pub fn mutex_destroy(handle: MutexHandle) -> Result<(), MumError> {
    reported(|| context()?.mutex_destroy(handle))
}

pub fn mutex_lock(handle: MutexHandle) -> Result<LockStatus, MumError> {
    reported(|| context()?.mutex_lock(handle))
}

pub fn mutex_unlock(handle: MutexHandle) -> Result<(), MumError> {
    reported(|| context()?.mutex_unlock(handle))
}

pub fn spinlock_create() -> Result<SpinlockHandle, MumError> {
    reported(|| context()?.spinlock_create())
}

pub fn spinlock_destroy(handle: SpinlockHandle) -> Result<(), MumError> {
    reported(|| context()?.spinlock_destroy(handle))
}

pub fn spinlock_lock(handle: SpinlockHandle) -> Result<(), MumError> {
    reported(|| context()?.spinlock_lock(handle))
}

pub fn spinlock_unlock(handle: SpinlockHandle) -> Result<(), MumError> {
    reported(|| context()?.spinlock_unlock(handle))
}

pub fn lock_create() -> Result<LockHandle, MumError> {
    reported(|| context()?.lock_create())
}

pub fn lock_destroy(handle: LockHandle) -> Result<(), MumError> {
    reported(|| context()?.lock_destroy(handle))
}

pub fn lock_lock(handle: LockHandle) -> Result<LockStatus, MumError> {
    reported(|| context()?.lock_lock(handle))
}

pub fn lock_unlock(handle: LockHandle) -> Result<(), MumError> {
    reported(|| context()?.lock_unlock(handle))
}
