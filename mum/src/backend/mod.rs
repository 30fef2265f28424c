//!
//! Platform backends
//!
//! A backend wraps the native thread and mutex calls of one OS family and
//! nothing else: no registry logic, no handle validation. The context layer
//! decides when to call it.
//!
//! - `posix` - pthreads through `libc` (unix only)
//! - `portable` - `std::thread` plus a condvar-based mutex (any target)
//!
//! `NativeBackend` is the backend a `Context` uses unless told otherwise:
//! `PosixBackend` on unix, `PortableBackend` elsewhere or when the
//! `portable-backend` feature is enabled.
//!

#[cfg(unix)]
pub mod posix;
pub mod portable;

use crate::result::{LockStatus, MumError};

/// Entry point handed to a backend's thread creation. It never unwinds.
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

pub trait Backend: Send + Sync + 'static {
    type Thread: Send + Sync + 'static;
    type Mutex: Send + Sync + 'static;

    const NAME: &'static str;

    /// Start `entry` on a new OS thread. Returns as soon as the OS accepted the
    /// thread; it may not have started running yet.
    fn create_thread(entry: ThreadEntry) -> Result<Self::Thread, MumError>;

    /// Block until the thread has terminated. Joining an already joined thread
    /// returns immediately.
    fn join_thread(thread: &Self::Thread) -> Result<(), MumError>;

    /// Give up the native handle. A thread that is still running keeps running
    /// detached and cleans up after itself.
    fn release_thread(thread: Self::Thread) -> Result<(), (Self::Thread, MumError)>;

    fn create_mutex() -> Result<Self::Mutex, MumError>;

    /// Tear down the native mutex. On failure the mutex is handed back intact.
    fn destroy_mutex(mutex: Self::Mutex) -> Result<(), (Self::Mutex, MumError)>;

    fn lock_mutex(mutex: &Self::Mutex) -> Result<LockStatus, MumError>;

    fn unlock_mutex(mutex: &Self::Mutex) -> Result<(), MumError>;
}

#[cfg(all(unix, not(feature = "portable-backend")))]
pub type NativeBackend = posix::PosixBackend;

#[cfg(any(not(unix), feature = "portable-backend"))]
pub type NativeBackend = portable::PortableBackend;
