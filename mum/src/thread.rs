//!
//! Thread Primitive
//!
//! A thread moves through Unstarted -> Running -> Exited -> Destroyed.
//! `Context::thread_create` starts the entry closure on a new OS thread; the
//! closure publishes its result either by returning or by calling [`exit`]
//! anywhere below it. `thread_wait` joins, after which
//! `thread_get_return_value` hands the published value back, typed.
//!
//! Destroying a thread that is still running requests cancellation and lets
//! the OS thread go. Cancellation is deferred: the thread stops at its next
//! cancellation point ([`testcancel`], `Context::mutex_lock`,
//! `Context::thread_wait`). Mutexes it holds at that moment stay locked.
//!
//! Usage:
//! ```rust,ignore
//! let worker: ThreadHandle<u64> = ctx.thread_create(|n: u64| -> u64 {
//!     if n == 0 {
//!         mum::thread::exit(1u64);
//!     }
//!     n * 2
//! }, 21)?;
//! ctx.thread_wait(worker)?;
//! assert_eq!(ctx.thread_get_return_value(worker)?, 42);
//! ctx.thread_destroy(worker)?;
//! ```
//!

use std::any::{Any, type_name};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, trace, warn};

use crate::backend::{Backend, ThreadEntry};
use crate::context::Context;
use crate::registry::RawHandle;
use crate::result::{MumError, Outcome, ResultCode};

/// Handle to a thread whose entry produces a `T`.
pub struct ThreadHandle<T> {
    raw: RawHandle,
    _returns: PhantomData<fn() -> T>,
}

impl<T> ThreadHandle<T> {
    fn from_raw(raw: RawHandle) -> Self {
        Self {
            raw,
            _returns: PhantomData,
        }
    }

    pub fn raw(self) -> RawHandle {
        self.raw
    }
}

impl<T> Clone for ThreadHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for ThreadHandle<T> {}

impl<T> PartialEq for ThreadHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T> Eq for ThreadHandle<T> {}

impl<T> fmt::Debug for ThreadHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadHandle")
            .field("index", &self.raw.index())
            .field("generation", &self.raw.generation())
            .field("returns", &type_name::<T>())
            .finish()
    }
}

impl<T> Outcome for ThreadHandle<T> {
    fn result_code(&self) -> ResultCode {
        ResultCode::Success
    }
}

enum ThreadOutcome {
    Running,
    Exited(Box<dyn Any + Send>),
    Panicked(String),
    Cancelled,
    Taken,
}

pub(crate) struct ThreadShared {
    outcome: Mutex<ThreadOutcome>,
    cancel_requested: AtomicBool,
    joined: AtomicBool,
}

impl ThreadShared {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(ThreadOutcome::Running),
            cancel_requested: AtomicBool::new(false),
            joined: AtomicBool::new(false),
        }
    }

    fn finish(&self, outcome: ThreadOutcome) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = outcome;
    }

    fn is_finished(&self) -> bool {
        !matches!(
            *self.outcome.lock().unwrap_or_else(PoisonError::into_inner),
            ThreadOutcome::Running
        )
    }

    fn take_value<T: 'static>(&self) -> Result<T, MumError> {
        if !self.joined.load(Ordering::SeqCst) {
            return Err(MumError::ReturnValueUnavailable);
        }

        let mut outcome = self.outcome.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *outcome, ThreadOutcome::Taken) {
            ThreadOutcome::Exited(value) => match value.downcast::<T>() {
                Ok(value) => Ok(*value),
                Err(value) => {
                    *outcome = ThreadOutcome::Exited(value);
                    Err(MumError::ReturnTypeMismatch {
                        expected: type_name::<T>(),
                    })
                }
            },
            ThreadOutcome::Panicked(message) => {
                *outcome = ThreadOutcome::Panicked(message.clone());
                Err(MumError::ThreadPanicked { message })
            }
            other => {
                *outcome = other;
                Err(MumError::ReturnValueUnavailable)
            }
        }
    }
}

pub(crate) struct ThreadSlot<B: Backend> {
    native: Arc<B::Thread>,
    shared: Arc<ThreadShared>,
}

struct ExitSignal(Box<dyn Any + Send>);

struct CancelSignal;

thread_local! {
    static CURRENT: RefCell<Option<Arc<ThreadShared>>> = const { RefCell::new(None) };
}

/// Terminate the calling thread, publishing `value` as its return value.
///
/// Only threads started by `Context::thread_create` can exit this way; on any
/// other thread this unwinds like an uncaught panic.
pub fn exit<T: Send + 'static>(value: T) -> ! {
    panic::resume_unwind(Box::new(ExitSignal(Box::new(value))))
}

/// Cancellation point: terminates the calling thread if it was destroyed.
pub fn testcancel() {
    let cancelled = CURRENT.with(|current| {
        current
            .borrow()
            .as_ref()
            .is_some_and(|shared| shared.cancel_requested.load(Ordering::SeqCst))
    });
    if cancelled {
        panic::resume_unwind(Box::new(CancelSignal));
    }
}

/// Whether the calling thread was started by a context.
pub fn is_managed() -> bool {
    CURRENT.with(|current| current.borrow().is_some())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn trampoline<F, T>(shared: Arc<ThreadShared>, body: F) -> ThreadEntry
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    Box::new(move || {
        CURRENT.with(|current| *current.borrow_mut() = Some(Arc::clone(&shared)));

        let outcome = match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(value) => ThreadOutcome::Exited(Box::new(value)),
            Err(payload) => match payload.downcast::<ExitSignal>() {
                Ok(signal) => ThreadOutcome::Exited(signal.0),
                Err(payload) if payload.is::<CancelSignal>() => ThreadOutcome::Cancelled,
                Err(payload) => ThreadOutcome::Panicked(panic_message(payload.as_ref())),
            },
        };

        CURRENT.with(|current| current.borrow_mut().take());
        shared.finish(outcome);
    })
}

/// Let go of a thread slot: cancel the thread if it still runs, then release
/// the native handle.
pub(crate) fn retire<B: Backend>(slot: ThreadSlot<B>) -> Result<(), (ThreadSlot<B>, MumError)> {
    if !slot.shared.is_finished() {
        slot.shared.cancel_requested.store(true, Ordering::SeqCst);
        warn!(backend = B::NAME, "thread still running; cancellation requested");
    }

    let ThreadSlot { native, shared } = slot;
    match Arc::try_unwrap(native) {
        Ok(native) => B::release_thread(native).map_err(|(native, e)| {
            (
                ThreadSlot {
                    native: Arc::new(native),
                    shared,
                },
                e,
            )
        }),
        // A wait in progress still holds the native handle; it is released
        // with the last reference.
        Err(_) => Ok(()),
    }
}

impl<B: Backend> Context<B> {
    /// Start `entry(arg)` on a new thread. The thread may not be running yet
    /// when this returns, and threads created back to back start in no
    /// particular order.
    pub fn thread_create<A, F, T>(&self, entry: F, arg: A) -> Result<ThreadHandle<T>, MumError>
    where
        A: Send + 'static,
        F: FnOnce(A) -> T + Send + 'static,
        T: Send + 'static,
    {
        self.ensure_live()?;

        let shared = Arc::new(ThreadShared::new());
        let native = B::create_thread(trampoline(Arc::clone(&shared), move || entry(arg)))?;
        let raw = self.threads.insert(ThreadSlot {
            native: Arc::new(native),
            shared,
        })?;
        let raw = self.admit(&self.threads, raw, retire::<B>)?;

        debug!(backend = B::NAME, index = raw.index(), "thread created");
        Ok(ThreadHandle::from_raw(raw))
    }

    pub fn thread_destroy<T>(&self, handle: ThreadHandle<T>) -> Result<(), MumError> {
        self.ensure_live()?;
        self.threads.remove(handle.raw, retire::<B>)?;
        debug!(index = handle.raw.index(), "thread destroyed");
        Ok(())
    }

    /// Block until the thread has exited.
    pub fn thread_wait<T>(&self, handle: ThreadHandle<T>) -> Result<(), MumError> {
        self.ensure_live()?;
        testcancel();

        let (native, shared) = self.threads.with_hold(handle.raw, |slot| {
            (Arc::clone(&slot.native), Arc::clone(&slot.shared))
        })?;

        trace!(index = handle.raw.index(), "waiting for thread");
        B::join_thread(&native)?;
        shared.joined.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Move the thread's published value out. Requires a completed
    /// `thread_wait`; a second call reports `ReturnValueUnavailable`.
    pub fn thread_get_return_value<T: Send + 'static>(
        &self,
        handle: ThreadHandle<T>,
    ) -> Result<T, MumError> {
        self.ensure_live()?;
        self.threads
            .with_hold(handle.raw, |slot| slot.shared.take_value::<T>())?
    }
}
