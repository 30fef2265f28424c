///
/// Portable Backend
///
/// Built on `std::thread` and `std::sync`, so it runs wherever std does; on
/// Windows the threads are native thread handles underneath.
///
/// The mutex records its owner as a weak reference to a per-thread liveness
/// token. The token is a thread-local that is dropped when its thread
/// terminates, so a waiter that finds the owner's token dead takes the mutex
/// over and reports `LockStatus::Abandoned`. Waiters re-check the owner every
/// `OWNER_POLL` since a dying thread cannot signal the condvar.
///

use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{Backend, ThreadEntry};
use crate::result::{LockStatus, MumError, PrimitiveKind};

const OWNER_POLL: Duration = Duration::from_millis(5);

thread_local! {
    static LIVENESS: Arc<()> = Arc::new(());
}

fn liveness_token() -> Weak<()> {
    LIVENESS.with(Arc::downgrade)
}

pub struct PortableBackend;

pub struct PortableThread {
    handle: Mutex<Option<JoinHandle<()>>>,
}

pub struct PortableMutex {
    owner: Mutex<Option<Weak<()>>>,
    released: Condvar,
}

impl Backend for PortableBackend {
    type Thread = PortableThread;
    type Mutex = PortableMutex;

    const NAME: &'static str = "portable";

    fn create_thread(entry: ThreadEntry) -> Result<PortableThread, MumError> {
        thread::Builder::new()
            .spawn(entry)
            .map(|handle| PortableThread {
                handle: Mutex::new(Some(handle)),
            })
            .map_err(|e| MumError::CreateCallFailed {
                kind: PrimitiveKind::Thread,
                os_code: e.raw_os_error(),
            })
    }

    fn join_thread(thread: &PortableThread) -> Result<(), MumError> {
        let mut handle = thread.handle.lock().unwrap_or_else(PoisonError::into_inner);
        match handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| MumError::WaitCallFailed { os_code: None }),
            None => Ok(()),
        }
    }

    fn release_thread(thread: PortableThread) -> Result<(), (PortableThread, MumError)> {
        // Dropping a JoinHandle detaches the thread.
        drop(thread);
        Ok(())
    }

    fn create_mutex() -> Result<PortableMutex, MumError> {
        Ok(PortableMutex {
            owner: Mutex::new(None),
            released: Condvar::new(),
        })
    }

    fn destroy_mutex(mutex: PortableMutex) -> Result<(), (PortableMutex, MumError)> {
        let held = mutex
            .owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|owner| owner.strong_count() > 0);
        if held {
            return Err((
                mutex,
                MumError::DestroyCallFailed {
                    kind: PrimitiveKind::Mutex,
                    os_code: None,
                },
            ));
        }
        Ok(())
    }

    fn lock_mutex(mutex: &PortableMutex) -> Result<LockStatus, MumError> {
        let me = liveness_token();
        let mut owner = mutex.owner.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let status = match owner.as_ref() {
                None => Some(LockStatus::Acquired),
                Some(current) if current.strong_count() == 0 => Some(LockStatus::Abandoned),
                Some(_) => None,
            };
            if let Some(status) = status {
                *owner = Some(me);
                return Ok(status);
            }
            owner = mutex
                .released
                .wait_timeout(owner, OWNER_POLL)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    fn unlock_mutex(mutex: &PortableMutex) -> Result<(), MumError> {
        let me = liveness_token();
        let mut owner = mutex.owner.lock().unwrap_or_else(PoisonError::into_inner);
        let owned = owner.as_ref().is_some_and(|current| current.ptr_eq(&me));
        if !owned {
            return Err(MumError::UnlockCallFailed {
                kind: PrimitiveKind::Mutex,
                os_code: None,
            });
        }
        *owner = None;
        drop(owner);
        mutex.released.notify_one();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::conformance;

    #[test]
    fn test_thread_runs_and_joins() {
        conformance::thread_runs_and_joins::<PortableBackend>();
    }

    #[test]
    fn test_released_thread_keeps_running() {
        conformance::released_thread_keeps_running::<PortableBackend>();
    }

    #[test]
    fn test_mutex_excludes() {
        conformance::mutex_excludes::<PortableBackend>();
    }

    #[test]
    fn test_destroying_locked_mutex_fails() {
        conformance::destroying_locked_mutex_fails::<PortableBackend>();
    }

    #[test]
    fn test_abandoned_mutex_is_reported() {
        conformance::abandoned_mutex_is_reported::<PortableBackend>();
    }

    #[test]
    fn test_unlock_requires_ownership() {
        let mutex = Arc::new(PortableBackend::create_mutex().unwrap());
        assert!(PortableBackend::unlock_mutex(&mutex).is_err());

        PortableBackend::lock_mutex(&mutex).unwrap();
        let other = Arc::clone(&mutex);
        let result = thread::spawn(move || PortableBackend::unlock_mutex(&other))
            .join()
            .unwrap();
        assert!(matches!(result, Err(MumError::UnlockCallFailed { .. })));

        PortableBackend::unlock_mutex(&mutex).unwrap();
    }
}
