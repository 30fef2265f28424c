///
/// POSIX Threads Backend
///
/// Threads are raw `pthread_create` threads running a boxed entry closure.
/// Mutexes are `pthread_mutex_t` values boxed so their address never changes.
///
/// On Linux mutexes are created robust: when an owner terminates while holding
/// one, the next `pthread_mutex_lock` gets `EOWNERDEAD`, the mutex is marked
/// consistent again and the lock is reported as `LockStatus::Abandoned`.
///
/// A locked robust mutex is linked into its owner's robust list through its
/// own storage. A mutex dropped while held is therefore leaked, never freed.
///

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr;
use std::sync::{Mutex, PoisonError};

use tracing::warn;

use super::{Backend, ThreadEntry};
use crate::result::{LockStatus, MumError, PrimitiveKind};

pub struct PosixBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinState {
    Joinable,
    Joined,
    Detached,
}

pub struct PosixThread {
    id: libc::pthread_t,
    state: Mutex<JoinState>,
}

// pthread_t is an opaque id, usable from any thread.
unsafe impl Send for PosixThread {}
unsafe impl Sync for PosixThread {}

impl Drop for PosixThread {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if *state == JoinState::Joinable {
            unsafe {
                libc::pthread_detach(self.id);
            }
        }
    }
}

pub struct PosixMutex {
    raw: ManuallyDrop<Box<UnsafeCell<libc::pthread_mutex_t>>>,
    live: bool,
}

// All access to the inner pthread_mutex_t goes through pthread calls.
unsafe impl Send for PosixMutex {}
unsafe impl Sync for PosixMutex {}

impl PosixMutex {
    fn raw(&self) -> *mut libc::pthread_mutex_t {
        self.raw.get()
    }

    /// Destroy the native mutex unless someone holds it.
    ///
    /// Robust mutexes skip the EBUSY check in pthread_mutex_destroy, so the
    /// mutex is tried with trylock first on every platform.
    fn teardown(&mut self) -> Result<(), i32> {
        match unsafe { libc::pthread_mutex_trylock(self.raw()) } {
            0 => {}
            #[cfg(target_os = "linux")]
            libc::EOWNERDEAD => unsafe {
                libc::pthread_mutex_consistent(self.raw());
            },
            rc => return Err(rc),
        }

        let rc = unsafe {
            libc::pthread_mutex_unlock(self.raw());
            libc::pthread_mutex_destroy(self.raw())
        };
        if rc != 0 {
            return Err(rc);
        }
        self.live = false;
        Ok(())
    }
}

impl Drop for PosixMutex {
    fn drop(&mut self) {
        if self.live {
            if let Err(rc) = self.teardown() {
                warn!(os_code = rc, "mutex dropped while held; leaking its storage");
                return;
            }
        }
        unsafe { ManuallyDrop::drop(&mut self.raw) }
    }
}

extern "C" fn thread_start(arg: *mut c_void) -> *mut c_void {
    let entry = unsafe { Box::from_raw(arg as *mut ThreadEntry) };
    entry();
    ptr::null_mut()
}

impl Backend for PosixBackend {
    type Thread = PosixThread;
    type Mutex = PosixMutex;

    const NAME: &'static str = "posix";

    fn create_thread(entry: ThreadEntry) -> Result<PosixThread, MumError> {
        let arg = Box::into_raw(Box::new(entry));
        let mut id = MaybeUninit::<libc::pthread_t>::uninit();

        let rc = unsafe {
            libc::pthread_create(id.as_mut_ptr(), ptr::null(), thread_start, arg as *mut c_void)
        };
        if rc != 0 {
            // The thread never started, so the entry is still ours.
            drop(unsafe { Box::from_raw(arg) });
            return Err(MumError::CreateCallFailed {
                kind: PrimitiveKind::Thread,
                os_code: Some(rc),
            });
        }

        Ok(PosixThread {
            id: unsafe { id.assume_init() },
            state: Mutex::new(JoinState::Joinable),
        })
    }

    fn join_thread(thread: &PosixThread) -> Result<(), MumError> {
        let mut state = thread.state.lock().unwrap_or_else(PoisonError::into_inner);
        match *state {
            JoinState::Joined => return Ok(()),
            JoinState::Detached => {
                return Err(MumError::WaitCallFailed {
                    os_code: Some(libc::EINVAL),
                });
            }
            JoinState::Joinable => {}
        }

        let rc = unsafe { libc::pthread_join(thread.id, ptr::null_mut()) };
        if rc != 0 {
            return Err(MumError::WaitCallFailed { os_code: Some(rc) });
        }
        *state = JoinState::Joined;
        Ok(())
    }

    fn release_thread(mut thread: PosixThread) -> Result<(), (PosixThread, MumError)> {
        let joinable = *thread.state.get_mut().unwrap_or_else(PoisonError::into_inner)
            == JoinState::Joinable;
        if joinable {
            let rc = unsafe { libc::pthread_detach(thread.id) };
            if rc != 0 {
                return Err((
                    thread,
                    MumError::DestroyCallFailed {
                        kind: PrimitiveKind::Thread,
                        os_code: Some(rc),
                    },
                ));
            }
            *thread.state.get_mut().unwrap_or_else(PoisonError::into_inner) = JoinState::Detached;
        }
        Ok(())
    }

    fn create_mutex() -> Result<PosixMutex, MumError> {
        let failed = |rc| MumError::CreateCallFailed {
            kind: PrimitiveKind::Mutex,
            os_code: Some(rc),
        };
        let raw = Box::new(UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER));
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();

        unsafe {
            let rc = libc::pthread_mutexattr_init(attr.as_mut_ptr());
            if rc != 0 {
                return Err(failed(rc));
            }

            #[cfg(target_os = "linux")]
            {
                let rc = libc::pthread_mutexattr_setrobust(
                    attr.as_mut_ptr(),
                    libc::PTHREAD_MUTEX_ROBUST,
                );
                if rc != 0 {
                    libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
                    return Err(failed(rc));
                }
            }

            let rc = libc::pthread_mutex_init(raw.get(), attr.as_ptr());
            libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
            if rc != 0 {
                return Err(failed(rc));
            }
        }

        Ok(PosixMutex {
            raw: ManuallyDrop::new(raw),
            live: true,
        })
    }

    fn destroy_mutex(mut mutex: PosixMutex) -> Result<(), (PosixMutex, MumError)> {
        match mutex.teardown() {
            Ok(()) => Ok(()),
            Err(rc) => Err((
                mutex,
                MumError::DestroyCallFailed {
                    kind: PrimitiveKind::Mutex,
                    os_code: Some(rc),
                },
            )),
        }
    }

    fn lock_mutex(mutex: &PosixMutex) -> Result<LockStatus, MumError> {
        let failed = |rc| MumError::LockCallFailed {
            kind: PrimitiveKind::Mutex,
            os_code: Some(rc),
        };

        match unsafe { libc::pthread_mutex_lock(mutex.raw()) } {
            0 => Ok(LockStatus::Acquired),
            #[cfg(target_os = "linux")]
            libc::EOWNERDEAD => {
                let rc = unsafe { libc::pthread_mutex_consistent(mutex.raw()) };
                if rc != 0 {
                    unsafe {
                        libc::pthread_mutex_unlock(mutex.raw());
                    }
                    return Err(failed(rc));
                }
                Ok(LockStatus::Abandoned)
            }
            rc => Err(failed(rc)),
        }
    }

    fn unlock_mutex(mutex: &PosixMutex) -> Result<(), MumError> {
        let rc = unsafe { libc::pthread_mutex_unlock(mutex.raw()) };
        if rc != 0 {
            return Err(MumError::UnlockCallFailed {
                kind: PrimitiveKind::Mutex,
                os_code: Some(rc),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::conformance;

    #[test]
    fn test_thread_runs_and_joins() {
        conformance::thread_runs_and_joins::<PosixBackend>();
    }

    #[test]
    fn test_released_thread_keeps_running() {
        conformance::released_thread_keeps_running::<PosixBackend>();
    }

    #[test]
    fn test_mutex_excludes() {
        conformance::mutex_excludes::<PosixBackend>();
    }

    #[test]
    fn test_destroying_locked_mutex_fails() {
        conformance::destroying_locked_mutex_fails::<PosixBackend>();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_abandoned_mutex_is_reported() {
        conformance::abandoned_mutex_is_reported::<PosixBackend>();
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_dropping_held_mutex_leaves_robust_list_intact() {
        let outer = PosixBackend::create_mutex().unwrap();
        let inner = PosixBackend::create_mutex().unwrap();
        PosixBackend::lock_mutex(&outer).unwrap();
        PosixBackend::lock_mutex(&inner).unwrap();

        let (inner, err) = PosixBackend::destroy_mutex(inner).unwrap_err();
        assert!(matches!(err, MumError::DestroyCallFailed { .. }));
        drop(inner);

        // Unlinking `outer` from the robust list writes into its neighbour,
        // which is `inner`. Refill the heap so a freed `inner` would be reused.
        let filler: Vec<Box<[u8; 40]>> = (0..1000).map(|_| Box::new([0x41; 40])).collect();
        PosixBackend::unlock_mutex(&outer).unwrap();
        assert!(filler.iter().all(|block| block.iter().all(|&b| b == 0x41)));

        PosixBackend::destroy_mutex(outer).map_err(|(_, e)| e).unwrap();
    }

    #[test]
    fn test_dropping_unlocked_mutex_destroys_it() {
        let mutex = PosixBackend::create_mutex().unwrap();
        PosixBackend::lock_mutex(&mutex).unwrap();
        PosixBackend::unlock_mutex(&mutex).unwrap();
        drop(mutex);
    }

    #[test]
    fn test_unlock_by_non_owner_fails() {
        let mutex = std::sync::Arc::new(PosixBackend::create_mutex().unwrap());
        PosixBackend::lock_mutex(&mutex).unwrap();

        // Robust mutexes check ownership on unlock.
        #[cfg(target_os = "linux")]
        {
            let other = std::sync::Arc::clone(&mutex);
            let result = std::thread::spawn(move || PosixBackend::unlock_mutex(&other))
                .join()
                .unwrap();
            assert!(matches!(result, Err(MumError::UnlockCallFailed { .. })));
        }

        PosixBackend::unlock_mutex(&mutex).unwrap();
    }
}
