///
/// Context: the owner of every primitive.
///
/// A `Context` holds one registry per primitive kind. Every operation takes the
/// context by reference and a handle by value; handles are meaningless outside
/// the context that issued them. Share a context across threads with `Arc`.
///
/// Lifecycle: a context is live from `new` until `terminate` (or drop).
/// Terminating sweeps everything still registered: running threads are asked
/// to cancel and released, mutexes and spinlocks are destroyed. Afterwards
/// every operation reports `NotInitialized`.
///

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace, warn};

use crate::backend::{Backend, NativeBackend};
use crate::config::ContextConfig;
use crate::registry::{RawHandle, Registry};
use crate::result::{MumError, PrimitiveKind};
use crate::spinlock::RawSpinlock;
use crate::thread::{ThreadSlot, retire};

pub struct Context<B: Backend = NativeBackend> {
    live: AtomicBool,
    config: ContextConfig,
    pub(crate) threads: Registry<ThreadSlot<B>>,
    pub(crate) mutexes: Registry<Arc<B::Mutex>>,
    pub(crate) spinlocks: Registry<Arc<RawSpinlock>>,
}

impl<B: Backend> Context<B> {
    pub fn new(config: ContextConfig) -> Self {
        debug!(backend = B::NAME, ?config, "context initialized");
        Self {
            live: AtomicBool::new(true),
            threads: Registry::new(
                PrimitiveKind::Thread,
                config.thread_capacity,
                config.shrink_on_destroy,
            ),
            mutexes: Registry::new(
                PrimitiveKind::Mutex,
                config.mutex_capacity,
                config.shrink_on_destroy,
            ),
            spinlocks: Registry::new(
                PrimitiveKind::Spinlock,
                config.spinlock_capacity,
                config.shrink_on_destroy,
            ),
            config,
        }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    pub fn backend_name(&self) -> &'static str {
        B::NAME
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn ensure_live(&self) -> Result<(), MumError> {
        if self.is_live() {
            Ok(())
        } else {
            Err(MumError::NotInitialized)
        }
    }

    /// Confirm a fresh registration still belongs to a live context.
    ///
    /// A create that raced with `terminate` may have inserted after the
    /// sweep; its entry is torn down here instead. If the sweep took it
    /// first, the remove finds nothing and there is nothing left to do.
    pub(crate) fn admit<T>(
        &self,
        registry: &Registry<T>,
        handle: RawHandle,
        teardown: impl FnOnce(T) -> Result<(), (T, MumError)>,
    ) -> Result<RawHandle, MumError> {
        if self.is_live() {
            return Ok(handle);
        }

        match registry.remove(handle, teardown) {
            Ok(()) => trace!(index = handle.index(), "rolled back create after terminate"),
            Err(MumError::InvalidHandle { .. }) => {}
            Err(e) => warn!(error = %e, "failed to roll back create after terminate"),
        }
        Err(MumError::NotInitialized)
    }

    /// Sweep every registered primitive and mark the context dead.
    pub fn terminate(&self) -> Result<(), MumError> {
        if self
            .live
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(MumError::AlreadyTerminated);
        }

        let threads = self.threads.drain();
        let thread_count = threads.len();
        for slot in threads {
            if let Err((_, e)) = retire::<B>(slot) {
                warn!(error = %e, "failed to release thread during terminate");
            }
        }

        let mutexes = self.mutexes.drain();
        let mutex_count = mutexes.len();
        for native in mutexes {
            match Arc::try_unwrap(native) {
                Ok(native) => {
                    // A held mutex comes back and is dropped; the backend keeps
                    // its storage alive for the owner.
                    if let Err((_, e)) = B::destroy_mutex(native) {
                        warn!(error = %e, "mutex still held during terminate");
                    }
                }
                Err(_) => warn!("mutex still in use during terminate; freed by its last user"),
            }
        }

        let spinlock_count = self.spinlocks.drain().len();

        debug!(
            backend = B::NAME,
            threads = thread_count,
            mutexes = mutex_count,
            spinlocks = spinlock_count,
            "context terminated"
        );
        Ok(())
    }

    pub fn active_threads(&self) -> usize {
        self.threads.active_count()
    }

    pub fn active_mutexes(&self) -> usize {
        self.mutexes.active_count()
    }

    pub fn active_spinlocks(&self) -> usize {
        self.spinlocks.active_count()
    }
}

impl<B: Backend> Default for Context<B> {
    fn default() -> Self {
        Self::new(ContextConfig::default())
    }
}

impl<B: Backend> Drop for Context<B> {
    fn drop(&mut self) {
        if self.is_live() {
            let _ = self.terminate();
        }
    }
}
