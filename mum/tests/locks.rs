///
/// # Mutex and spinlock tests
///
/// Mutual exclusion under contention, abandonment reporting, and handle
/// validity around destroy, against every backend the target supports.
///

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use mum::backend::portable::PortableBackend;
#[cfg(unix)]
use mum::backend::posix::PosixBackend;
use mum::{
    Backend, Context, ContextConfig, LockStatus, MumError, Outcome, PrimitiveKind, ResultCode,
};

const THREADS: usize = 6;
const ROUNDS: usize = 400;

fn context<B: Backend>() -> Arc<Context<B>> {
    Arc::new(Context::default())
}

/// Bump a shared counter with a plain load/store pair, relying on `lock` and
/// `unlock` for exclusion.
fn hammer<B: Backend>(
    ctx: &Arc<Context<B>>,
    lock: impl Fn(&Context<B>) + Send + Sync + Copy + 'static,
    unlock: impl Fn(&Context<B>) + Send + Sync + Copy + 'static,
) -> usize {
    let counter = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let worker_ctx = Arc::clone(ctx);
            let counter = Arc::clone(&counter);
            ctx.thread_create(
                move |rounds: usize| {
                    for _ in 0..rounds {
                        lock(&worker_ctx);
                        let seen = counter.load(Ordering::Relaxed);
                        std::hint::spin_loop();
                        counter.store(seen + 1, Ordering::Relaxed);
                        unlock(&worker_ctx);
                    }
                },
                ROUNDS,
            )
            .unwrap()
        })
        .collect();

    for handle in handles {
        ctx.thread_wait(handle).unwrap();
        ctx.thread_destroy(handle).unwrap();
    }
    counter.load(Ordering::SeqCst)
}

fn mutex_counter<B: Backend>() {
    let ctx = context::<B>();
    let m = ctx.mutex_create().unwrap();

    let total = hammer(
        &ctx,
        move |ctx| assert_eq!(ctx.mutex_lock(m).unwrap(), LockStatus::Acquired),
        move |ctx| ctx.mutex_unlock(m).unwrap(),
    );
    assert_eq!(total, THREADS * ROUNDS);
    ctx.mutex_destroy(m).unwrap();
}

fn spinlock_counter<B: Backend>() {
    let ctx = context::<B>();
    let s = ctx.spinlock_create().unwrap();

    let total = hammer(
        &ctx,
        move |ctx| ctx.spinlock_lock(s).unwrap(),
        move |ctx| ctx.spinlock_unlock(s).unwrap(),
    );
    assert_eq!(total, THREADS * ROUNDS);
    ctx.spinlock_destroy(s).unwrap();
}

fn abandoned_mutex<B: Backend>() {
    let ctx = context::<B>();
    let m = ctx.mutex_create().unwrap();

    let worker_ctx = Arc::clone(&ctx);
    let holder = ctx
        .thread_create(
            move |()| {
                worker_ctx.mutex_lock(m).unwrap();
                // Returns while still holding the mutex.
            },
            (),
        )
        .unwrap();
    ctx.thread_wait(holder).unwrap();

    let status = ctx.mutex_lock(m).unwrap();
    assert_eq!(status, LockStatus::Abandoned);
    assert_eq!(status.result_code(), ResultCode::PreviousThreadClosedBeforeLock);

    ctx.mutex_unlock(m).unwrap();
    assert_eq!(ctx.mutex_lock(m).unwrap(), LockStatus::Acquired);
    ctx.mutex_unlock(m).unwrap();
    ctx.mutex_destroy(m).unwrap();
}

fn destroy_locked_mutex<B: Backend>() {
    let ctx = context::<B>();
    let m = ctx.mutex_create().unwrap();
    ctx.mutex_lock(m).unwrap();

    let err = ctx.mutex_destroy(m).unwrap_err();
    assert_eq!(err.code(), ResultCode::DestroyCallFailed);

    // Still registered and usable.
    assert_eq!(ctx.active_mutexes(), 1);
    ctx.mutex_unlock(m).unwrap();
    ctx.mutex_destroy(m).unwrap();

    let invalid = MumError::InvalidHandle {
        kind: PrimitiveKind::Mutex,
    };
    assert_eq!(ctx.mutex_lock(m), Err(invalid.clone()));
    assert_eq!(ctx.mutex_unlock(m), Err(invalid.clone()));
    assert_eq!(ctx.mutex_destroy(m), Err(invalid));
}

fn destroyed_spinlock_is_invalid<B: Backend>() {
    let ctx = context::<B>();
    let s = ctx.spinlock_create().unwrap();
    ctx.spinlock_destroy(s).unwrap();

    let err = ctx.spinlock_lock(s).unwrap_err();
    assert_eq!(err.code(), ResultCode::InvalidSpinlock);
    assert_eq!(ctx.active_spinlocks(), 0);
}

/// Terminating a context whose mutex is still held must not free storage the
/// holder's thread still refers to.
fn terminate_with_held_mutex<B: Backend>() {
    let outer_ctx = context::<B>();
    let inner_ctx = context::<B>();

    let outer = outer_ctx.mutex_create().unwrap();
    let inner = inner_ctx.mutex_create().unwrap();
    outer_ctx.mutex_lock(outer).unwrap();
    inner_ctx.mutex_lock(inner).unwrap();

    inner_ctx.terminate().unwrap();
    assert_eq!(inner_ctx.active_mutexes(), 0);
    drop(inner_ctx);

    let filler: Vec<Box<[u8; 40]>> = (0..1000).map(|_| Box::new([0x41; 40])).collect();

    outer_ctx.mutex_unlock(outer).unwrap();
    assert!(filler.iter().all(|block| block.iter().all(|&b| b == 0x41)));

    assert_eq!(outer_ctx.mutex_lock(outer).unwrap(), LockStatus::Acquired);
    outer_ctx.mutex_unlock(outer).unwrap();
    outer_ctx.mutex_destroy(outer).unwrap();
}

fn registries_grow_past_capacity<B: Backend>() {
    let config = ContextConfig {
        mutex_capacity: 1,
        spinlock_capacity: 1,
        shrink_on_destroy: false,
        ..ContextConfig::default()
    };
    let ctx: Context<B> = Context::new(config);

    let mutexes: Vec<_> = (0..16).map(|_| ctx.mutex_create().unwrap()).collect();
    let spinlocks: Vec<_> = (0..16).map(|_| ctx.spinlock_create().unwrap()).collect();
    assert_eq!(ctx.active_mutexes(), 16);
    assert_eq!(ctx.active_spinlocks(), 16);

    for m in mutexes {
        ctx.mutex_destroy(m).unwrap();
    }
    for s in spinlocks {
        ctx.spinlock_destroy(s).unwrap();
    }
    assert_eq!(ctx.active_mutexes(), 0);
    assert_eq!(ctx.active_spinlocks(), 0);
}

macro_rules! backend_tests {
    ($module:ident, $backend:ty) => {
        mod $module {
            use super::*;

            #[test]
            fn test_mutex_counter() {
                mutex_counter::<$backend>();
            }

            #[test]
            fn test_spinlock_counter() {
                spinlock_counter::<$backend>();
            }

            #[test]
            fn test_destroy_locked_mutex() {
                destroy_locked_mutex::<$backend>();
            }

            #[test]
            fn test_destroyed_spinlock_is_invalid() {
                destroyed_spinlock_is_invalid::<$backend>();
            }

            #[test]
            fn test_terminate_with_held_mutex() {
                terminate_with_held_mutex::<$backend>();
            }

            #[test]
            fn test_registries_grow_past_capacity() {
                registries_grow_past_capacity::<$backend>();
            }
        }
    };
}

backend_tests!(portable, PortableBackend);

#[cfg(unix)]
backend_tests!(posix, PosixBackend);

#[test]
fn test_abandoned_mutex_portable() {
    abandoned_mutex::<PortableBackend>();
}

// Robust mutexes are what report abandonment on POSIX.
#[cfg(target_os = "linux")]
#[test]
fn test_abandoned_mutex_posix() {
    abandoned_mutex::<PosixBackend>();
}
