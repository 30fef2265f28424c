///
/// mum demo scenarios
///
/// Each scenario starts `THREAD_COUNT` threads that print
/// `Thread #<id> has started`, do some busy work, then print
/// `Thread #<id> has finished`. The `mutex` and `locking` scenarios hold a lock
/// around that, so one thread's pair of lines is never split by another's.
///
/// Any operation that does not succeed prints
/// `WARNING: <operation> returned <MUM_NAME>` and the scenario carries on.
///

use std::hint;
use std::sync::{Arc, Mutex, PoisonError};

use mum::{Context, MumError, Outcome};
use tracing::info;

pub const THREAD_COUNT: usize = 2;

const BUSY_WORK: usize = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    Threads,
    Mutex,
    Locking,
}

/// Where scenario output lines go.
pub trait Sink: Send + Sync {
    fn line(&self, text: &str);
}

pub struct Stdout;

impl Sink for Stdout {
    fn line(&self, text: &str) {
        println!("{}", text);
    }
}

/// Collects lines in memory.
#[derive(Default)]
pub struct Capture {
    lines: Mutex<Vec<String>>,
}

impl Capture {
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl Sink for Capture {
    fn line(&self, text: &str) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(text.to_string());
    }
}

fn check<T: Outcome>(sink: &dyn Sink, operation: &str, result: &Result<T, MumError>) {
    let code = result.result_code();
    if !code.is_success() {
        sink.line(&format!("WARNING: {} returned {}", operation, code.name()));
    }
}

fn announce(sink: &dyn Sink, id: usize) {
    sink.line(&format!("Thread #{} has started", id));
    for i in 0..BUSY_WORK {
        hint::black_box(i);
    }
    sink.line(&format!("Thread #{} has finished", id));
}

fn spawn_and_join<F>(ctx: &Arc<Context>, sink: &Arc<dyn Sink>, body: F)
where
    F: Fn(&Context, &dyn Sink, usize) + Send + Sync + Copy + 'static,
{
    let handles: Vec<_> = (0..THREAD_COUNT)
        .filter_map(|id| {
            let worker_ctx = Arc::clone(ctx);
            let worker_sink = Arc::clone(sink);
            let result = ctx.thread_create(
                move |id: usize| body(&*worker_ctx, &*worker_sink, id),
                id,
            );
            check(&**sink, "thread_create", &result);
            result.ok()
        })
        .collect();

    for handle in handles {
        check(&**sink, "thread_wait", &ctx.thread_wait(handle));
        check(&**sink, "thread_destroy", &ctx.thread_destroy(handle));
    }
}

pub fn run(scenario: Scenario, sink: Arc<dyn Sink>) {
    let ctx: Arc<Context> = Arc::new(Context::default());
    info!(?scenario, backend = ctx.backend_name(), "running scenario");

    match scenario {
        Scenario::Threads => run_threads(&ctx, &sink),
        Scenario::Mutex => run_mutex(&ctx, &sink),
        Scenario::Locking => run_locking(&ctx, &sink),
    }

    check(&*sink, "terminate", &ctx.terminate());
}

fn run_threads(ctx: &Arc<Context>, sink: &Arc<dyn Sink>) {
    spawn_and_join(ctx, sink, |_, sink, id| announce(sink, id));
}

fn run_mutex(ctx: &Arc<Context>, sink: &Arc<dyn Sink>) {
    let created = ctx.mutex_create();
    check(&**sink, "mutex_create", &created);
    let Ok(mutex) = created else {
        return;
    };

    spawn_and_join(ctx, sink, move |ctx, sink, id| {
        check(sink, "mutex_lock", &ctx.mutex_lock(mutex));
        announce(sink, id);
        check(sink, "mutex_unlock", &ctx.mutex_unlock(mutex));
    });

    check(&**sink, "mutex_destroy", &ctx.mutex_destroy(mutex));
}

fn run_locking(ctx: &Arc<Context>, sink: &Arc<dyn Sink>) {
    let created = ctx.lock_create();
    check(&**sink, "lock_create", &created);
    let Ok(lock) = created else {
        return;
    };

    spawn_and_join(ctx, sink, move |ctx, sink, id| {
        check(sink, "lock_lock", &ctx.lock_lock(lock));
        announce(sink, id);
        check(sink, "lock_unlock", &ctx.lock_unlock(lock));
    });

    check(&**sink, "lock_destroy", &ctx.lock_destroy(lock));
}
