//!
//! mum - Cross-platform threads, mutexes and spinlocks
//!
//! A thin, platform-neutral handle layer over native concurrency primitives.
//! A [`Context`] owns every primitive; operations take the context by
//! reference and a small `Copy` handle, and return `Result<_, MumError>`.
//! Each error maps to a stable [`ResultCode`].
//!
//! Modules:
//! - `result` - result codes, `MumError`, `LockStatus`, the global result sink
//! - `config` - `ContextConfig`, loadable from TOML
//! - `backend` - the `Backend` trait, `PosixBackend`, `PortableBackend`
//! - `context` - `Context` lifecycle and diagnostics
//! - `thread`, `mutex`, `spinlock`, `lock` - the primitives
//! - `global` - an optional process-wide context with free-function shorthands
//!
//! ```rust,ignore
//! use mum::{Context, LockStatus};
//!
//! let ctx: Context = Context::default();
//! let m = ctx.mutex_create()?;
//! assert_eq!(ctx.mutex_lock(m)?, LockStatus::Acquired);
//! ctx.mutex_unlock(m)?;
//! ctx.mutex_destroy(m)?;
//! ```
//!

pub mod backend;
pub mod config;
pub mod context;
pub mod global;
pub mod lock;
pub mod mutex;
mod registry;
pub mod result;
pub mod spinlock;
pub mod thread;

pub use backend::{Backend, NativeBackend};
pub use config::{ConfigError, ContextConfig};
pub use context::Context;
pub use lock::LockHandle;
pub use mutex::MutexHandle;
pub use registry::RawHandle;
#[cfg(feature = "names")]
pub use result::result_get_name;
pub use result::{
    LockStatus, MumError, Outcome, PrimitiveKind, ResultCell, ResultCode, global_result,
    set_global_result,
};
pub use spinlock::{RawSpinlock, SpinlockHandle};
pub use thread::ThreadHandle;
