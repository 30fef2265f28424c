///
/// Result codes and errors shared by every mum operation.
///
/// Operations return `Result<_, MumError>`. Each error maps to exactly one
/// `ResultCode`, the stable small-integer form used for logging, for the
/// optional `MUM_*` name table, and for the process-wide result sink that the
/// `global` shorthands write into.
///

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;

/// The three primitive kinds a context manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Thread,
    Mutex,
    Spinlock,
}

impl fmt::Display for PrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrimitiveKind::Thread => f.write_str("thread"),
            PrimitiveKind::Mutex => f.write_str("mutex"),
            PrimitiveKind::Spinlock => f.write_str("spinlock"),
        }
    }
}

/// Outcome code of an operation. `Success` is always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ResultCode {
    Success = 0,
    Failure,
    AllocationFailed,
    NotInitialized,
    AlreadyInitialized,
    AlreadyTerminated,
    CreateCallFailed,
    DestroyCallFailed,
    LockCallFailed,
    UnlockCallFailed,
    WaitCallFailed,
    InvalidThread,
    InvalidMutex,
    InvalidSpinlock,
    PreviousThreadClosedBeforeLock,
    ThreadTimedOut,
    ReturnValueUnavailable,
    ReturnTypeMismatch,
    ThreadPanicked,
}

impl ResultCode {
    pub const ALL: [ResultCode; 19] = [
        ResultCode::Success,
        ResultCode::Failure,
        ResultCode::AllocationFailed,
        ResultCode::NotInitialized,
        ResultCode::AlreadyInitialized,
        ResultCode::AlreadyTerminated,
        ResultCode::CreateCallFailed,
        ResultCode::DestroyCallFailed,
        ResultCode::LockCallFailed,
        ResultCode::UnlockCallFailed,
        ResultCode::WaitCallFailed,
        ResultCode::InvalidThread,
        ResultCode::InvalidMutex,
        ResultCode::InvalidSpinlock,
        ResultCode::PreviousThreadClosedBeforeLock,
        ResultCode::ThreadTimedOut,
        ResultCode::ReturnValueUnavailable,
        ResultCode::ReturnTypeMismatch,
        ResultCode::ThreadPanicked,
    ];

    pub fn from_raw(raw: u32) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn as_raw(self) -> u32 {
        self as u32
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }

    #[cfg(feature = "names")]
    pub fn name(self) -> &'static str {
        match self {
            ResultCode::Success => "MUM_SUCCESS",
            ResultCode::Failure => "MUM_FAILURE",
            ResultCode::AllocationFailed => "MUM_ALLOCATION_FAILED",
            ResultCode::NotInitialized => "MUM_NOT_YET_INITIALIZED",
            ResultCode::AlreadyInitialized => "MUM_ALREADY_INITIALIZED",
            ResultCode::AlreadyTerminated => "MUM_ALREADY_TERMINATED",
            ResultCode::CreateCallFailed => "MUM_CREATE_CALL_FAILED",
            ResultCode::DestroyCallFailed => "MUM_DESTROY_CALL_FAILED",
            ResultCode::LockCallFailed => "MUM_LOCK_CALL_FAILED",
            ResultCode::UnlockCallFailed => "MUM_UNLOCK_CALL_FAILED",
            ResultCode::WaitCallFailed => "MUM_WAIT_CALL_FAILED",
            ResultCode::InvalidThread => "MUM_INVALID_THREAD",
            ResultCode::InvalidMutex => "MUM_INVALID_MUTEX",
            ResultCode::InvalidSpinlock => "MUM_INVALID_SPINLOCK",
            ResultCode::PreviousThreadClosedBeforeLock => "MUM_PREVIOUS_THREAD_CLOSED_BEFORE_LOCK",
            ResultCode::ThreadTimedOut => "MUM_THREAD_TIMED_OUT",
            ResultCode::ReturnValueUnavailable => "MUM_RETURN_VALUE_UNAVAILABLE",
            ResultCode::ReturnTypeMismatch => "MUM_RETURN_TYPE_MISMATCH",
            ResultCode::ThreadPanicked => "MUM_THREAD_PANICKED",
        }
    }
}

/// Name of a raw result code, `"MUM_UNKNOWN"` for values outside the table.
#[cfg(feature = "names")]
pub fn result_get_name(raw: u32) -> &'static str {
    match ResultCode::from_raw(raw) {
        Some(code) => code.name(),
        None => "MUM_UNKNOWN",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MumError {
    #[error("Operation failed: {reason}")]
    Failure { reason: String },

    #[error("Failed to allocate a {kind} slot")]
    AllocationFailed { kind: PrimitiveKind },

    #[error("No live context; initialize one first")]
    NotInitialized,

    #[error("A context is already initialized")]
    AlreadyInitialized,

    #[error("The context has already been terminated")]
    AlreadyTerminated,

    #[error("Native {kind} create call failed{}", format_os_code(.os_code))]
    CreateCallFailed { kind: PrimitiveKind, os_code: Option<i32> },

    #[error("Native {kind} destroy call failed{}", format_os_code(.os_code))]
    DestroyCallFailed { kind: PrimitiveKind, os_code: Option<i32> },

    #[error("Native {kind} lock call failed{}", format_os_code(.os_code))]
    LockCallFailed { kind: PrimitiveKind, os_code: Option<i32> },

    #[error("Native {kind} unlock call failed{}", format_os_code(.os_code))]
    UnlockCallFailed { kind: PrimitiveKind, os_code: Option<i32> },

    #[error("Native thread wait call failed{}", format_os_code(.os_code))]
    WaitCallFailed { os_code: Option<i32> },

    #[error("Invalid {kind} handle")]
    InvalidHandle { kind: PrimitiveKind },

    #[error("Thread wait timed out")]
    TimedOut,

    #[error("Thread return value is unavailable (not joined yet or already taken)")]
    ReturnValueUnavailable,

    #[error("Thread exited with a value of a different type than {expected}")]
    ReturnTypeMismatch { expected: &'static str },

    #[error("Thread panicked: {message}")]
    ThreadPanicked { message: String },
}

fn format_os_code(os_code: &Option<i32>) -> String {
    match os_code {
        Some(code) => format!(" (os error {})", code),
        None => String::new(),
    }
}

impl MumError {
    pub fn code(&self) -> ResultCode {
        match self {
            MumError::Failure { .. } => ResultCode::Failure,
            MumError::AllocationFailed { .. } => ResultCode::AllocationFailed,
            MumError::NotInitialized => ResultCode::NotInitialized,
            MumError::AlreadyInitialized => ResultCode::AlreadyInitialized,
            MumError::AlreadyTerminated => ResultCode::AlreadyTerminated,
            MumError::CreateCallFailed { .. } => ResultCode::CreateCallFailed,
            MumError::DestroyCallFailed { .. } => ResultCode::DestroyCallFailed,
            MumError::LockCallFailed { .. } => ResultCode::LockCallFailed,
            MumError::UnlockCallFailed { .. } => ResultCode::UnlockCallFailed,
            MumError::WaitCallFailed { .. } => ResultCode::WaitCallFailed,
            MumError::InvalidHandle { kind } => match kind {
                PrimitiveKind::Thread => ResultCode::InvalidThread,
                PrimitiveKind::Mutex => ResultCode::InvalidMutex,
                PrimitiveKind::Spinlock => ResultCode::InvalidSpinlock,
            },
            MumError::TimedOut => ResultCode::ThreadTimedOut,
            MumError::ReturnValueUnavailable => ResultCode::ReturnValueUnavailable,
            MumError::ReturnTypeMismatch { .. } => ResultCode::ReturnTypeMismatch,
            MumError::ThreadPanicked { .. } => ResultCode::ThreadPanicked,
        }
    }
}

/// How a successful mutex acquisition came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Acquired,
    /// The previous owner terminated while holding the lock. The caller owns it
    /// now, but whatever it protects may be inconsistent.
    Abandoned,
}

/// Anything an operation can hand back that has a result code of its own.
pub trait Outcome {
    fn result_code(&self) -> ResultCode;
}

impl Outcome for () {
    fn result_code(&self) -> ResultCode {
        ResultCode::Success
    }
}

impl Outcome for LockStatus {
    fn result_code(&self) -> ResultCode {
        match self {
            LockStatus::Acquired => ResultCode::Success,
            LockStatus::Abandoned => ResultCode::PreviousThreadClosedBeforeLock,
        }
    }
}

impl<T: Outcome> Outcome for Result<T, MumError> {
    fn result_code(&self) -> ResultCode {
        match self {
            Ok(value) => value.result_code(),
            Err(e) => e.code(),
        }
    }
}

/// A shareable slot holding the most recent result code written into it.
#[derive(Debug, Default)]
pub struct ResultCell(AtomicU32);

impl ResultCell {
    pub const fn new() -> Self {
        Self(AtomicU32::new(ResultCode::Success as u32))
    }

    pub fn get(&self) -> ResultCode {
        ResultCode::from_raw(self.0.load(Ordering::SeqCst)).unwrap_or(ResultCode::Failure)
    }

    pub fn set(&self, code: ResultCode) {
        self.0.store(code.as_raw(), Ordering::SeqCst);
    }
}

static GLOBAL_RESULT: RwLock<Option<Arc<ResultCell>>> = RwLock::new(None);

/// Install (or clear, with `None`) the cell the `global` shorthands report into.
pub fn set_global_result(cell: Option<Arc<ResultCell>>) {
    *GLOBAL_RESULT.write().unwrap_or_else(PoisonError::into_inner) = cell;
}

pub fn global_result() -> Option<Arc<ResultCell>> {
    GLOBAL_RESULT.read().unwrap_or_else(PoisonError::into_inner).clone()
}

pub(crate) fn record(code: ResultCode) {
    if let Some(cell) = GLOBAL_RESULT.read().unwrap_or_else(PoisonError::into_inner).as_ref() {
        cell.set(code);
    }
}

/// Run `op` with the global sink reset to `Success` first, then store its outcome.
pub(crate) fn reported<T: Outcome>(op: impl FnOnce() -> Result<T, MumError>) -> Result<T, MumError> {
    record(ResultCode::Success);
    let result = op();
    record(result.result_code());
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_is_zero() {
        assert_eq!(ResultCode::Success.as_raw(), 0);
        assert_eq!(ResultCode::from_raw(0), Some(ResultCode::Success));
        assert!(ResultCode::Success.is_success());
    }

    #[test]
    fn test_raw_round_trip_covers_table() {
        for (index, code) in ResultCode::ALL.iter().enumerate() {
            assert_eq!(code.as_raw() as usize, index);
            assert_eq!(ResultCode::from_raw(code.as_raw()), Some(*code));
        }
        assert_eq!(ResultCode::from_raw(ResultCode::ALL.len() as u32), None);
    }

    #[cfg(feature = "names")]
    #[test]
    fn test_names_are_stable_and_total() {
        assert_eq!(ResultCode::Success.name(), "MUM_SUCCESS");
        assert_eq!(ResultCode::InvalidMutex.name(), "MUM_INVALID_MUTEX");
        assert_eq!(
            ResultCode::PreviousThreadClosedBeforeLock.name(),
            "MUM_PREVIOUS_THREAD_CLOSED_BEFORE_LOCK"
        );
        assert_eq!(result_get_name(9999), "MUM_UNKNOWN");

        let mut names: Vec<_> = ResultCode::ALL.iter().map(|c| c.name()).collect();
        names.sort();
        names.dedup();
        assert_eq!(names.len(), ResultCode::ALL.len());
    }

    #[test]
    fn test_invalid_handle_code_per_kind() {
        let code = |kind| MumError::InvalidHandle { kind }.code();
        assert_eq!(code(PrimitiveKind::Thread), ResultCode::InvalidThread);
        assert_eq!(code(PrimitiveKind::Mutex), ResultCode::InvalidMutex);
        assert_eq!(code(PrimitiveKind::Spinlock), ResultCode::InvalidSpinlock);
    }

    #[test]
    fn test_error_display_messages() {
        let err = MumError::CreateCallFailed {
            kind: PrimitiveKind::Thread,
            os_code: Some(11),
        };
        assert!(err.to_string().contains("thread create call failed"));
        assert!(err.to_string().contains("os error 11"));

        let err = MumError::DestroyCallFailed {
            kind: PrimitiveKind::Mutex,
            os_code: None,
        };
        assert_eq!(err.to_string(), "Native mutex destroy call failed");

        let err = MumError::InvalidHandle {
            kind: PrimitiveKind::Spinlock,
        };
        assert!(err.to_string().contains("Invalid spinlock handle"));

        let err = MumError::ThreadPanicked {
            message: "boom".to_string(),
        };
        assert!(err.to_string().contains("boom"));
    }

    #[test]
    fn test_outcome_codes() {
        let ok: Result<LockStatus, MumError> = Ok(LockStatus::Abandoned);
        assert_eq!(ok.result_code(), ResultCode::PreviousThreadClosedBeforeLock);

        let ok: Result<(), MumError> = Ok(());
        assert_eq!(ok.result_code(), ResultCode::Success);

        let err: Result<(), MumError> = Err(MumError::NotInitialized);
        assert_eq!(err.result_code(), ResultCode::NotInitialized);
    }

    #[test]
    fn test_result_cell() {
        let cell = ResultCell::new();
        assert_eq!(cell.get(), ResultCode::Success);
        cell.set(ResultCode::LockCallFailed);
        assert_eq!(cell.get(), ResultCode::LockCallFailed);
    }
}
