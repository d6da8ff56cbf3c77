//! Executive status codes.
//!
//! Every fallible operation returns one of these synchronously — callers
//! must be able to tell "acquired" from "did not acquire, and why".
//! Invariant violations (a core with no runnable task, a corrupted queue
//! link) are *not* errors: they halt with a diagnostic, because
//! continuing would risk running two tasks' logic on one stack.

use core::fmt;

/// Status returned by executive operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernError {
    /// The handle refers to an uninitialized, destroyed, or reused slot.
    InvalidObject,
    /// A blocking wait was cancelled by signal delivery.
    Interrupted,
    /// A blocking wait was cancelled by its timeout.
    TimedOut,
    /// The object is in use (destroying a semaphore with waiters,
    /// reclaiming a task that is still linked into a queue).
    Busy,
    /// A cancellation point was reached before the wait ever blocked.
    WaitNotStarted,
    /// The fixed signal-entry pool for the requested class is empty.
    PoolExhausted,
}

impl fmt::Display for KernError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            KernError::InvalidObject => "invalid object handle",
            KernError::Interrupted => "wait interrupted by signal",
            KernError::TimedOut => "wait timed out",
            KernError::Busy => "object busy",
            KernError::WaitNotStarted => "wait not started",
            KernError::PoolExhausted => "signal entry pool exhausted",
        };
        f.write_str(msg)
    }
}

/// Result alias used throughout the executive.
pub type Result<T> = core::result::Result<T, KernError>;
