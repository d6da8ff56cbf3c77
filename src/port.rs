//! The architecture seam.
//!
//! Everything the executive cannot express portably — the actual context
//! switch, cross-privilege signal trampolines, interrupt-context
//! detection, reschedule IPIs — is delegated to a `Port` implementation
//! supplied by the embedding kernel. Every port callback is invoked with
//! the executive's critical section *released*.

use crate::exec::Executive;
use crate::signal::Signo;
use crate::task::TaskId;

/// Index of a processor core. Core 0 always exists.
pub type CoreId = usize;

/// Architecture services consumed by the executive.
///
/// All methods have no-op defaults so a cooperative, polling port (or a
/// test fixture) only overrides what it needs.
pub trait Port: Sized {
    /// Synchronous handoff to another task. Called by `sem_wait` after
    /// the caller has been moved to the waiter set and a successor has
    /// been elected on its core — with no executive lock held.
    ///
    /// A real port must not return on the blocked task's context until
    /// that task has been woken (its wake reason recorded). A port that
    /// returns early makes `sem_wait` report `WaitNotStarted`.
    fn context_switch(&self, _exec: &Executive<Self>, _core: CoreId) {}

    /// A higher-priority task became runnable on `core`; the port should
    /// arrange a preemption point there (IPI, pended software interrupt).
    fn request_reschedule(&self, _core: CoreId) {}

    /// Cross-privilege signal dispatch: run the user-registered handler
    /// at `entry` in the task's unprivileged context. Only tasks created
    /// with `DeliveryMode::UserTrampoline` ever reach this.
    fn signal_trampoline(&self, _task: TaskId, _entry: usize, _signo: Signo, _payload: u64) {}

    /// True while executing in interrupt context. Selects the reserved
    /// interrupt-context signal-entry pool in `raise`.
    fn in_interrupt(&self) -> bool {
        false
    }
}

/// A port that does nothing. Suitable for single-core cooperative
/// embeddings that drive `reschedule` themselves, and for tests.
#[derive(Debug, Default)]
pub struct NullPort;

impl Port for NullPort {}
