//! The Task Control Block — the scheduler's view of a task.

use bitflags::bitflags;

use crate::port::CoreId;
use crate::sem::SemId;
use crate::signal::{DeliveryMode, SigState};
use crate::task::TaskId;

// ── Scheduling state ────────────────────────────────────────────

/// The possible states of a task, from the executive's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Eligible to run; linked on the pending list or a core's ready list.
    Ready,
    /// Assigned to a core and executing (or next to execute there).
    Running,
    /// Blocked in `sem_wait`; linked on that semaphore's waiter set.
    WaitingSemaphore,
    /// Unwound from a blocked wait by a signal; runnable again, but its
    /// next dispatch point must drain the pending-action queue first.
    PendingSignalAction,
}

/// Why a blocked wait resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Woken by `sem_post`; the unit was transferred to the waiter.
    Normal,
    /// Unwound by signal delivery; the wait was rolled back.
    Interrupted,
    /// Unwound by the external timer; the wait was rolled back.
    TimedOut,
}

// ── CPU affinity ────────────────────────────────────────────────

bitflags! {
    /// Set of cores a task may be assigned to. Bit `n` permits core `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Affinity: u32 {
        /// No restriction — any core may run the task.
        const ANY = u32::MAX;
    }
}

impl Affinity {
    /// Affinity pinning the task to a single core.
    pub fn only(core: CoreId) -> Self {
        Affinity::from_bits_retain(1 << core)
    }

    /// Whether the task may be assigned to `core`.
    pub fn allows(&self, core: CoreId) -> bool {
        self.bits() & (1 << core) != 0
    }
}

// ── Queue linkage ───────────────────────────────────────────────

/// Which queue a task is currently linked on.
///
/// A task is a member of exactly one queue at a time (or none while it
/// is the running task of a core). The tag is checked on every unlink;
/// a mismatch is queue corruption and halts the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Queue {
    /// Not linked anywhere.
    None,
    /// The global pending list (admitted, not yet assigned to a core).
    Pending,
    /// A core's ready list.
    Ready(CoreId),
    /// A semaphore's waiter set.
    Waiters(SemId),
}

// ── TCB ─────────────────────────────────────────────────────────

/// Parameters for registering a task with the executive.
#[derive(Debug, Clone, Copy)]
pub struct TaskSpec {
    /// External numeric identity (the registry's id, e.g. a pid).
    pub tid: u64,
    /// Base priority; higher numbers run first.
    pub priority: u8,
    /// Cores the task may be assigned to.
    pub affinity: Affinity,
    /// How signal handlers are invoked for this task. Fixed at
    /// creation — the dispatch path never re-decides per signal.
    pub delivery: DeliveryMode,
    /// `Some(core)` marks this as `core`'s idle task: the
    /// non-preemptible floor that must always be runnable there.
    pub idle_on: Option<CoreId>,
}

/// The executive's per-task record.
#[derive(Debug)]
pub struct Tcb {
    /// External numeric identity.
    pub tid: u64,
    /// Assigned priority, never changed by the executive.
    pub base_prio: u8,
    /// Current effective priority: base plus any inheritance boost.
    pub eff_prio: u8,
    /// Cores this task may run on.
    pub affinity: Affinity,
    /// Scheduling state.
    pub state: TaskState,
    /// True for a core's idle task.
    pub is_idle: bool,
    /// Set by signal-driven termination; an exited task is fully
    /// unlinked and ignored until the registry reclaims it.
    pub exited: bool,
    /// Semaphore this task is blocked on; valid iff state is
    /// `WaitingSemaphore`.
    pub waiting_on: Option<SemId>,
    /// Outcome of the last wait, consumed by `sem_wait` on resume.
    pub wake_reason: Option<WakeReason>,
    /// Per-task signal machinery.
    pub(crate) sig: SigState,
    /// Queue membership tag.
    pub(crate) queue: Queue,
    /// Intrusive doubly-linked list links (arena handles, not pointers).
    pub(crate) prev: Option<TaskId>,
    pub(crate) next: Option<TaskId>,
}

impl Tcb {
    pub(crate) fn new(spec: &TaskSpec) -> Self {
        Self {
            tid: spec.tid,
            base_prio: spec.priority,
            eff_prio: spec.priority,
            affinity: spec.affinity,
            state: TaskState::Ready,
            is_idle: spec.idle_on.is_some(),
            exited: false,
            waiting_on: None,
            wake_reason: None,
            sig: SigState::new(spec.delivery),
            queue: Queue::None,
            prev: None,
            next: None,
        }
    }

    /// Whether the task is linked on any queue.
    pub(crate) fn is_linked(&self) -> bool {
        self.queue != Queue::None
    }
}

// ── Introspection ───────────────────────────────────────────────

/// Snapshot of a task's scheduling state, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskInfo {
    pub tid: u64,
    pub state: TaskState,
    pub base_prio: u8,
    pub eff_prio: u8,
    pub queue: Queue,
    pub exited: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affinity_only_permits_one_core() {
        let a = Affinity::only(1);
        assert!(!a.allows(0));
        assert!(a.allows(1));
        assert!(!a.allows(2));
        assert!(Affinity::ANY.allows(7));
    }
}
