//! Task control blocks and the registry boundary.
//!
//! TCB storage is *owned* by an external task registry; the executive
//! holds the scheduler's view of each task in a generational slot arena
//! and hands the registry a stable `TaskId`. The registry must call
//! `task_remove` only once the task is fully unlinked — a still-linked
//! task is refused with `Busy`.

mod table;
mod tcb;

pub use table::TaskTable;
pub use tcb::{Affinity, Queue, TaskInfo, TaskSpec, TaskState, Tcb, WakeReason};

/// Stable, generation-guarded handle to a task's control block.
///
/// Queues link tasks by handle, never by reference, so a handle that
/// outlives its task is rejected as `InvalidObject` instead of dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId {
    pub(crate) index: u32,
    pub(crate) gen: u32,
}
