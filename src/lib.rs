// =============================================================================
// keel — Real-Time Task Executive
// =============================================================================
//
// This is the scheduling and synchronization core of a real-time kernel.
// It owns exactly three concerns:
//   1. Ready/pending queue management  (priority scheduler, UP and SMP)
//   2. Counting semaphores             (with priority inheritance)
//   3. Asynchronous signal delivery    (masks, queued actions, unwinding)
//
// WHAT LIVES OUTSIDE:
//   Context switching, interrupt masking, timers, the task registry that
//   owns TCB storage lifetimes, drivers, filesystems — all of it. The
//   `Port` trait is the single seam to the architecture layer, and the
//   external registry drives `task_register` / `task_remove`.
//
// LOCKING MODEL:
//   All executive state sits behind one short, interrupt-disabling
//   critical section (`sync::IrqLock`). That lock is never held across a
//   context switch or a signal-handler invocation — the public entry
//   points in `Executive` enforce the drop-before-call discipline. A
//   separate, recursively-nestable scheduler lock defers ready-queue
//   promotion (but never enqueueing) while any core holds it.
//
// TASK HANDLES:
//   Tasks and semaphores are addressed by generational `(index, gen)`
//   handles into slot arenas. Queues link tasks by handle, not by
//   pointer, so a stale handle is a clean `InvalidObject` error instead
//   of a dangling reference.
// =============================================================================

#![no_std]
#![deny(unsafe_code)]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod config;
pub mod error;
pub mod port;
pub mod sched;
pub mod sem;
pub mod signal;
pub mod sync;
pub mod task;

mod exec;

pub use config::Config;
pub use error::{KernError, Result};
pub use exec::Executive;
pub use port::{CoreId, NullPort, Port};
pub use sched::SchedLockGuard;
pub use sem::{SemId, SemInfo};
pub use signal::{Action, DeliveryMode, Handler, SigSet, Signo, SIG_TERM};
pub use task::{Affinity, TaskId, TaskInfo, TaskSpec, TaskState, WakeReason};
