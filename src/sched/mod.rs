//! Ready/pending queue management.
//!
//! One priority-ordered *pending* list holds tasks that are admitted but
//! not yet assigned to a core; each core owns a priority-ordered *ready*
//! list plus a `current` slot for the task it is executing. `merge`
//! moves pending tasks into per-core assignment — preempting where the
//! arrival outranks a running task — and reports which cores need a
//! reschedule.
//!
//! The scheduler lock defers promotion (never enqueueing): while any
//! core holds it, `merge` parks arrivals on ready lists without touching
//! `current`, and the deferred work is finished when the last guard
//! drops.

mod list;

pub(crate) use list::TaskList;

use alloc::vec::Vec;

use crate::exec::Executive;
use crate::port::{CoreId, Port};
use crate::task::{Queue, TaskId, TaskState, TaskTable};

/// Bitmask of cores that need a preemption point.
pub(crate) type ReschedMask = u32;

pub(crate) struct SchedState {
    /// Admitted tasks not yet assigned to a core, priority-ordered.
    pub pending: TaskList,
    /// Per-core ready lists. The core's idle task is always at the tail.
    pub ready: Vec<TaskList>,
    /// The task each core is executing. Not linked on any list.
    pub current: Vec<Option<TaskId>>,
    /// Scheduler-lock nesting depth, across all cores.
    lock_nest: u32,
    /// A merge was requested (or degraded) while the lock was held.
    deferred: bool,
}

impl SchedState {
    pub(crate) fn new(cores: usize) -> Self {
        let mut ready = Vec::with_capacity(cores);
        let mut current = Vec::with_capacity(cores);
        for _ in 0..cores {
            ready.push(TaskList::new());
            current.push(None);
        }
        Self {
            pending: TaskList::new(),
            ready,
            current,
            lock_nest: 0,
            deferred: false,
        }
    }

    fn cores(&self) -> usize {
        self.ready.len()
    }

    /// Admit a task to the pending list. Permitted even while the
    /// scheduler lock is held — only promotion is deferred, not
    /// enqueueing.
    pub(crate) fn enqueue_pending(&mut self, tasks: &mut TaskTable, id: TaskId) {
        if tasks.tcb(id).state != TaskState::PendingSignalAction {
            tasks.tcb_mut(id).state = TaskState::Ready;
        }
        self.pending.insert_prio(tasks, id, Queue::Pending);
    }

    /// Merge the pending list into per-core assignment. Returns the set
    /// of cores whose running task was outranked.
    pub(crate) fn merge(&mut self, tasks: &mut TaskTable) -> ReschedMask {
        if self.lock_nest > 0 {
            self.deferred = true;
            if self.cores() > 1 {
                // SMP degraded path: park arrivals on their cores' ready
                // lists, in priority order, without promotion.
                log::debug!("merge deferred: scheduler lock held, parking pending tasks");
                while let Some(id) = self.pending.pop_head(tasks) {
                    let core = self.pick_core(tasks, id);
                    self.ready[core].insert_prio(tasks, id, Queue::Ready(core));
                }
            }
            return 0;
        }
        if self.cores() == 1 {
            self.merge_up(tasks)
        } else {
            self.merge_smp(tasks)
        }
    }

    /// Uniprocessor merge: insert each pending task into the single
    /// ready list in priority order (FIFO among equals). The running
    /// task is never displaced here — we only report that a reschedule
    /// is due when an arrival outranks it.
    fn merge_up(&mut self, tasks: &mut TaskTable) -> ReschedMask {
        let mut changed = false;
        while let Some(id) = self.pending.pop_head(tasks) {
            let prio = tasks.tcb(id).eff_prio;
            changed |= self.outranks_current(tasks, 0, prio);
            self.ready[0].insert_prio(tasks, id, Queue::Ready(0));
        }
        if changed {
            1
        } else {
            0
        }
    }

    /// SMP merge: repeatedly take the highest-priority pending task and
    /// aim it at the affinity-permitted core running the lowest-priority
    /// task. Outranking that task preempts it — the displaced task goes
    /// back onto pending (role reversal) and the loop continues until
    /// pending drains.
    fn merge_smp(&mut self, tasks: &mut TaskTable) -> ReschedMask {
        let mut mask: ReschedMask = 0;
        while let Some(id) = self.pending.pop_head(tasks) {
            let prio = tasks.tcb(id).eff_prio;
            let core = self.pick_core(tasks, id);
            match self.current[core] {
                None => {
                    tasks.tcb_mut(id).state = TaskState::Running;
                    self.current[core] = Some(id);
                    mask |= 1 << core;
                }
                Some(cur) if self.outranks_current(tasks, core, prio) => {
                    // Preempt: the displaced task re-enters the pending
                    // list and gets re-placed on a later iteration.
                    tasks.tcb_mut(cur).state = TaskState::Ready;
                    self.current[core] = None;
                    self.pending.insert_prio(tasks, cur, Queue::Pending);
                    tasks.tcb_mut(id).state = TaskState::Running;
                    self.current[core] = Some(id);
                    mask |= 1 << core;
                }
                Some(_) => {
                    self.ready[core].insert_prio(tasks, id, Queue::Ready(core));
                }
            }
        }
        mask
    }

    /// Among the cores the task's affinity permits, pick the one running
    /// the lowest-priority task (an idle core wins outright).
    fn pick_core(&self, tasks: &TaskTable, id: TaskId) -> CoreId {
        let affinity = tasks.tcb(id).affinity;
        let mut best: Option<(CoreId, i16)> = None;
        for core in 0..self.cores() {
            if !affinity.allows(core) {
                continue;
            }
            let key = match self.current[core] {
                None => -1,
                Some(cur) => {
                    let t = tasks.tcb(cur);
                    if t.is_idle {
                        0
                    } else {
                        t.eff_prio as i16 + 1
                    }
                }
            };
            if best.map_or(true, |(_, k)| key < k) {
                best = Some((core, key));
            }
        }
        match best {
            Some((core, _)) => core,
            // Registration refuses masks that permit no core.
            None => panic!(
                "task {} reached placement with an affinity mask permitting no core",
                tasks.tcb(id).tid
            ),
        }
    }

    /// Whether a task of priority `prio` outranks what `core` runs now.
    /// The idle task is outranked by anything; a vacant core counts as
    /// outranked too.
    fn outranks_current(&self, tasks: &TaskTable, core: CoreId, prio: u8) -> bool {
        match self.current[core] {
            None => true,
            Some(cur) => {
                let t = tasks.tcb(cur);
                t.is_idle || prio > t.eff_prio
            }
        }
    }

    /// Unlink a task from the pending list or its ready list. Returns a
    /// reschedule mask when the task was a core's running task and a
    /// successor had to be elected.
    pub(crate) fn remove(&mut self, tasks: &mut TaskTable, id: TaskId) -> ReschedMask {
        match tasks.tcb(id).queue {
            Queue::Pending => {
                self.pending.remove(tasks, id, Queue::Pending);
                0
            }
            Queue::Ready(core) => {
                self.ready[core].remove(tasks, id, Queue::Ready(core));
                0
            }
            Queue::Waiters(_) => {
                panic!("scheduler remove() called on a semaphore waiter");
            }
            Queue::None => {
                if let Some(core) = self.core_of(id) {
                    self.current[core] = None;
                    self.elect(tasks, core);
                    1 << core
                } else {
                    0
                }
            }
        }
    }

    /// Which core is running `id`, if any.
    pub(crate) fn core_of(&self, id: TaskId) -> Option<CoreId> {
        self.current.iter().position(|c| *c == Some(id))
    }

    /// Pop the best ready task on `core` and make it the running task.
    ///
    /// A core with an empty ready list has lost its idle task; that is a
    /// fatal invariant violation, not a recoverable error.
    pub(crate) fn elect(&mut self, tasks: &mut TaskTable, core: CoreId) -> TaskId {
        let id = self.ready[core].pop_head(tasks).unwrap_or_else(|| {
            panic!("core {core} has no runnable task: idle task missing from ready list")
        });
        tasks.tcb_mut(id).state = TaskState::Running;
        self.current[core] = Some(id);
        id
    }

    /// The task `core` should be executing: its running task, unless the
    /// ready head outranks it. Fatal if the core has neither.
    pub(crate) fn highest(&self, tasks: &TaskTable, core: CoreId) -> TaskId {
        let cur = self.current[core];
        let head = self.ready[core].head();
        match (cur, head) {
            (Some(c), Some(h)) => {
                if self.outranks_current(tasks, core, tasks.tcb(h).eff_prio) {
                    h
                } else {
                    c
                }
            }
            (Some(c), None) => c,
            (None, Some(h)) => h,
            (None, None) => {
                panic!("core {core} has no runnable task: idle task missing from ready list")
            }
        }
    }

    /// Preemption point: if the ready head outranks the running task,
    /// swap them. Returns the newly installed task, or `None` if the
    /// running task keeps the core.
    pub(crate) fn reschedule(&mut self, tasks: &mut TaskTable, core: CoreId) -> Option<TaskId> {
        let head = self.ready[core].head()?;
        let head_prio = tasks.tcb(head).eff_prio;
        if let Some(cur) = self.current[core] {
            if !self.outranks_current(tasks, core, head_prio) {
                return None;
            }
            tasks.tcb_mut(cur).state = TaskState::Ready;
            self.current[core] = None;
            self.ready[core].insert_prio(tasks, cur, Queue::Ready(core));
        }
        Some(self.elect(tasks, core))
    }

    /// Change a task's effective priority and re-sort whichever queue it
    /// occupies. Returns a reschedule mask when the new priority
    /// outranks a core's running task.
    pub(crate) fn reprioritize(
        &mut self,
        tasks: &mut TaskTable,
        id: TaskId,
        new_eff: u8,
    ) -> ReschedMask {
        let queue = tasks.tcb(id).queue;
        tasks.tcb_mut(id).eff_prio = new_eff;
        match queue {
            // Unqueued tasks are either a core's running task or fully
            // detached. Lowering a running task below its ready head
            // (an inheritance boost expiring) is a preemption point.
            Queue::None => {
                if self.lock_nest == 0 {
                    if let Some(core) = self.core_of(id) {
                        if let Some(head) = self.ready[core].head() {
                            if tasks.tcb(head).eff_prio > new_eff {
                                return 1 << core;
                            }
                        }
                    }
                }
                0
            }
            Queue::Pending => {
                self.pending.remove(tasks, id, Queue::Pending);
                self.pending.insert_prio(tasks, id, Queue::Pending);
                0
            }
            Queue::Ready(core) => {
                self.ready[core].remove(tasks, id, Queue::Ready(core));
                self.ready[core].insert_prio(tasks, id, Queue::Ready(core));
                if self.lock_nest == 0 && self.outranks_current(tasks, core, new_eff) {
                    1 << core
                } else {
                    0
                }
            }
            // Waiter lists are re-sorted by the semaphore code, which
            // owns the list the task sits on.
            Queue::Waiters(_) => 0,
        }
    }

    // ── Scheduler lock ──────────────────────────────────────────

    pub(crate) fn lock(&mut self) {
        self.lock_nest += 1;
    }

    /// Drop one nesting level. At the outermost release, finish any
    /// deferred merge and report which cores now hold an outranked
    /// running task.
    pub(crate) fn unlock(&mut self, tasks: &mut TaskTable) -> ReschedMask {
        assert!(self.lock_nest > 0, "scheduler lock underflow");
        self.lock_nest -= 1;
        if self.lock_nest > 0 || !self.deferred {
            return 0;
        }
        self.deferred = false;
        let mut mask = self.merge(tasks);
        // Tasks parked on ready lists during the locked window may
        // outrank what their core is running.
        for core in 0..self.cores() {
            if let Some(head) = self.ready[core].head() {
                if self.outranks_current(tasks, core, tasks.tcb(head).eff_prio) {
                    mask |= 1 << core;
                }
            }
        }
        mask
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.lock_nest > 0
    }
}

// ── Scheduler lock guard ────────────────────────────────────────

/// RAII guard for the global, recursively-nestable scheduler lock.
///
/// While any guard is live, `merge` stops promoting tasks to running;
/// dropping the last guard finishes the deferred work and fans out the
/// resulting reschedule requests through the port.
#[must_use = "the scheduler stays locked for the guard's lifetime"]
pub struct SchedLockGuard<'a, P: Port> {
    pub(crate) exec: &'a Executive<P>,
}

impl<P: Port> Drop for SchedLockGuard<'_, P> {
    fn drop(&mut self) {
        self.exec.unlock_scheduler();
    }
}
