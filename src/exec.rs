// =============================================================================
// keel — Executive Facade
// =============================================================================
//
// All executive state lives in one `ExecState` behind the critical
// section. The public entry points here own the locking discipline:
//
//   - take the lock, perform ONE structural mutation batch, release it;
//   - only then call into the port (context switch, reschedule request)
//     or into a signal handler. The lock is never held across either.
//
// Reschedule needs are accumulated as a core bitmask inside the lock and
// fanned out through `Port::request_reschedule` after release.
// =============================================================================

use alloc::vec::Vec;

use crate::config::Config;
use crate::error::{KernError, Result};
use crate::port::{CoreId, Port};
use crate::sched::{ReschedMask, SchedLockGuard, SchedState};
use crate::sem::{SemId, SemInfo, SemTable};
use crate::signal::{Action, DeliveryMode, Handler, PoolClass, SigPool, SigSet, Signo, SIG_TERM};
use crate::sync::IrqLock;
use crate::task::{Queue, TaskId, TaskInfo, TaskSpec, TaskState, TaskTable, Tcb, WakeReason};

/// Everything the executive mutates under the critical section.
pub(crate) struct ExecState {
    pub tasks: TaskTable,
    pub sched: SchedState,
    pub sems: SemTable,
    pub pool: SigPool,
}

/// The task executive: scheduler, semaphores, and signal delivery over
/// a port-supplied architecture layer.
pub struct Executive<P: Port> {
    state: IrqLock<ExecState>,
    port: P,
}

impl<P: Port> Executive<P> {
    pub fn new(config: Config, port: P) -> Self {
        assert!(config.cores >= 1, "at least one core required");
        Self {
            state: IrqLock::new(ExecState {
                tasks: TaskTable::new(),
                sched: SchedState::new(config.cores),
                sems: SemTable::new(),
                pool: SigPool::new(config.sig_pool, config.sig_irq_pool),
            }),
            port,
        }
    }

    /// The architecture port this executive was built with.
    pub fn port(&self) -> &P {
        &self.port
    }

    fn fan_out(&self, mask: ReschedMask) {
        let mut m = mask;
        while m != 0 {
            let core = m.trailing_zeros() as CoreId;
            m &= m - 1;
            self.port.request_reschedule(core);
        }
    }

    // ── Task registry boundary ──────────────────────────────────

    /// Register a task with the executive and mint its handle.
    ///
    /// An idle task (`spec.idle_on`) is linked at the tail of its core's
    /// ready list immediately and, on a core with no running task yet,
    /// becomes the running task. Ordinary tasks start unlinked; admit
    /// them with `enqueue_pending` + `merge`.
    pub fn task_register(&self, spec: TaskSpec) -> Result<TaskId> {
        let mut st = self.state.lock();
        if let Some(core) = spec.idle_on {
            if core >= st.sched.ready.len() {
                return Err(KernError::InvalidObject);
            }
        }
        // An affinity mask that permits none of the configured cores
        // could never be placed; refuse it here rather than guess a
        // core later.
        if !(0..st.sched.ready.len()).any(|core| spec.affinity.allows(core)) {
            return Err(KernError::InvalidObject);
        }
        let id = st.tasks.insert(Tcb::new(&spec));
        if let Some(core) = spec.idle_on {
            let ExecState { tasks, sched, .. } = &mut *st;
            sched.ready[core].push_tail(tasks, id, Queue::Ready(core));
            if sched.current[core].is_none() {
                sched.elect(tasks, core);
            }
        }
        Ok(id)
    }

    /// Reclaim a task's slot. The task must be fully unlinked: not on
    /// any queue, not running, not blocked. A linked task is refused
    /// with `Busy` — unlinking it first is the caller's job (`remove`,
    /// or signal-driven termination).
    pub fn task_remove(&self, id: TaskId) -> Result<()> {
        let mut st = self.state.lock();
        {
            let tcb = st.tasks.get(id)?;
            if tcb.is_linked() || tcb.waiting_on.is_some() {
                return Err(KernError::Busy);
            }
        }
        if st.sched.core_of(id).is_some() {
            return Err(KernError::Busy);
        }
        let ExecState { tasks, pool, .. } = &mut *st;
        tasks.tcb_mut(id).sig.drain_all(pool);
        st.tasks.remove(id).map(|_| ())
    }

    /// Diagnostic snapshot of a task.
    pub fn task_info(&self, id: TaskId) -> Result<TaskInfo> {
        let st = self.state.lock();
        let tcb = st.tasks.get(id)?;
        Ok(TaskInfo {
            tid: tcb.tid,
            state: tcb.state,
            base_prio: tcb.base_prio,
            eff_prio: tcb.eff_prio,
            queue: tcb.queue,
            exited: tcb.exited,
        })
    }

    // ── Ready queue manager ─────────────────────────────────────

    /// Admit a task to the pending list. Legal while the scheduler lock
    /// is held — only promotion is deferred, never enqueueing.
    pub fn enqueue_pending(&self, id: TaskId) -> Result<()> {
        let mut st = self.state.lock();
        let tcb = st.tasks.get(id)?;
        if tcb.exited || tcb.is_linked() {
            return Err(KernError::Busy);
        }
        let ExecState { tasks, sched, .. } = &mut *st;
        sched.enqueue_pending(tasks, id);
        Ok(())
    }

    /// Merge pending tasks into per-core assignment. Returns whether any
    /// core's running task was outranked (a reschedule was requested
    /// through the port for each such core).
    pub fn merge(&self) -> bool {
        let mask = {
            let mut st = self.state.lock();
            let ExecState { tasks, sched, .. } = &mut *st;
            sched.merge(tasks)
        };
        self.fan_out(mask);
        mask != 0
    }

    /// Unlink a task from the pending list or its ready list (task exit,
    /// external suspension). A task blocked on a semaphore is refused
    /// with `Busy` — cancel the wait first.
    pub fn remove(&self, id: TaskId) -> Result<()> {
        let mask = {
            let mut st = self.state.lock();
            let tcb = st.tasks.get(id)?;
            if tcb.state == TaskState::WaitingSemaphore {
                return Err(KernError::Busy);
            }
            let ExecState { tasks, sched, .. } = &mut *st;
            sched.remove(tasks, id)
        };
        self.fan_out(mask);
        Ok(())
    }

    /// The task `core` should be executing. Panics if the core has no
    /// runnable task at all — the idle task is missing, and that is a
    /// fatal invariant violation.
    pub fn highest(&self, core: CoreId) -> TaskId {
        let st = self.state.lock();
        st.sched.highest(&st.tasks, core)
    }

    /// The task `core` is currently running.
    pub fn current(&self, core: CoreId) -> Option<TaskId> {
        self.state.lock().sched.current[core]
    }

    /// Preemption point for `core`: install the ready head if it
    /// outranks the running task. Returns the newly installed task.
    pub fn reschedule(&self, core: CoreId) -> Option<TaskId> {
        let mut st = self.state.lock();
        let ExecState { tasks, sched, .. } = &mut *st;
        sched.reschedule(tasks, core)
    }

    /// Take the global scheduler lock. Recursive: guards nest freely
    /// across cores; promotion resumes when the last guard drops.
    pub fn lock_scheduler(&self) -> SchedLockGuard<'_, P> {
        self.state.lock().sched.lock();
        SchedLockGuard { exec: self }
    }

    pub(crate) fn unlock_scheduler(&self) {
        let mask = {
            let mut st = self.state.lock();
            let ExecState { tasks, sched, .. } = &mut *st;
            sched.unlock(tasks)
        };
        self.fan_out(mask);
    }

    // ── Semaphores ──────────────────────────────────────────────

    /// Create a counting semaphore with `initial` units. `inherit`
    /// enables priority inheritance for its holders.
    pub fn sem_init(&self, initial: u32, inherit: bool) -> SemId {
        self.state.lock().sems.insert(initial, inherit)
    }

    /// Destroy a semaphore. Refused with `Busy` — state unchanged — if
    /// any task is blocked on it.
    pub fn sem_destroy(&self, sem: SemId) -> Result<()> {
        let mask = {
            let mut st = self.state.lock();
            if !st.sems.get(sem)?.waiters.is_empty() {
                return Err(KernError::Busy);
            }
            let dead = st.sems.remove(sem)?;
            // Holders may have carried a boost from this semaphore.
            let mut mask: ReschedMask = 0;
            for h in dead.holders {
                mask |= st.recompute_holder_prio(h.task);
            }
            mask
        };
        self.fan_out(mask);
        Ok(())
    }

    /// Diagnostic snapshot of a semaphore.
    pub fn sem_info(&self, sem: SemId) -> Result<SemInfo> {
        let st = self.state.lock();
        let s = st.sems.get(sem)?;
        Ok(SemInfo {
            count: s.count,
            waiters: s.waiters.len(),
            holders: s.holders.len(),
            inherit: s.inherit,
        })
    }

    /// Acquire one unit, blocking the calling task if none is available.
    ///
    /// `task` must be the running task of some core — `wait` is the
    /// executive's sole suspension point. On contention the caller is
    /// moved to the waiter set, a successor is elected on its core, and
    /// the port performs the synchronous handoff. The call resumes with
    /// `Ok` on a normal wake; `Interrupted` / `TimedOut` report that the
    /// wait-cancellation contract already rolled everything back.
    pub fn sem_wait(&self, sem: SemId, task: TaskId) -> Result<()> {
        let core = {
            let mut st = self.state.lock();
            let prio = st.tasks.get(task)?.eff_prio;

            let inherit = {
                let s = st.sems.get_mut(sem)?;
                if s.count > 0 {
                    s.count -= 1;
                    s.grant(task);
                    return Ok(());
                }
                s.count -= 1;
                s.inherit
            };

            let Some(core) = st.sched.core_of(task) else {
                panic!("sem_wait from a task that is not running on any core");
            };

            {
                let tcb = st.tasks.tcb_mut(task);
                tcb.waiting_on = Some(sem);
                tcb.wake_reason = None;
            }

            let mut mask: ReschedMask = 0;
            if inherit {
                mask |= st.boost_holders(sem, prio);
            }

            {
                let ExecState {
                    tasks, sched, sems, ..
                } = &mut *st;
                sched.current[core] = None;
                tasks.tcb_mut(task).state = TaskState::WaitingSemaphore;
                sems.sem_mut(sem)
                    .waiters
                    .insert_prio(tasks, task, Queue::Waiters(sem));
                sched.elect(tasks, core);
            }
            drop(st);
            self.fan_out(mask);
            core
        };

        // Synchronous handoff — no executive lock held.
        self.port.context_switch(self, core);

        let mut st = self.state.lock();
        let tcb = st.tasks.get_mut(task)?;
        match tcb.wake_reason.take() {
            Some(WakeReason::Normal) => Ok(()),
            Some(WakeReason::Interrupted) => Err(KernError::Interrupted),
            Some(WakeReason::TimedOut) => Err(KernError::TimedOut),
            None => Err(KernError::WaitNotStarted),
        }
    }

    /// Release one unit. If tasks are blocked, the highest-priority
    /// waiter (FIFO among equals) receives the unit and is re-admitted
    /// through the pending list; the poster's inherited boost, if any,
    /// is re-derived.
    pub fn sem_post(&self, sem: SemId, poster: TaskId) -> Result<()> {
        let mask = {
            let mut st = self.state.lock();
            let (count, inherit) = {
                let s = st.sems.get_mut(sem)?;
                s.count += 1;
                s.release(poster);
                (s.count, s.inherit)
            };
            let mut mask: ReschedMask = 0;
            if count <= 0 {
                mask |= st.wake_one_waiter(sem);
            }
            if inherit {
                mask |= st.recompute_holder_prio(poster);
            }
            mask
        };
        self.fan_out(mask);
        Ok(())
    }

    /// Cancel a blocked wait from the outside (the external timer's
    /// timeout path, or any other cancellation source). Fails with
    /// `WaitNotStarted` if the task is not blocked in `sem_wait`.
    pub fn sem_cancel_wait(&self, task: TaskId, reason: WakeReason) -> Result<()> {
        let mask = {
            let mut st = self.state.lock();
            st.cancel_wait(task, reason)?
        };
        self.fan_out(mask);
        Ok(())
    }

    // ── Signals ─────────────────────────────────────────────────

    /// Register (or clear, with `None`) the action for `signo`.
    /// Returns the previous registration.
    pub fn sig_action(
        &self,
        task: TaskId,
        signo: Signo,
        action: Option<Action>,
    ) -> Result<Option<Action>> {
        if !signo.is_valid() {
            return Err(KernError::InvalidObject);
        }
        let mut st = self.state.lock();
        let tcb = st.tasks.get_mut(task)?;
        let old = core::mem::replace(&mut tcb.sig.actions[signo.0 as usize], action);
        Ok(old)
    }

    /// Replace the task's signal mask, returning the old one. The
    /// termination signal cannot be masked; its bit is stripped. Any
    /// blocked-pending signal the new mask uncovers becomes deliverable
    /// at the task's next dispatch point; if the task is blocked on a
    /// semaphore, the wait is unwound now so that point arrives.
    pub fn sig_set_mask(&self, task: TaskId, mask: SigSet) -> Result<SigSet> {
        let (old, resched) = {
            let mut st = self.state.lock();
            st.tasks.get(task)?;
            let (old, unwind) = {
                let ExecState { tasks, pool, .. } = &mut *st;
                let tcb = tasks.tcb_mut(task);
                let old = tcb.sig.mask;
                tcb.sig.mask = mask - SigSet::of(SIG_TERM);
                tcb.sig.requeue_unblocked(pool);
                let unwind =
                    tcb.state == TaskState::WaitingSemaphore && tcb.sig.has_pending();
                (old, unwind)
            };
            if unwind {
                // Unwind the blocked wait before the handler can run,
                // exactly as a directly-raised signal would.
                let resched = st.cancel_wait(task, WakeReason::Interrupted)?;
                st.tasks.tcb_mut(task).state = TaskState::PendingSignalAction;
                (old, resched)
            } else {
                (old, 0)
            }
        };
        self.fan_out(resched);
        Ok(old)
    }

    /// Whether the task has deliverable signals queued.
    pub fn signal_pending(&self, task: TaskId) -> Result<bool> {
        let st = self.state.lock();
        Ok(st.tasks.get(task)?.sig.has_pending())
    }

    /// Enqueue a signal for `task`. Producer interface for timers,
    /// drivers, and other tasks.
    ///
    /// A masked signal parks in the blocked-pending set. A deliverable
    /// one joins the FIFO pending queue; if the target is blocked in
    /// `sem_wait`, the wait-cancellation contract runs here, before any
    /// handler can observe the semaphore. Signals with no registered
    /// action (other than the termination signal) are discarded.
    pub fn raise(&self, task: TaskId, signo: Signo, payload: u64) -> Result<()> {
        if !signo.is_valid() {
            return Err(KernError::InvalidObject);
        }
        let class = if self.port.in_interrupt() {
            PoolClass::Interrupt
        } else {
            PoolClass::Normal
        };
        let mask = {
            let mut st = self.state.lock();
            let is_term = signo == SIG_TERM;
            {
                let tcb = st.tasks.get(task)?;
                if tcb.exited {
                    return Err(KernError::InvalidObject);
                }
                if !is_term && tcb.sig.actions[signo.0 as usize].is_none() {
                    // Default disposition: ignore.
                    return Ok(());
                }
            }
            let id = match st.pool.alloc(class, signo, payload) {
                Ok(id) => id,
                Err(e) => {
                    log::warn!("signal {} to task dropped: entry pool exhausted", signo.0);
                    return Err(e);
                }
            };
            let tcb = st.tasks.tcb_mut(task);
            if !is_term && tcb.sig.mask.has(signo) {
                tcb.sig.blocked.push_back(id);
                return Ok(());
            }
            tcb.sig.pending.push_back(id);

            if tcb.state == TaskState::WaitingSemaphore {
                // Unwind the blocked wait before the handler can run.
                let mask = st.cancel_wait(task, WakeReason::Interrupted)?;
                st.tasks.tcb_mut(task).state = TaskState::PendingSignalAction;
                mask
            } else {
                // A running target needs a poke to reach its dispatch
                // point; a queued one dispatches when next installed.
                match st.sched.core_of(task) {
                    Some(core) => 1 << core,
                    None => 0,
                }
            }
        };
        self.fan_out(mask);
        Ok(())
    }

    /// Drain the task's pending-action queue, strictly FIFO.
    ///
    /// Called on the execution context that reaches the dispatch point
    /// (post-interrupt-return or post-syscall-return path); it never
    /// suspends. For each entry: install the transient mask (current ∪
    /// handler's additional ∪ the signal's own bit), invoke the handler
    /// with no executive lock held, restore the mask, re-examine the
    /// blocked set, and return the entry to its pool. A termination
    /// signal runs its cleanup handler and then terminates the task.
    pub fn dispatch(&self, task: TaskId) -> Result<()> {
        loop {
            let (id, entry, action, saved) = {
                let mut st = self.state.lock();
                let next = st.tasks.get_mut(task)?.sig.pending.pop_front();
                let Some(id) = next else {
                    let running = st.sched.core_of(task).is_some();
                    let tcb = st.tasks.tcb_mut(task);
                    if tcb.state == TaskState::PendingSignalAction {
                        tcb.state = if running {
                            TaskState::Running
                        } else {
                            TaskState::Ready
                        };
                    }
                    return Ok(());
                };
                let tcb = st.tasks.tcb_mut(task);
                tcb.sig.posted = Some(id);
                let entry = st.pool.get(id);
                let tcb = st.tasks.tcb_mut(task);
                let action = tcb.sig.actions[entry.signo.0 as usize];
                let saved = tcb.sig.mask;
                let extra = action.map(|a| a.mask).unwrap_or_else(SigSet::empty);
                tcb.sig.mask = saved | extra | SigSet::of(entry.signo);
                (id, entry, action, saved)
            };

            // Handler invocation — no executive lock held.
            if let Some(a) = action {
                self.invoke(task, a.handler, entry.signo, entry.payload);
            }

            let mask = {
                let mut st = self.state.lock();
                {
                    let ExecState { tasks, pool, .. } = &mut *st;
                    let tcb = tasks.tcb_mut(task);
                    tcb.sig.mask = saved;
                    tcb.sig.posted = None;
                    pool.free(id);
                    // Restoring the mask may uncover blocked-pending
                    // signals; they join the queue and this loop
                    // delivers them before returning.
                    tcb.sig.requeue_unblocked(pool);
                }
                if entry.signo == SIG_TERM {
                    st.terminate(task)
                } else {
                    0
                }
            };
            self.fan_out(mask);
            if entry.signo == SIG_TERM {
                return Ok(());
            }
        }
    }

    fn invoke(&self, task: TaskId, handler: Handler, signo: Signo, payload: u64) {
        let mode = {
            let st = self.state.lock();
            match st.tasks.get(task) {
                Ok(tcb) => tcb.sig.mode,
                Err(_) => return,
            }
        };
        match (mode, handler) {
            (DeliveryMode::KernelDirect, Handler::Kernel(f)) => f(signo, payload),
            (DeliveryMode::UserTrampoline, Handler::User(entry)) => {
                self.port.signal_trampoline(task, entry, signo, payload)
            }
            (mode, handler) => {
                log::warn!(
                    "signal {} handler {:?} does not match delivery mode {:?}; skipped",
                    signo.0,
                    handler,
                    mode
                );
            }
        }
    }
}

impl ExecState {
    /// Immediate termination: unlink the task from every structure it
    /// touches, drain its signal entries back to the pools, and mark it
    /// exited. The registry reclaims the slot afterwards.
    pub(crate) fn terminate(&mut self, task: TaskId) -> ReschedMask {
        let mut mask: ReschedMask = 0;

        if self.tasks.tcb(task).state == TaskState::WaitingSemaphore {
            // Roll the wait back; the task will not be re-admitted.
            let sem = self
                .tasks
                .tcb_mut(task)
                .waiting_on
                .take()
                .expect("waiting task has no wait target");
            let holders: Vec<TaskId> = {
                let ExecState { tasks, sems, .. } = self;
                let s = sems.sem_mut(sem);
                s.count += 1;
                s.waiters.remove(tasks, task, Queue::Waiters(sem));
                s.holders.iter().map(|h| h.task).collect()
            };
            for h in holders {
                mask |= self.recompute_holder_prio(h);
            }
        }

        {
            let ExecState { tasks, sched, .. } = self;
            mask |= sched.remove(tasks, task);
        }

        mask |= self.purge_holder(task);

        let ExecState { tasks, pool, .. } = self;
        let tcb = tasks.tcb_mut(task);
        tcb.sig.drain_all(pool);
        tcb.exited = true;
        tcb.wake_reason = None;
        tcb.state = TaskState::Ready;
        mask
    }
}
