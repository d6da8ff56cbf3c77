//! Counting semaphores with priority inheritance.
//!
//! `count` is signed: positive is available units, non-positive is the
//! number of blocked waiters, negated. The invariant `count > 0 ⟹ no
//! waiters` and `count <= 0 ⟹ |count| == |waiters|` holds at every
//! quiescent point; `sem_wait` / `sem_post` / cancellation all preserve
//! it or halt.
//!
//! PRIORITY INHERITANCE:
//!   When an inheriting semaphore blocks a caller, every current holder
//!   is boosted to at least the caller's effective priority. The boost
//!   propagates through holders that are themselves blocked on other
//!   inheriting semaphores — an iterative wait-for-graph walk with a
//!   worklist, not recursion. A hop only enters the worklist on a
//!   *strict* priority increase, so circular wait-for graphs quiesce on
//!   their own; `MAX_BOOST_HOPS` is a hard stop for pathological chains.
//!   After `sem_post`, the poster's effective priority is re-derived
//!   from the semaphores it still holds with outstanding waiters.

use alloc::vec::Vec;

use crate::config::MAX_BOOST_HOPS;
use crate::error::{KernError, Result};
use crate::exec::ExecState;
use crate::sched::{ReschedMask, TaskList};
use crate::task::{Queue, TaskId, TaskState, WakeReason};

/// Stable, generation-guarded handle to a semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SemId {
    pub(crate) index: u32,
    pub(crate) gen: u32,
}

/// A task currently granted one or more units. The priority a holder
/// inherits is re-derived from waiter heads on demand rather than
/// cached here.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Holder {
    pub task: TaskId,
    pub units: u32,
}

pub(crate) struct Semaphore {
    pub count: i32,
    pub inherit: bool,
    pub holders: Vec<Holder>,
    pub waiters: TaskList,
}

impl Semaphore {
    fn new(initial: u32, inherit: bool) -> Self {
        Self {
            count: initial as i32,
            inherit,
            holders: Vec::new(),
            waiters: TaskList::new(),
        }
    }

    /// Record that `task` owns one more unit.
    pub(crate) fn grant(&mut self, task: TaskId) {
        match self.holders.iter_mut().find(|h| h.task == task) {
            Some(h) => h.units += 1,
            None => self.holders.push(Holder { task, units: 1 }),
        }
    }

    /// Release one unit held by `task`, if it holds any. Posting a unit
    /// the poster never held is legal for a counting semaphore (producer
    /// side of a producer/consumer pair).
    pub(crate) fn release(&mut self, task: TaskId) {
        if let Some(pos) = self.holders.iter().position(|h| h.task == task) {
            let h = &mut self.holders[pos];
            h.units -= 1;
            if h.units == 0 {
                self.holders.swap_remove(pos);
            }
        }
    }

    pub(crate) fn holds(&self, task: TaskId) -> bool {
        self.holders.iter().any(|h| h.task == task)
    }
}

// ── Semaphore arena ─────────────────────────────────────────────

struct Slot {
    gen: u32,
    sem: Option<Semaphore>,
}

/// Generational slot arena for semaphores, mirroring the task table.
pub(crate) struct SemTable {
    slots: Vec<Slot>,
}

impl SemTable {
    pub(crate) fn new() -> Self {
        Self { slots: Vec::new() }
    }

    pub(crate) fn insert(&mut self, initial: u32, inherit: bool) -> SemId {
        let sem = Semaphore::new(initial, inherit);
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.sem.is_none() {
                slot.sem = Some(sem);
                return SemId {
                    index: i as u32,
                    gen: slot.gen,
                };
            }
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            gen: 0,
            sem: Some(sem),
        });
        SemId { index, gen: 0 }
    }

    pub(crate) fn remove(&mut self, id: SemId) -> Result<Semaphore> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .ok_or(KernError::InvalidObject)?;
        if slot.gen != id.gen || slot.sem.is_none() {
            return Err(KernError::InvalidObject);
        }
        slot.gen = slot.gen.wrapping_add(1);
        Ok(slot.sem.take().unwrap())
    }

    pub(crate) fn get(&self, id: SemId) -> Result<&Semaphore> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.gen == id.gen)
            .and_then(|s| s.sem.as_ref())
            .ok_or(KernError::InvalidObject)
    }

    pub(crate) fn get_mut(&mut self, id: SemId) -> Result<&mut Semaphore> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.gen == id.gen)
            .and_then(|s| s.sem.as_mut())
            .ok_or(KernError::InvalidObject)
    }

    /// Panicking lookup for handles implied live by queue tags.
    pub(crate) fn sem_mut(&mut self, id: SemId) -> &mut Semaphore {
        self.get_mut(id)
            .expect("queue corruption: waiter tag refers to a dead semaphore")
    }

    /// Iterate live semaphores with their handles.
    pub(crate) fn iter(&self) -> impl Iterator<Item = (SemId, &Semaphore)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.sem.as_ref().map(|sem| {
                (
                    SemId {
                        index: i as u32,
                        gen: s.gen,
                    },
                    sem,
                )
            })
        })
    }
}

/// Snapshot of a semaphore's state, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemInfo {
    pub count: i32,
    pub waiters: usize,
    pub holders: usize,
    pub inherit: bool,
}

// ── State-level semaphore operations ────────────────────────────
//
// These run inside the executive's critical section; the lock dance and
// port callbacks live in `Executive`.

impl ExecState {
    /// Set a task's effective priority and re-sort whichever queue it
    /// occupies — scheduler queues via the ready-queue manager, waiter
    /// sets here (we own those lists).
    pub(crate) fn set_eff_prio(&mut self, id: TaskId, new_eff: u8) -> ReschedMask {
        if self.tasks.tcb(id).eff_prio == new_eff {
            return 0;
        }
        match self.tasks.tcb(id).queue {
            Queue::Waiters(sid) => {
                self.tasks.tcb_mut(id).eff_prio = new_eff;
                let ExecState { tasks, sems, .. } = self;
                let sem = sems.sem_mut(sid);
                sem.waiters.remove(tasks, id, Queue::Waiters(sid));
                sem.waiters.insert_prio(tasks, id, Queue::Waiters(sid));
                0
            }
            _ => {
                let ExecState { tasks, sched, .. } = self;
                sched.reprioritize(tasks, id, new_eff)
            }
        }
    }

    /// Boost every holder of `sem` to at least `prio`, propagating
    /// through holders blocked on other inheriting semaphores.
    pub(crate) fn boost_holders(&mut self, sem: SemId, prio: u8) -> ReschedMask {
        let mut mask: ReschedMask = 0;
        let mut work: Vec<(SemId, u8, usize)> = Vec::new();
        work.push((sem, prio, 0));
        while let Some((sid, prio, hops)) = work.pop() {
            if hops >= MAX_BOOST_HOPS {
                log::warn!(
                    "priority inheritance chain clamped at {} hops (semaphore walk truncated)",
                    MAX_BOOST_HOPS
                );
                continue;
            }
            let holders: Vec<TaskId> = match self.sems.get(sid) {
                Ok(s) => s.holders.iter().map(|h| h.task).collect(),
                Err(_) => continue,
            };
            for task in holders {
                let tcb = self.tasks.tcb(task);
                if tcb.eff_prio >= prio {
                    // No strict increase: the chain quiesces here. This
                    // is also what terminates circular wait-for graphs.
                    continue;
                }
                let next = tcb.waiting_on;
                mask |= self.set_eff_prio(task, prio);
                if let Some(next_sem) = next {
                    if self.sems.get(next_sem).map_or(false, |s| s.inherit) {
                        work.push((next_sem, prio, hops + 1));
                    }
                }
            }
        }
        mask
    }

    /// Re-derive a task's effective priority from its base priority and
    /// the inheriting semaphores it still holds with outstanding
    /// waiters. Called after `sem_post` and after a waiter is removed.
    pub(crate) fn recompute_holder_prio(&mut self, task: TaskId) -> ReschedMask {
        let Ok(tcb) = self.tasks.get(task) else {
            return 0;
        };
        let mut need = tcb.base_prio;
        for (_, sem) in self.sems.iter() {
            if sem.inherit && sem.count <= 0 && sem.holds(task) {
                if let Some(head) = sem.waiters.head() {
                    need = need.max(self.tasks.tcb(head).eff_prio);
                }
            }
        }
        self.set_eff_prio(task, need)
    }

    /// Wake the highest-priority waiter of `sem`: transfer the unit,
    /// clear its wait linkage, and re-admit it through the pending list.
    pub(crate) fn wake_one_waiter(&mut self, sem: SemId) -> ReschedMask {
        let woken = {
            let ExecState { tasks, sems, .. } = self;
            let s = sems.sem_mut(sem);
            let Some(w) = s.waiters.pop_head(tasks) else {
                return 0;
            };
            s.grant(w);
            let tcb = tasks.tcb_mut(w);
            tcb.waiting_on = None;
            tcb.wake_reason = Some(WakeReason::Normal);
            tcb.state = TaskState::Ready;
            w
        };
        let ExecState { tasks, sched, .. } = self;
        sched.enqueue_pending(tasks, woken);
        sched.merge(tasks)
    }

    /// The wait-cancellation contract: roll back the count, unlink the
    /// waiter, un-boost the holders, record the wake reason, and
    /// re-admit the task. Runs *before* any signal handler observes the
    /// task, so the handler sees consistent semaphore state.
    pub(crate) fn cancel_wait(&mut self, task: TaskId, reason: WakeReason) -> Result<ReschedMask> {
        let sem = {
            let tcb = self.tasks.get_mut(task)?;
            if tcb.state != TaskState::WaitingSemaphore {
                return Err(KernError::WaitNotStarted);
            }
            let sem = tcb
                .waiting_on
                .take()
                .expect("waiting task has no wait target");
            tcb.wake_reason = Some(reason);
            tcb.state = TaskState::Ready;
            sem
        };
        let holders: Vec<TaskId> = {
            let ExecState { tasks, sems, .. } = self;
            let s = sems.sem_mut(sem);
            s.count += 1;
            s.waiters.remove(tasks, task, Queue::Waiters(sem));
            s.holders.iter().map(|h| h.task).collect()
        };
        let mut mask: ReschedMask = 0;
        for h in holders {
            mask |= self.recompute_holder_prio(h);
        }
        let ExecState { tasks, sched, .. } = self;
        sched.enqueue_pending(tasks, task);
        mask |= sched.merge(tasks);
        Ok(mask)
    }

    /// Return every unit a terminating task still holds. The holder
    /// entries must go too: a later inheritance walk over this
    /// semaphore would otherwise follow a handle into a reclaimed task
    /// slot.
    pub(crate) fn purge_holder(&mut self, task: TaskId) -> ReschedMask {
        let held: Vec<(SemId, u32)> = self
            .sems
            .iter()
            .filter_map(|(sid, s)| {
                s.holders
                    .iter()
                    .find(|h| h.task == task)
                    .map(|h| (sid, h.units))
            })
            .collect();
        let mut mask: ReschedMask = 0;
        for (sid, units) in held {
            log::warn!(
                "task {} terminated holding {} unreleased semaphore unit(s)",
                self.tasks.tcb(task).tid,
                units
            );
            self.sems.sem_mut(sid).holders.retain(|h| h.task != task);
            for _ in 0..units {
                let count = {
                    let s = self.sems.sem_mut(sid);
                    s.count += 1;
                    s.count
                };
                if count <= 0 {
                    mask |= self.wake_one_waiter(sid);
                }
            }
            let rest: Vec<TaskId> = self
                .sems
                .sem_mut(sid)
                .holders
                .iter()
                .map(|h| h.task)
                .collect();
            for h in rest {
                mask |= self.recompute_holder_prio(h);
            }
        }
        mask
    }
}
