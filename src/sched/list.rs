//! Priority-ordered, doubly-linked task list over the TCB arena.
//!
//! The links live inside the TCBs (`prev`/`next` handles), so a task
//! occupies at most one list at a time and membership is recorded in its
//! `queue` tag. Ordering is strict by effective priority (higher first)
//! with FIFO among equals; a core's idle task is an absolute floor that
//! nothing sorts behind.
//!
//! Link integrity is checked on every unlink. A tag mismatch means a
//! task is on a different list than its caller believes — that is
//! corruption, and the kernel halts rather than guess.

use alloc::vec::Vec;

use crate::task::{Queue, TaskId, TaskTable};

/// A doubly-linked list of tasks, identified by the `Queue` tag its
/// members carry.
#[derive(Debug, Default)]
pub(crate) struct TaskList {
    head: Option<TaskId>,
    tail: Option<TaskId>,
    len: usize,
}

impl TaskList {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn head(&self) -> Option<TaskId> {
        self.head
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Insert `id` in priority order: before the first member whose
    /// effective priority is strictly lower (or that is an idle task),
    /// after all members of equal or higher priority. This yields FIFO
    /// order within a priority level.
    pub(crate) fn insert_prio(&mut self, tasks: &mut TaskTable, id: TaskId, tag: Queue) {
        debug_assert!(!tasks.tcb(id).is_linked(), "task already on a queue");
        let prio = tasks.tcb(id).eff_prio;

        // A displaced idle task goes straight back to being the floor.
        if tasks.tcb(id).is_idle {
            self.push_tail(tasks, id, tag);
            return;
        }

        let mut cur = self.head;
        while let Some(c) = cur {
            let t = tasks.tcb(c);
            if t.is_idle || t.eff_prio < prio {
                self.insert_before(tasks, id, c, tag);
                return;
            }
            cur = t.next;
        }
        self.push_tail(tasks, id, tag);
    }

    /// Append at the tail regardless of priority. Used for idle tasks,
    /// which form the permanent floor of a core's ready list.
    pub(crate) fn push_tail(&mut self, tasks: &mut TaskTable, id: TaskId, tag: Queue) {
        let old_tail = self.tail;
        {
            let tcb = tasks.tcb_mut(id);
            tcb.prev = old_tail;
            tcb.next = None;
            tcb.queue = tag;
        }
        match old_tail {
            Some(t) => tasks.tcb_mut(t).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    fn insert_before(&mut self, tasks: &mut TaskTable, id: TaskId, at: TaskId, tag: Queue) {
        let before = tasks.tcb(at).prev;
        {
            let tcb = tasks.tcb_mut(id);
            tcb.prev = before;
            tcb.next = Some(at);
            tcb.queue = tag;
        }
        tasks.tcb_mut(at).prev = Some(id);
        match before {
            Some(b) => tasks.tcb_mut(b).next = Some(id),
            None => self.head = Some(id),
        }
        self.len += 1;
    }

    /// Detach the head, clearing its links and tag.
    pub(crate) fn pop_head(&mut self, tasks: &mut TaskTable) -> Option<TaskId> {
        let id = self.head?;
        let expected = tasks.tcb(id).queue;
        self.remove(tasks, id, expected);
        Some(id)
    }

    /// Unlink `id`, verifying it is on the list the caller thinks it is.
    pub(crate) fn remove(&mut self, tasks: &mut TaskTable, id: TaskId, tag: Queue) {
        let (prev, next) = {
            let tcb = tasks.tcb(id);
            assert!(
                tcb.queue == tag,
                "queue corruption: task {} unlinked from the wrong list",
                tcb.tid
            );
            (tcb.prev, tcb.next)
        };
        match prev {
            Some(p) => tasks.tcb_mut(p).next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => tasks.tcb_mut(n).prev = prev,
            None => self.tail = prev,
        }
        let tcb = tasks.tcb_mut(id);
        tcb.prev = None;
        tcb.next = None;
        tcb.queue = Queue::None;
        self.len -= 1;
    }

    /// Walk the list front to back, collecting handles. Diagnostic and
    /// test paths only — the hot paths never need a full walk.
    pub(crate) fn snapshot(&self, tasks: &TaskTable) -> Vec<TaskId> {
        let mut out = Vec::with_capacity(self.len);
        let mut cur = self.head;
        while let Some(c) = cur {
            out.push(c);
            cur = tasks.tcb(c).next;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::DeliveryMode;
    use crate::task::{Affinity, TaskSpec, Tcb};

    fn task(tasks: &mut TaskTable, tid: u64, prio: u8) -> TaskId {
        tasks.insert(Tcb::new(&TaskSpec {
            tid,
            priority: prio,
            affinity: Affinity::ANY,
            delivery: DeliveryMode::KernelDirect,
            idle_on: None,
        }))
    }

    fn idle(tasks: &mut TaskTable, tid: u64) -> TaskId {
        tasks.insert(Tcb::new(&TaskSpec {
            tid,
            priority: 0,
            affinity: Affinity::only(0),
            delivery: DeliveryMode::KernelDirect,
            idle_on: Some(0),
        }))
    }

    #[test]
    fn orders_strictly_by_priority() {
        let mut tasks = TaskTable::new();
        let mut list = TaskList::new();
        let lo = task(&mut tasks, 1, 10);
        let hi = task(&mut tasks, 2, 50);
        let mid = task(&mut tasks, 3, 30);
        list.insert_prio(&mut tasks, lo, Queue::Pending);
        list.insert_prio(&mut tasks, hi, Queue::Pending);
        list.insert_prio(&mut tasks, mid, Queue::Pending);
        assert_eq!(list.snapshot(&tasks), [hi, mid, lo]);
    }

    #[test]
    fn fifo_within_a_priority_level() {
        let mut tasks = TaskTable::new();
        let mut list = TaskList::new();
        let a = task(&mut tasks, 1, 20);
        let b = task(&mut tasks, 2, 20);
        let c = task(&mut tasks, 3, 20);
        for id in [a, b, c] {
            list.insert_prio(&mut tasks, id, Queue::Pending);
        }
        assert_eq!(list.snapshot(&tasks), [a, b, c]);
    }

    #[test]
    fn idle_task_stays_at_the_tail() {
        let mut tasks = TaskTable::new();
        let mut list = TaskList::new();
        let idle = idle(&mut tasks, 99);
        list.push_tail(&mut tasks, idle, Queue::Ready(0));
        // Even a priority-0 task sorts ahead of the idle floor.
        let zero = task(&mut tasks, 1, 0);
        list.insert_prio(&mut tasks, zero, Queue::Ready(0));
        assert_eq!(list.snapshot(&tasks), [zero, idle]);
    }

    #[test]
    fn remove_relinks_neighbours() {
        let mut tasks = TaskTable::new();
        let mut list = TaskList::new();
        let a = task(&mut tasks, 1, 30);
        let b = task(&mut tasks, 2, 20);
        let c = task(&mut tasks, 3, 10);
        for id in [a, b, c] {
            list.insert_prio(&mut tasks, id, Queue::Pending);
        }
        list.remove(&mut tasks, b, Queue::Pending);
        assert_eq!(list.snapshot(&tasks), [a, c]);
        assert_eq!(tasks.tcb(b).queue, Queue::None);
        assert_eq!(list.pop_head(&mut tasks), Some(a));
        assert_eq!(list.pop_head(&mut tasks), Some(c));
        assert!(list.is_empty());
    }
}
