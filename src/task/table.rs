//! Generational slot arena for TCBs.
//!
//! Handles are `(index, generation)` composites. When a slot is freed
//! and reused its generation is incremented, so every handle minted for
//! the old occupant is rejected — a stale `TaskId` can never alias a
//! new task.

use alloc::vec::Vec;

use crate::error::{KernError, Result};
use crate::task::{TaskId, Tcb};

struct Slot {
    gen: u32,
    tcb: Option<Tcb>,
}

/// Arena of task control blocks, addressed by `TaskId`.
pub struct TaskTable {
    slots: Vec<Slot>,
}

impl TaskTable {
    pub(crate) fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Place a TCB in the first free slot and mint its handle.
    pub(crate) fn insert(&mut self, tcb: Tcb) -> TaskId {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.tcb.is_none() {
                slot.tcb = Some(tcb);
                return TaskId {
                    index: i as u32,
                    gen: slot.gen,
                };
            }
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            gen: 0,
            tcb: Some(tcb),
        });
        TaskId { index, gen: 0 }
    }

    /// Free a slot and bump its generation, invalidating all existing
    /// handles to it. The caller is responsible for unlink checks.
    pub(crate) fn remove(&mut self, id: TaskId) -> Result<Tcb> {
        let slot = self
            .slots
            .get_mut(id.index as usize)
            .ok_or(KernError::InvalidObject)?;
        if slot.gen != id.gen || slot.tcb.is_none() {
            return Err(KernError::InvalidObject);
        }
        slot.gen = slot.gen.wrapping_add(1);
        Ok(slot.tcb.take().unwrap())
    }

    /// Look up a TCB, rejecting stale or empty handles.
    pub(crate) fn get(&self, id: TaskId) -> Result<&Tcb> {
        self.slots
            .get(id.index as usize)
            .filter(|s| s.gen == id.gen)
            .and_then(|s| s.tcb.as_ref())
            .ok_or(KernError::InvalidObject)
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> Result<&mut Tcb> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|s| s.gen == id.gen)
            .and_then(|s| s.tcb.as_mut())
            .ok_or(KernError::InvalidObject)
    }

    /// Panicking lookup for internal paths that hold a handle known to
    /// be live (queue links). A miss here is queue corruption.
    pub(crate) fn tcb(&self, id: TaskId) -> &Tcb {
        self.get(id)
            .expect("queue corruption: link refers to a dead task slot")
    }

    pub(crate) fn tcb_mut(&mut self, id: TaskId) -> &mut Tcb {
        self.get_mut(id)
            .expect("queue corruption: link refers to a dead task slot")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::DeliveryMode;
    use crate::task::{Affinity, TaskSpec};

    fn spec(tid: u64) -> TaskSpec {
        TaskSpec {
            tid,
            priority: 10,
            affinity: Affinity::ANY,
            delivery: DeliveryMode::KernelDirect,
            idle_on: None,
        }
    }

    #[test]
    fn stale_handle_is_rejected_after_reuse() {
        let mut table = TaskTable::new();
        let a = table.insert(Tcb::new(&spec(1)));
        table.remove(a).unwrap();
        let b = table.insert(Tcb::new(&spec(2)));

        // Same slot, new generation.
        assert_eq!(a.index, b.index);
        assert_ne!(a.gen, b.gen);
        assert_eq!(table.get(a).unwrap_err(), KernError::InvalidObject);
        assert_eq!(table.get(b).unwrap().tid, 2);
    }

    #[test]
    fn double_remove_fails() {
        let mut table = TaskTable::new();
        let a = table.insert(Tcb::new(&spec(1)));
        table.remove(a).unwrap();
        assert_eq!(table.remove(a).unwrap_err(), KernError::InvalidObject);
    }
}
