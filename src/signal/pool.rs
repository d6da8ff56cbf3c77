//! Fixed-size pending-signal entry pools.
//!
//! Two pools are carved out at boot: one for normal-context senders and
//! one reserved for interrupt context, so an interrupt-time `raise`
//! never touches the allocator. Exhaustion is an error return
//! (`PoolExhausted`), not a silent drop — producers in interrupt context
//! can at least count their failures.

use alloc::vec::Vec;

use crate::error::{KernError, Result};
use crate::signal::Signo;

/// Which pool a pending entry was drawn from; it is returned there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PoolClass {
    Normal,
    Interrupt,
}

/// A queued (pending or blocked) signal instance.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SigEntry {
    pub signo: Signo,
    pub payload: u64,
    pub class: PoolClass,
}

/// Handle to a pool slot. Only ever held by exactly one per-task queue
/// (pending, blocked, or the posted slot) at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryId {
    class: PoolClass,
    index: usize,
}

/// Both entry pools, sized once at boot.
pub(crate) struct SigPool {
    normal: Vec<Option<SigEntry>>,
    irq: Vec<Option<SigEntry>>,
    free_normal: Vec<usize>,
    free_irq: Vec<usize>,
}

impl SigPool {
    pub(crate) fn new(normal: usize, irq: usize) -> Self {
        let mut pool = Self {
            normal: Vec::new(),
            irq: Vec::new(),
            free_normal: Vec::with_capacity(normal),
            free_irq: Vec::with_capacity(irq),
        };
        pool.normal.resize_with(normal, || None);
        pool.irq.resize_with(irq, || None);
        pool.free_normal.extend((0..normal).rev());
        pool.free_irq.extend((0..irq).rev());
        pool
    }

    pub(crate) fn alloc(&mut self, class: PoolClass, signo: Signo, payload: u64) -> Result<EntryId> {
        let (slots, free) = match class {
            PoolClass::Normal => (&mut self.normal, &mut self.free_normal),
            PoolClass::Interrupt => (&mut self.irq, &mut self.free_irq),
        };
        let index = free.pop().ok_or(KernError::PoolExhausted)?;
        slots[index] = Some(SigEntry {
            signo,
            payload,
            class,
        });
        Ok(EntryId { class, index })
    }

    pub(crate) fn get(&self, id: EntryId) -> SigEntry {
        let slot = match id.class {
            PoolClass::Normal => &self.normal[id.index],
            PoolClass::Interrupt => &self.irq[id.index],
        };
        slot.expect("signal pool corruption: queued entry not allocated")
    }

    /// Return an entry to its originating pool.
    pub(crate) fn free(&mut self, id: EntryId) {
        let (slots, free) = match id.class {
            PoolClass::Normal => (&mut self.normal, &mut self.free_normal),
            PoolClass::Interrupt => (&mut self.irq, &mut self.free_irq),
        };
        assert!(
            slots[id.index].take().is_some(),
            "signal pool corruption: double free"
        );
        free.push(id.index);
    }

    #[cfg(test)]
    pub(crate) fn free_count(&self, class: PoolClass) -> usize {
        match class {
            PoolClass::Normal => self.free_normal.len(),
            PoolClass::Interrupt => self.free_irq.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_are_isolated_and_bounded() {
        let mut pool = SigPool::new(2, 1);
        let a = pool.alloc(PoolClass::Normal, Signo(1), 0).unwrap();
        let _b = pool.alloc(PoolClass::Normal, Signo(2), 0).unwrap();
        assert_eq!(
            pool.alloc(PoolClass::Normal, Signo(3), 0).unwrap_err(),
            KernError::PoolExhausted
        );
        // The interrupt reserve is untouched by normal exhaustion.
        let c = pool.alloc(PoolClass::Interrupt, Signo(4), 0).unwrap();
        assert_eq!(
            pool.alloc(PoolClass::Interrupt, Signo(5), 0).unwrap_err(),
            KernError::PoolExhausted
        );

        pool.free(a);
        pool.free(c);
        assert_eq!(pool.free_count(PoolClass::Normal), 1);
        assert_eq!(pool.free_count(PoolClass::Interrupt), 1);
        assert!(pool.alloc(PoolClass::Normal, Signo(6), 0).is_ok());
    }

    #[test]
    #[should_panic(expected = "double free")]
    fn double_free_is_fatal() {
        let mut pool = SigPool::new(1, 0);
        let a = pool.alloc(PoolClass::Normal, Signo(1), 0).unwrap();
        pool.free(a);
        pool.free(a);
    }
}
