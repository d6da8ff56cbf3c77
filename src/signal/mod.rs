//! Asynchronous signal delivery.
//!
//! Per-task state machine: a raised signal that the target's mask blocks
//! parks in a separately tracked *blocked* queue; an unmasked one joins
//! the FIFO *pending-action* queue; dispatch moves one entry at a time
//! into the *posted* slot while its handler runs. The pending queue is
//! drained strictly FIFO, independent of scheduling priority.
//!
//! Entries are drawn from fixed pools established at boot (`pool`), so
//! interrupt-context senders never allocate. The executive's `raise` /
//! `dispatch` entry points own the locking and the interaction with the
//! scheduler and semaphore subsystems; this module owns the per-task
//! bookkeeping.

mod pool;

pub(crate) use pool::{EntryId, PoolClass, SigPool};

use alloc::collections::VecDeque;
use bitflags::bitflags;

use crate::config::NSIG;

bitflags! {
    /// A set of signal numbers; bit `n` stands for signal `n`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SigSet: u32 {
        /// Every signal.
        const ALL = u32::MAX;
    }
}

impl SigSet {
    /// The set containing exactly `signo`.
    pub fn of(signo: Signo) -> Self {
        SigSet::from_bits_retain(1u32 << signo.0)
    }

    /// Whether `signo` is a member.
    pub fn has(&self, signo: Signo) -> bool {
        self.bits() & (1u32 << signo.0) != 0
    }
}

/// A signal number, `0..NSIG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signo(pub u8);

impl Signo {
    /// Whether the number is in range.
    pub fn is_valid(&self) -> bool {
        (self.0 as usize) < NSIG
    }
}

/// The termination signal. Never maskable and never ignorable: a
/// registered action for it acts as a cleanup handler that runs first,
/// unconditionally followed by immediate termination.
pub const SIG_TERM: Signo = Signo(15);

// ── Actions ─────────────────────────────────────────────────────

/// How a task's signal handlers are invoked. Chosen once at task
/// creation — the dispatch path never re-decides per signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    /// Handlers are kernel function pointers, called directly.
    KernelDirect,
    /// Handlers live across a privilege boundary; dispatch goes through
    /// the port's trampoline.
    UserTrampoline,
}

/// A registered handler.
#[derive(Debug, Clone, Copy)]
pub enum Handler {
    /// In-kernel handler: called with the signal number and payload.
    Kernel(fn(Signo, u64)),
    /// Entry point of an unprivileged handler, reached via the port
    /// trampoline.
    User(usize),
}

/// Signal-number registration: handler plus the additional signals to
/// mask while it runs.
#[derive(Debug, Clone, Copy)]
pub struct Action {
    pub handler: Handler,
    /// Masked *in addition to* the task's current mask and the signal's
    /// own bit for the duration of the handler.
    pub mask: SigSet,
}

// ── Per-task signal state ───────────────────────────────────────

#[derive(Debug)]
pub(crate) struct SigState {
    /// Signals currently blocked from delivery.
    pub mask: SigSet,
    /// Registered actions, indexed by signal number.
    pub actions: [Option<Action>; NSIG],
    /// Deliverable entries, strictly FIFO.
    pub pending: VecDeque<EntryId>,
    /// Entries that arrived while masked; re-examined whenever the mask
    /// shrinks.
    pub blocked: VecDeque<EntryId>,
    /// The at-most-one entry whose handler is currently executing.
    pub posted: Option<EntryId>,
    /// Invocation variant for this task's handlers.
    pub mode: DeliveryMode,
}

impl SigState {
    pub(crate) fn new(mode: DeliveryMode) -> Self {
        Self {
            mask: SigSet::empty(),
            actions: [None; NSIG],
            pending: VecDeque::new(),
            blocked: VecDeque::new(),
            posted: None,
            mode,
        }
    }

    /// Move every blocked entry the current mask no longer covers into
    /// the pending queue, preserving arrival order in both queues. Run
    /// whenever the mask shrinks (handler-return restore, `sig_set_mask`).
    pub(crate) fn requeue_unblocked(&mut self, pool: &SigPool) {
        let mut still_blocked = VecDeque::new();
        while let Some(id) = self.blocked.pop_front() {
            if self.mask.has(pool.get(id).signo) {
                still_blocked.push_back(id);
            } else {
                self.pending.push_back(id);
            }
        }
        self.blocked = still_blocked;
    }

    /// Whether a dispatch point has work to do.
    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain every queue slot back into the pools (task termination).
    pub(crate) fn drain_all(&mut self, pool: &mut SigPool) {
        for id in self.pending.drain(..) {
            pool.free(id);
        }
        for id in self.blocked.drain(..) {
            pool.free(id);
        }
        if let Some(id) = self.posted.take() {
            pool.free(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sigset_membership() {
        let set = SigSet::of(Signo(3)) | SigSet::of(Signo(7));
        assert!(set.has(Signo(3)));
        assert!(set.has(Signo(7)));
        assert!(!set.has(Signo(4)));
        assert!(SigSet::ALL.has(SIG_TERM));
    }

    #[test]
    fn requeue_preserves_fifo_order() {
        let mut pool = SigPool::new(4, 0);
        let mut sig = SigState::new(DeliveryMode::KernelDirect);
        sig.mask = SigSet::of(Signo(1)) | SigSet::of(Signo(2));

        let a = pool.alloc(PoolClass::Normal, Signo(1), 0).unwrap();
        let b = pool.alloc(PoolClass::Normal, Signo(2), 0).unwrap();
        let c = pool.alloc(PoolClass::Normal, Signo(1), 0).unwrap();
        sig.blocked.extend([a, b, c]);

        // Unmask signal 1 only: a and c become deliverable, in order.
        sig.mask = SigSet::of(Signo(2));
        sig.requeue_unblocked(&pool);
        assert_eq!(sig.pending, [a, c]);
        assert_eq!(sig.blocked, [b]);
    }
}
