//! Synchronization primitives internal to the executive.

mod irqlock;

pub use irqlock::{IrqLock, IrqLockGuard};
