// =============================================================================
// keel — Critical-Section Lock
// =============================================================================
//
// The executive mutates shared state only inside one short critical
// section. On real hardware that section is a re-entrant,
// interrupt-disabling lock usable from any core; interrupt masking itself
// is architecture business and happens in the port's interrupt prologue,
// so what this type supplies portably is the mutual-exclusion half,
// backed by a spinlock.
//
// DISCIPLINE:
//   - Held only around a single structural mutation.
//   - Never held across a context switch or a handler/user-code call.
//     The `Executive` entry points extract what they need, drop the
//     guard, and only then call into the port.
// =============================================================================

use core::ops::{Deref, DerefMut};
use spin::{Mutex, MutexGuard};

/// The executive's critical-section lock.
///
/// A thin wrapper over a spinlock so the rest of the crate names the
/// *role* (interrupt-disabling critical section) rather than the
/// mechanism, and so the backing primitive can change without touching
/// call sites.
pub struct IrqLock<T> {
    inner: Mutex<T>,
}

impl<T> IrqLock<T> {
    /// Create a new unlocked critical section around `value`.
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Enter the critical section, spinning until it is free.
    pub fn lock(&self) -> IrqLockGuard<'_, T> {
        IrqLockGuard {
            guard: self.inner.lock(),
        }
    }
}

/// RAII guard for the critical section. Exiting scope leaves the
/// section.
pub struct IrqLockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for IrqLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_gives_exclusive_access() {
        let lock = IrqLock::new(0u32);
        {
            let mut g = lock.lock();
            *g += 1;
        }
        assert_eq!(*lock.lock(), 1);
    }
}
