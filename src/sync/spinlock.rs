//! IRQ-safe spinlock
//!
//! A spinlock that disables interrupt delivery for as long as it is held.
//! On a single-CPU machine this is what prevents the timer IRQ handler from
//! observing (or deadlocking against) a half-updated structure.
//!
//! Interrupt masking is modeled as a global disable depth: `lock()` bumps it,
//! guard drop restores it. An architecture port maps the depth transitions
//! 0->1 and 1->0 onto cli/sti.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::{Mutex, MutexGuard};

/// Global interrupt-disable depth (0 = interrupts enabled)
static IRQ_DEPTH: AtomicUsize = AtomicUsize::new(0);

/// Current interrupt-disable depth
pub fn irq_depth() -> usize {
    IRQ_DEPTH.load(Ordering::Acquire)
}

fn irq_disable() {
    IRQ_DEPTH.fetch_add(1, Ordering::AcqRel);
}

fn irq_enable() {
    let prev = IRQ_DEPTH.fetch_sub(1, Ordering::AcqRel);
    debug_assert!(prev > 0, "irq_enable without matching irq_disable");
}

/// A spinlock whose critical sections run with interrupts disabled
pub struct IrqSpinlock<T> {
    inner: Mutex<T>,
}

impl<T> IrqSpinlock<T> {
    /// Create a new IRQ-safe spinlock
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock, disabling interrupts first
    ///
    /// The interrupt state is restored when the guard is dropped.
    pub fn lock(&self) -> IrqSpinlockGuard<'_, T> {
        irq_disable();
        IrqSpinlockGuard {
            guard: self.inner.lock(),
        }
    }

    /// Try to acquire the lock without spinning
    pub fn try_lock(&self) -> Option<IrqSpinlockGuard<'_, T>> {
        irq_disable();
        match self.inner.try_lock() {
            Some(guard) => Some(IrqSpinlockGuard { guard }),
            None => {
                irq_enable();
                None
            }
        }
    }
}

/// Guard for an acquired [`IrqSpinlock`]
pub struct IrqSpinlockGuard<'a, T> {
    guard: MutexGuard<'a, T>,
}

impl<T> Deref for IrqSpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for IrqSpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for IrqSpinlockGuard<'_, T> {
    fn drop(&mut self) {
        irq_enable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_tracks_irq_depth() {
        let lock = IrqSpinlock::new(7u32);
        let before = irq_depth();
        {
            let guard = lock.lock();
            assert_eq!(*guard, 7);
            assert_eq!(irq_depth(), before + 1);
        }
        assert_eq!(irq_depth(), before);
    }

    #[test]
    fn try_lock_restores_depth_on_contention() {
        let lock = IrqSpinlock::new(());
        let before = irq_depth();
        let held = lock.lock();
        assert!(lock.try_lock().is_none());
        assert_eq!(irq_depth(), before + 1);
        drop(held);
        assert_eq!(irq_depth(), before);
    }
}
