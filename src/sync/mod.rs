//! Synchronization primitives
//!
//! The lowest layer of the kernel: everything above (scheduler, VFS, network)
//! is built on these.

pub mod semaphore;
pub mod spinlock;

pub use semaphore::Semaphore;
pub use spinlock::{IrqSpinlock, IrqSpinlockGuard, irq_depth};
