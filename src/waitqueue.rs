//! Wait queue infrastructure for blocking synchronization
//!
//! A wait queue is owned by the resource being waited on (a semaphore, a
//! pipe, a poll target). Threads park on it in FIFO order and are woken by
//! `wake_one()`/`wake_all()`.
//!
//! Invariant: a thread's entry is removed from every wait queue it joined
//! before the thread goes back on the ready queue, so a later wake cannot
//! reference a stale entry.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::sync::IrqSpinlock;
use crate::task::{self, ThreadState, Tid};

/// An entry in a wait queue
#[derive(Debug)]
pub struct WaitQueueEntry {
    /// Parked thread
    pub tid: Tid,
    /// Set when a wake has been delivered to this entry
    woken: AtomicBool,
}

impl WaitQueueEntry {
    fn new(tid: Tid) -> Self {
        Self {
            tid,
            woken: AtomicBool::new(false),
        }
    }
}

/// A FIFO wait queue
///
/// Wake operations may run from interrupt context, so the waiter list lives
/// under an IRQ-safe spinlock.
pub struct WaitQueue {
    waiters: IrqSpinlock<Vec<WaitQueueEntry>>,
}

impl WaitQueue {
    /// Create a new empty wait queue
    pub const fn new() -> Self {
        Self {
            waiters: IrqSpinlock::new(Vec::new()),
        }
    }

    /// Park thread `tid` on this queue
    ///
    /// Marks the thread Waiting and appends its entry; the enqueue and the
    /// state transition happen before the caller reaches `schedule()`, which
    /// is what closes the lost-wakeup window together with the caller's
    /// condition re-check.
    pub fn wait_on(&self, tid: Tid) {
        {
            let mut waiters = self.waiters.lock();
            waiters.push(WaitQueueEntry::new(tid));
        }
        task::update_thread(tid, ThreadState::Waiting);
    }

    /// Register `tid` without changing its scheduling state
    ///
    /// Poll uses this: the poller keeps running while registered and only
    /// parks itself once every scan came back empty.
    pub fn register_poller(&self, tid: Tid) {
        let mut waiters = self.waiters.lock();
        if !waiters.iter().any(|e| e.tid == tid) {
            waiters.push(WaitQueueEntry::new(tid));
        }
    }

    /// Park the current thread and schedule somebody else
    pub fn wait(&self) {
        if let Some(tid) = task::current_tid() {
            self.wait_on(tid);
            task::schedule();
        }
    }

    /// Wake the head waiter (FIFO). Returns the woken tid, if any.
    pub fn wake_one(&self) -> Option<Tid> {
        let entry = {
            let mut waiters = self.waiters.lock();
            if waiters.is_empty() {
                return None;
            }
            waiters.remove(0)
        };
        entry.woken.store(true, Ordering::Release);
        task::update_thread(entry.tid, ThreadState::Ready);
        Some(entry.tid)
    }

    /// Wake every waiter. Returns the number woken.
    pub fn wake_all(&self) -> usize {
        let entries: Vec<WaitQueueEntry> = {
            let mut waiters = self.waiters.lock();
            core::mem::take(&mut *waiters)
        };
        let count = entries.len();
        for entry in entries {
            entry.woken.store(true, Ordering::Release);
            task::update_thread(entry.tid, ThreadState::Ready);
        }
        count
    }

    /// Remove a specific thread's entry without waking it
    ///
    /// Used by poll-table cleanup: the poller re-registers on every scan and
    /// must drop stale registrations before it is rescheduled.
    pub fn remove_waiter(&self, tid: Tid) -> bool {
        let mut waiters = self.waiters.lock();
        match waiters.iter().position(|e| e.tid == tid) {
            Some(pos) => {
                waiters.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Whether `tid` currently has an entry on this queue
    pub fn contains(&self, tid: Tid) -> bool {
        self.waiters.lock().iter().any(|e| e.tid == tid)
    }

    /// Whether the queue has no waiters
    pub fn is_empty(&self) -> bool {
        self.waiters.lock().is_empty()
    }

    /// Number of parked threads
    pub fn len(&self) -> usize {
        self.waiters.lock().len()
    }
}

impl Default for WaitQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::sched::TEST_SCHED_LOCK;
    use crate::task::{exit_thread, reap_thread, spawn_thread, thread_state};

    #[test]
    fn wake_order_is_fifo() {
        let _g = TEST_SCHED_LOCK.lock();
        let wq = WaitQueue::new();
        let a = spawn_thread(0, 128);
        let b = spawn_thread(0, 128);
        let c = spawn_thread(0, 128);

        wq.wait_on(a);
        wq.wait_on(b);
        wq.wait_on(c);
        assert_eq!(wq.len(), 3);
        assert_eq!(thread_state(a), Some(ThreadState::Waiting));

        assert_eq!(wq.wake_one(), Some(a));
        assert_eq!(wq.wake_one(), Some(b));
        assert_eq!(wq.wake_one(), Some(c));
        assert_eq!(wq.wake_one(), None);
        assert_eq!(thread_state(c), Some(ThreadState::Ready));

        for t in [a, b, c] {
            exit_thread(t);
            assert!(reap_thread(t));
        }
    }

    #[test]
    fn remove_waiter_skips_wake() {
        let _g = TEST_SCHED_LOCK.lock();
        let wq = WaitQueue::new();
        let a = spawn_thread(0, 128);
        let b = spawn_thread(0, 128);

        wq.wait_on(a);
        wq.wait_on(b);
        assert!(wq.remove_waiter(a));
        assert!(!wq.remove_waiter(a));

        // a was removed without being woken; b is still first in line
        assert_eq!(thread_state(a), Some(ThreadState::Waiting));
        assert_eq!(wq.wake_one(), Some(b));
        assert!(wq.is_empty());

        for t in [a, b] {
            exit_thread(t);
            assert!(reap_thread(t));
        }
    }

    #[test]
    fn wake_all_empties_queue() {
        let _g = TEST_SCHED_LOCK.lock();
        let wq = WaitQueue::new();
        assert_eq!(wq.wake_all(), 0);

        let a = spawn_thread(0, 128);
        let b = spawn_thread(0, 128);
        wq.wait_on(a);
        wq.wait_on(b);
        assert_eq!(wq.wake_all(), 2);
        assert!(wq.is_empty());

        for t in [a, b] {
            exit_thread(t);
            assert!(reap_thread(t));
        }
    }
}
