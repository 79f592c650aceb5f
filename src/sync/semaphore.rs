//! Counting semaphore with FIFO hand-off
//!
//! `release()` never bumps the count while somebody is waiting: the permit is
//! handed directly to the head waiter. A late arrival can therefore never
//! barge past a thread that blocked earlier.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::sync::IrqSpinlock;
use crate::task::sched::{self, cpu_relax};
use crate::task::{self, ThreadState, Tid};

struct SemInner {
    /// Free permits (only meaningful while no thread waits)
    count: u32,
    /// Maximum permits
    capacity: u32,
    /// Blocked acquirers, oldest first
    waiters: VecDeque<Tid>,
    /// Permits handed to specific waiters, not yet collected
    granted: Vec<Tid>,
}

/// A counting semaphore
pub struct Semaphore {
    inner: IrqSpinlock<SemInner>,
}

impl Semaphore {
    /// Create a semaphore with `initial` free permits out of `capacity`
    ///
    /// A mutex is `new(1, 1)`; a signaling semaphore (pipe item counter,
    /// packet-arrival notification) starts at `new(0, capacity)`.
    pub const fn new(initial: u32, capacity: u32) -> Self {
        Self {
            inner: IrqSpinlock::new(SemInner {
                count: initial,
                capacity,
                waiters: VecDeque::new(),
                granted: Vec::new(),
            }),
        }
    }

    /// Acquire a permit without blocking
    pub fn try_acquire(&self) -> bool {
        let mut s = self.inner.lock();
        if s.count > 0 && s.waiters.is_empty() {
            s.count -= 1;
            true
        } else {
            false
        }
    }

    /// Acquire a permit, blocking until one is available
    ///
    /// The waiter enqueue happens under the same lock as the permit check, so
    /// a release between check and park cannot be lost.
    pub fn acquire(&self) {
        let tid = sched::current_tid();
        loop {
            {
                let mut s = self.inner.lock();
                if let Some(tid) = tid {
                    if let Some(pos) = s.granted.iter().position(|&t| t == tid) {
                        s.granted.remove(pos);
                        return;
                    }
                }
                if s.count > 0 && s.waiters.is_empty() {
                    s.count -= 1;
                    return;
                }
                if let Some(tid) = tid {
                    if !s.waiters.contains(&tid) {
                        s.waiters.push_back(tid);
                    }
                    task::update_thread(tid, ThreadState::Waiting);
                }
            }
            if tid.is_some() {
                task::schedule();
            }
            cpu_relax();
        }
    }

    /// Return a permit
    ///
    /// If a thread is waiting, the permit goes straight to the head of the
    /// queue and the count is untouched. Releases beyond capacity are dropped.
    pub fn release(&self) {
        let woken = {
            let mut s = self.inner.lock();
            match s.waiters.pop_front() {
                Some(tid) => {
                    s.granted.push(tid);
                    Some(tid)
                }
                None => {
                    if s.count < s.capacity {
                        s.count += 1;
                    }
                    None
                }
            }
        };
        if let Some(tid) = woken {
            task::update_thread(tid, ThreadState::Ready);
        }
    }

    /// Free permits currently available
    pub fn permits(&self) -> u32 {
        self.inner.lock().count
    }

    /// Number of blocked acquirers
    pub fn waiter_count(&self) -> usize {
        self.inner.lock().waiters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::sched::{TEST_SCHED_LOCK, clear_current, set_relax_hook};
    use crate::task::{exit_thread, reap_thread, spawn_thread, thread_state};

    #[test]
    fn permits_count_down_and_up() {
        let sem = Semaphore::new(2, 2);
        assert!(sem.try_acquire());
        assert!(sem.try_acquire());
        assert!(!sem.try_acquire());
        sem.release();
        assert_eq!(sem.permits(), 1);
        // releases beyond capacity are dropped
        sem.release();
        sem.release();
        assert_eq!(sem.permits(), 2);
    }

    #[test]
    fn release_hands_off_in_fifo_order() {
        let _g = TEST_SCHED_LOCK.lock();
        let sem = Semaphore::new(1, 1);
        assert!(sem.try_acquire());

        let a = spawn_thread(0, 128);
        let b = spawn_thread(0, 128);
        let c = spawn_thread(0, 128);
        {
            let mut s = sem.inner.lock();
            for t in [a, b, c] {
                s.waiters.push_back(t);
            }
        }
        for t in [a, b, c] {
            crate::task::update_thread(t, ThreadState::Waiting);
        }

        sem.release();
        sem.release();
        sem.release();

        // permits went straight to the waiters, oldest first
        let s = sem.inner.lock();
        assert_eq!(s.granted, alloc::vec![a, b, c]);
        assert_eq!(s.count, 0);
        drop(s);
        assert_eq!(thread_state(a), Some(ThreadState::Ready));
        assert_eq!(thread_state(c), Some(ThreadState::Ready));

        for t in [a, b, c] {
            exit_thread(t);
            assert!(reap_thread(t));
        }
    }

    #[test]
    fn blocked_acquirer_proceeds_after_release() {
        let _g = TEST_SCHED_LOCK.lock();
        clear_current();
        set_relax_hook(std::thread::yield_now);

        let sem = std::sync::Arc::new(Semaphore::new(0, 1));
        let done = std::sync::Arc::new(core::sync::atomic::AtomicBool::new(false));

        let sem2 = sem.clone();
        let done2 = done.clone();
        let h = std::thread::spawn(move || {
            sem2.acquire();
            done2.store(true, core::sync::atomic::Ordering::Release);
        });

        assert!(!done.load(core::sync::atomic::Ordering::Acquire));
        sem.release();
        h.join().unwrap();
        assert!(done.load(core::sync::atomic::Ordering::Acquire));
    }
}
