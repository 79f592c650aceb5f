//! Software timer callback infrastructure
//!
//! Timers live in one global list sorted by expiration tick; ties keep
//! insertion order. The timer interrupt calls [`check_timers`], which fires
//! every expired callback.
//!
//! A fired one-shot timer stays in the list: removal is the callback's job
//! (typically by calling [`timer_del`] on its own handle). A callback that
//! forgets will be invoked again on the next tick.

use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use crate::sync::IrqSpinlock;

/// Tag stamped into every live timer; a traversal that finds anything else
/// is walking freed or trampled memory and panics immediately.
pub const TIMER_MAGIC: u32 = 0x4b54_4d52; // "KTMR"

/// Timer handle for referencing a registered timer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Invalid/null timer handle
    pub const NULL: Self = Self(0);

    pub fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

static NEXT_TIMER_ID: AtomicU64 = AtomicU64::new(1);

/// Timer callback, receives the timer's opaque data word
pub type TimerCallback = fn(data: u64);

/// A registered software timer
pub struct Timer {
    magic: u32,
    /// Unique handle for cancellation
    pub handle: TimerHandle,
    /// Absolute expiration time in ticks
    pub expires: u64,
    /// Callback invoked on expiration
    pub callback: TimerCallback,
    /// Opaque data passed to the callback
    pub data: u64,
}

impl Timer {
    fn new(expires: u64, callback: TimerCallback, data: u64) -> Self {
        let id = NEXT_TIMER_ID.fetch_add(1, Ordering::Relaxed);
        Self {
            magic: TIMER_MAGIC,
            handle: TimerHandle(id),
            expires,
            callback,
            data,
        }
    }
}

fn check_magic(timer: &Timer) {
    if timer.magic != TIMER_MAGIC {
        panic!(
            "timer list corruption: handle {:?} magic {:#x}",
            timer.handle, timer.magic
        );
    }
}

/// Global timer list, sorted by expiration tick
static TIMERS: IrqSpinlock<Vec<Timer>> = IrqSpinlock::new(Vec::new());

/// Register a timer expiring at absolute tick `expires`
///
/// Inserted before the first strictly later entry, so timers sharing an
/// expiration tick fire in registration order.
pub fn timer_add(expires: u64, callback: TimerCallback, data: u64) -> TimerHandle {
    let timer = Timer::new(expires, callback, data);
    let handle = timer.handle;

    let mut timers = TIMERS.lock();
    for t in timers.iter() {
        check_magic(t);
    }
    let pos = timers
        .iter()
        .position(|t| t.expires > expires)
        .unwrap_or(timers.len());
    timers.insert(pos, timer);

    handle
}

/// Register a timer expiring `delay` ticks from now
pub fn timer_add_relative(delay: u64, callback: TimerCallback, data: u64) -> TimerHandle {
    timer_add(crate::time::jiffies() + delay, callback, data)
}

/// Cancel a timer. Returns true if it was still registered.
pub fn timer_del(handle: TimerHandle) -> bool {
    if !handle.is_valid() {
        return false;
    }
    let mut timers = TIMERS.lock();
    for t in timers.iter() {
        check_magic(t);
    }
    if let Some(pos) = timers.iter().position(|t| t.handle == handle) {
        timers.remove(pos);
        true
    } else {
        false
    }
}

/// Move an existing timer to a new expiration tick
///
/// Implemented as delete plus sorted re-insert, so the timer takes its new
/// place among equal expirations as the most recent arrival.
pub fn timer_mod(handle: TimerHandle, expires: u64) -> bool {
    if !handle.is_valid() {
        return false;
    }
    let mut timers = TIMERS.lock();
    let timer_opt = timers
        .iter()
        .position(|t| t.handle == handle)
        .map(|pos| timers.remove(pos));

    if let Some(mut timer) = timer_opt {
        check_magic(&timer);
        timer.expires = expires;
        let pos = timers
            .iter()
            .position(|t| t.expires > expires)
            .unwrap_or(timers.len());
        timers.insert(pos, timer);
        true
    } else {
        false
    }
}

/// Whether a timer is still registered
pub fn timer_pending(handle: TimerHandle) -> bool {
    TIMERS.lock().iter().any(|t| t.handle == handle)
}

/// Fire every timer whose expiration is at or before `now`
///
/// Called from the timer interrupt path. Callbacks run outside the list
/// lock. Fired entries are left in the list for their callbacks to delete.
pub fn check_timers(now: u64) {
    let expired: Vec<(TimerCallback, u64)> = {
        let timers = TIMERS.lock();
        let mut expired = Vec::new();
        for timer in timers.iter() {
            check_magic(timer);
            if timer.expires > now {
                // List is sorted, nothing further is expired
                break;
            }
            expired.push((timer.callback, timer.data));
        }
        expired
    };

    for (callback, data) in expired {
        callback(data);
    }
}

/// Ticks until the next timer expires; None when the list is empty
pub fn time_until_next(now: u64) -> Option<u64> {
    let timers = TIMERS.lock();
    let first = timers.first()?;
    check_magic(first);
    Some(first.expires.saturating_sub(now))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serializes tests that touch the global timer list
    static TEST_TIMER_LOCK: spin::Mutex<()> = spin::Mutex::new(());

    static FIRED: spin::Mutex<alloc::vec::Vec<u64>> = spin::Mutex::new(alloc::vec::Vec::new());

    fn record(data: u64) {
        FIRED.lock().push(data);
    }

    fn nop(_data: u64) {}

    #[test]
    fn list_sorts_with_ties_in_insertion_order() {
        let _g = TEST_TIMER_LOCK.lock();
        FIRED.lock().clear();

        // two timers share tick 10; the earlier registration must fire first
        let h50 = timer_add(50, record, 50);
        let h10a = timer_add(10, record, 101);
        let h30 = timer_add(30, record, 30);
        let h10b = timer_add(10, record, 102);

        {
            let timers = TIMERS.lock();
            let order: alloc::vec::Vec<u64> = timers.iter().map(|t| t.data).collect();
            assert_eq!(order, alloc::vec![101, 102, 30, 50]);
        }

        check_timers(30);
        assert_eq!(*FIRED.lock(), alloc::vec![101, 102, 30]);
        // fired entries stay registered until deleted
        assert!(timer_pending(h10a));
        assert!(timer_pending(h50));

        for h in [h50, h10a, h30, h10b] {
            timer_del(h);
        }
    }

    #[test]
    fn mod_requeues_behind_equal_expirations() {
        let _g = TEST_TIMER_LOCK.lock();

        let a = timer_add(20, nop, 1);
        let b = timer_add(5, nop, 2);
        assert!(timer_mod(b, 20));

        {
            let timers = TIMERS.lock();
            let order: alloc::vec::Vec<u64> = timers.iter().map(|t| t.data).collect();
            assert_eq!(order, alloc::vec![1, 2]);
        }

        assert!(timer_del(a));
        assert!(timer_del(b));
        assert!(!timer_del(b));
        assert!(!timer_del(TimerHandle::NULL));
    }

    #[test]
    #[should_panic(expected = "timer list corruption")]
    fn trampled_magic_is_fatal() {
        let mut timer = Timer::new(1, nop, 0);
        timer.magic = 0xdead_beef;
        check_magic(&timer);
    }
}
