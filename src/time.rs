//! Tick bookkeeping
//!
//! The periodic timer interrupt advances a global tick counter (jiffies).
//! Everything time-related in the kernel (timer expirations, scheduler time
//! slices, uptime) is denominated in ticks.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::task::sched;
use crate::timer;

/// Timer interrupt frequency in ticks per second
pub const HZ: u64 = 100;

static JIFFIES: AtomicU64 = AtomicU64::new(0);

/// Pluggable tick source; None means the interrupt-driven jiffies counter
static TICK_SOURCE: spin::RwLock<Option<fn() -> u64>> = spin::RwLock::new(None);

/// Override the tick source (hardware TSC path, or a fixed clock in tests)
pub fn set_tick_source(f: fn() -> u64) {
    *TICK_SOURCE.write() = Some(f);
}

/// Ticks since boot
pub fn jiffies() -> u64 {
    match *TICK_SOURCE.read() {
        Some(f) => f(),
        None => JIFFIES.load(Ordering::Acquire),
    }
}

/// Ticks since boot (interface alias used by filesystem timestamps)
pub fn current_ticks() -> u64 {
    jiffies()
}

/// Whole seconds since boot
pub fn get_seconds() -> u64 {
    jiffies() / HZ
}

/// Whole seconds since boot
pub fn uptime_secs() -> u64 {
    get_seconds()
}

/// Timer interrupt body: advance the clock, fire expired timers, and
/// preempt the current thread if its slice ran out.
pub fn timer_tick() {
    let now = JIFFIES.fetch_add(1, Ordering::AcqRel) + 1;
    timer::check_timers(now);
    if sched::sched_tick() {
        sched::schedule();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jiffies_advance_monotonically() {
        let _g = crate::task::sched::TEST_SCHED_LOCK.lock();
        let before = jiffies();
        timer_tick();
        timer_tick();
        assert!(jiffies() >= before + 2);
        assert_eq!(uptime_secs(), jiffies() / HZ);
    }
}
