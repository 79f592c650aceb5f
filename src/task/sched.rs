//! Round-robin scheduler
//!
//! Single-CPU, cooperative plus tick-driven preemption. The scheduler keeps a
//! thread table and one FIFO ready queue; `schedule()` rotates the current
//! thread out and the next Ready thread in. There is no stack switching here:
//! blocking is an explicit suspension point - a blocked thread's entry sits
//! in some resource's wait queue, its table state is Waiting, and `schedule()`
//! simply selects somebody else.
//!
//! State transitions go through `update_thread`; that is the single place the
//! ready queue and the state field are kept consistent.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use spin::RwLock;

use super::{DEFAULT_TIME_SLICE, Pid, Priority, Thread, ThreadState, Tid};
use crate::sync::IrqSpinlock;

struct SchedInner {
    /// All live threads, Zombies included until reaped
    threads: Vec<Thread>,
    /// FIFO ready queue (round-robin policy)
    ready: VecDeque<Tid>,
    /// Currently running thread
    current: Option<Tid>,
    /// Next tid to hand out
    next_tid: Tid,
}

impl SchedInner {
    const fn new() -> Self {
        Self {
            threads: Vec::new(),
            ready: VecDeque::new(),
            current: None,
            next_tid: 1,
        }
    }

    fn thread_mut(&mut self, tid: Tid) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.tid == tid)
    }

    fn thread(&self, tid: Tid) -> Option<&Thread> {
        self.threads.iter().find(|t| t.tid == tid)
    }
}

static SCHED: IrqSpinlock<SchedInner> = IrqSpinlock::new(SchedInner::new());

/// Hook invoked while a blocking loop spins waiting for progress
///
/// Defaults to a CPU pause. Hosted tests install `std::thread::yield_now`
/// so that cross-thread blocking loops make progress.
static RELAX_HOOK: RwLock<Option<fn()>> = RwLock::new(None);

/// Install the relax hook used by blocking loops
pub fn set_relax_hook(f: fn()) {
    *RELAX_HOOK.write() = Some(f);
}

/// Pause briefly inside a busy-wait loop
pub fn cpu_relax() {
    match *RELAX_HOOK.read() {
        Some(f) => f(),
        None => core::hint::spin_loop(),
    }
}

/// Create a kernel thread owned by process `pid`
///
/// The new thread starts Ready and is immediately eligible for selection.
pub fn spawn_thread(pid: Pid, priority: Priority) -> Tid {
    let mut sched = SCHED.lock();
    let tid = sched.next_tid;
    sched.next_tid += 1;
    sched.threads.push(Thread::new(tid, pid, priority));
    sched.ready.push_back(tid);
    tid
}

/// Transition a thread's state
///
/// Transitioning into Ready enqueues the thread on the ready queue (unless it
/// is already there); every other transition removes it. This is the only
/// place the ready queue membership is decided.
pub fn update_thread(tid: Tid, new_state: ThreadState) {
    let mut sched = SCHED.lock();

    let is_current = sched.current == Some(tid);
    let Some(thread) = sched.thread_mut(tid) else {
        return;
    };
    let old = thread.state;

    // waking the thread that is already on the CPU is a no-op
    if new_state == ThreadState::Ready && old == ThreadState::Running && is_current {
        return;
    }
    thread.state = new_state;

    match new_state {
        ThreadState::Ready => {
            if old != ThreadState::Ready && !sched.ready.contains(&tid) {
                sched.ready.push_back(tid);
            }
        }
        _ => {
            if let Some(pos) = sched.ready.iter().position(|&t| t == tid) {
                sched.ready.remove(pos);
            }
            if sched.current == Some(tid) && new_state != ThreadState::Running {
                sched.current = None;
            }
        }
    }
}

/// Pick the next Ready thread and make it current
///
/// The previously running thread, if still Running, goes to the back of the
/// ready queue (round robin). Returns the newly current tid, or None when
/// nothing is runnable.
pub fn schedule() -> Option<Tid> {
    let mut sched = SCHED.lock();

    // Rotate the current thread out if it is still runnable
    if let Some(cur) = sched.current {
        let requeue = match sched.thread_mut(cur) {
            Some(t) if t.state == ThreadState::Running => {
                t.state = ThreadState::Ready;
                true
            }
            _ => false,
        };
        if requeue {
            sched.ready.push_back(cur);
        }
    }

    let next = sched.ready.pop_front()?;
    if let Some(t) = sched.thread_mut(next) {
        t.state = ThreadState::Running;
        t.time_slice = DEFAULT_TIME_SLICE;
    }
    sched.current = Some(next);
    log::trace!("sched: switch to tid {}", next);
    Some(next)
}

/// Yield the CPU: re-queue the current thread and schedule
pub fn yield_now() {
    schedule();
    cpu_relax();
}

/// Currently running thread id
pub fn current_tid() -> Option<Tid> {
    SCHED.lock().current
}

/// Owning pid of the currently running thread
pub fn current_pid() -> Option<Pid> {
    let sched = SCHED.lock();
    let tid = sched.current?;
    sched.thread(tid).map(|t| t.pid)
}

/// Force a thread to be current (used by startup and by tests that drive
/// the scheduler by hand)
pub fn set_current(tid: Tid) {
    let mut sched = SCHED.lock();
    if let Some(pos) = sched.ready.iter().position(|&t| t == tid) {
        sched.ready.remove(pos);
    }
    if let Some(t) = sched.thread_mut(tid) {
        t.state = ThreadState::Running;
    }
    sched.current = Some(tid);
}

/// Leave the CPU idle with no current thread
pub fn clear_current() {
    let mut sched = SCHED.lock();
    if let Some(cur) = sched.current.take() {
        let requeue = match sched.thread_mut(cur) {
            Some(t) if t.state == ThreadState::Running => {
                t.state = ThreadState::Ready;
                true
            }
            _ => false,
        };
        if requeue {
            sched.ready.push_back(cur);
        }
    }
}

/// Observe a thread's state
pub fn thread_state(tid: Tid) -> Option<ThreadState> {
    SCHED.lock().thread(tid).map(|t| t.state)
}

/// Mark a thread Zombie (exit path); it stays in the table until reaped
pub fn exit_thread(tid: Tid) {
    update_thread(tid, ThreadState::Zombie);
}

/// Remove a Zombie thread from the table (wait collection)
pub fn reap_thread(tid: Tid) -> bool {
    let mut sched = SCHED.lock();
    match sched.threads.iter().position(|t| t.tid == tid) {
        Some(pos) if sched.threads[pos].state == ThreadState::Zombie => {
            sched.threads.remove(pos);
            true
        }
        _ => false,
    }
}

/// Scheduler tick: decrement the current thread's slice
///
/// Returns true when the slice is exhausted and the caller (the timer IRQ
/// path) should invoke `schedule()` on its way out.
pub fn sched_tick() -> bool {
    let mut sched = SCHED.lock();
    let Some(cur) = sched.current else {
        return false;
    };
    let Some(t) = sched.thread_mut(cur) else {
        return false;
    };
    t.time_slice = t.time_slice.saturating_sub(1);
    t.time_slice == 0
}

/// Serializes tests that drive the global scheduler state
#[cfg(test)]
pub(crate) static TEST_SCHED_LOCK: spin::Mutex<()> = spin::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_robin_rotation() {
        let _g = TEST_SCHED_LOCK.lock();
        let a = spawn_thread(0, 128);
        let b = spawn_thread(0, 128);
        let c = spawn_thread(0, 128);

        set_current(a);
        // a is Running; b and c wait their turn in spawn order
        let next = schedule().unwrap();
        assert_eq!(next, b);
        assert_eq!(thread_state(a), Some(ThreadState::Ready));

        let next = schedule().unwrap();
        assert_eq!(next, c);
        // a rotated to the back, comes around again
        let next = schedule().unwrap();
        assert_eq!(next, a);

        for t in [a, b, c] {
            exit_thread(t);
            assert!(reap_thread(t));
        }
    }

    #[test]
    fn waiting_thread_leaves_ready_queue() {
        let _g = TEST_SCHED_LOCK.lock();
        let a = spawn_thread(0, 128);
        let b = spawn_thread(0, 128);
        set_current(a);

        update_thread(b, ThreadState::Waiting);
        assert_eq!(thread_state(b), Some(ThreadState::Waiting));

        // With b parked, scheduling from a finds nobody else but a itself
        let next = schedule().unwrap();
        assert_eq!(next, a);

        // Waking b makes it selectable again
        update_thread(b, ThreadState::Ready);
        let next = schedule().unwrap();
        assert_eq!(next, b);

        for t in [a, b] {
            exit_thread(t);
            assert!(reap_thread(t));
        }
    }

    #[test]
    fn tick_exhausts_time_slice() {
        let _g = TEST_SCHED_LOCK.lock();
        let a = spawn_thread(0, 128);
        set_current(a);
        let mut fired = false;
        for _ in 0..DEFAULT_TIME_SLICE {
            fired = sched_tick();
        }
        assert!(fired, "slice should be exhausted after DEFAULT_TIME_SLICE ticks");
        exit_thread(a);
        assert!(reap_thread(a));
    }
}
