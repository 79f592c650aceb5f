//! Threads, processes and scheduling
//!
//! One schedulable execution context is a [`Thread`]; a [`Process`] owns its
//! threads together with the filesystem context (root/cwd) and the open file
//! table. Threads reference their process by pid, never by pointer: a thread
//! record never outlives its process entry.

pub mod sched;

use alloc::sync::Arc;

use spin::RwLock;

use crate::fs::dentry::Dentry;
use crate::fs::fd::FdTable;
use crate::sync::IrqSpinlock;

pub use sched::{
    current_tid, exit_thread, reap_thread, schedule, set_current, spawn_thread, thread_state,
    update_thread, yield_now,
};

/// Thread identifier
pub type Tid = u32;

/// Process identifier
pub type Pid = u32;

/// Scheduling priority (higher runs first within the ready queue policy)
pub type Priority = u8;

/// User identifier (mode-bit storage only; no enforcement)
pub type Uid = u32;

/// Group identifier
pub type Gid = u32;

/// Thread lifecycle states
///
/// Transitions are driven exclusively by `update_thread` calls from the
/// synchronization primitives and the scheduler tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Eligible for `schedule()` to select
    Ready,
    /// Currently executing
    Running,
    /// Parked on a wait queue
    Waiting,
    /// Suspended (job control)
    Stopped,
    /// Exited, awaiting collection
    Zombie,
}

/// One schedulable execution context
#[derive(Debug)]
pub struct Thread {
    /// Thread ID
    pub tid: Tid,
    /// Owning process (id reference - the process owns the thread record)
    pub pid: Pid,
    /// Current lifecycle state
    pub state: ThreadState,
    /// Scheduling priority
    pub priority: Priority,
    /// Remaining time slice in ticks
    pub time_slice: u32,
}

/// Default time slice in timer ticks
pub const DEFAULT_TIME_SLICE: u32 = 10;

impl Thread {
    fn new(tid: Tid, pid: Pid, priority: Priority) -> Self {
        Self {
            tid,
            pid,
            state: ThreadState::Ready,
            priority,
            time_slice: DEFAULT_TIME_SLICE,
        }
    }
}

/// Per-process filesystem context (root and working directory)
#[derive(Default)]
pub struct FsStruct {
    /// Root dentry for absolute lookups (None until the first mount)
    pub root: RwLock<Option<Arc<Dentry>>>,
    /// Current working directory for relative lookups
    pub cwd: RwLock<Option<Arc<Dentry>>>,
}

impl FsStruct {
    pub const fn new() -> Self {
        Self {
            root: RwLock::new(None),
            cwd: RwLock::new(None),
        }
    }

    pub fn root(&self) -> Option<Arc<Dentry>> {
        self.root.read().clone()
    }

    pub fn cwd(&self) -> Option<Arc<Dentry>> {
        self.cwd.read().clone()
    }

    pub fn set_root(&self, dentry: Arc<Dentry>) {
        *self.root.write() = Some(dentry);
    }

    pub fn set_cwd(&self, dentry: Arc<Dentry>) {
        *self.cwd.write() = Some(dentry);
    }
}

/// A process: filesystem context plus open file table
pub struct Process {
    /// Process ID
    pub pid: Pid,
    /// Root/cwd context used by path resolution
    pub fs: FsStruct,
    /// Open file descriptor table
    pub fds: FdTable,
}

impl Process {
    pub fn new(pid: Pid) -> Arc<Self> {
        Arc::new(Self {
            pid,
            fs: FsStruct::new(),
            fds: FdTable::new(),
        })
    }
}

/// Global process table
static PROCESSES: IrqSpinlock<alloc::vec::Vec<Arc<Process>>> = IrqSpinlock::new(alloc::vec::Vec::new());

/// Register a process in the global table
pub fn register_process(proc: Arc<Process>) {
    PROCESSES.lock().push(proc);
}

/// Look up a process by pid
pub fn find_process(pid: Pid) -> Option<Arc<Process>> {
    PROCESSES.lock().iter().find(|p| p.pid == pid).cloned()
}

/// Remove a process from the global table (after wait collection)
pub fn unregister_process(pid: Pid) -> Option<Arc<Process>> {
    let mut table = PROCESSES.lock();
    let pos = table.iter().position(|p| p.pid == pid)?;
    Some(table.remove(pos))
}

/// The process of the currently running thread
///
/// Falls back to pid 0 (the kernel process) when no thread is current.
pub fn current_process() -> Option<Arc<Process>> {
    let pid = sched::current_pid().unwrap_or(0);
    find_process(pid)
}
