//! Poll infrastructure
//!
//! Level-triggered I/O multiplexing. Each `do_poll` pass asks every watched
//! file for its ready mask while registering the caller on the file's wait
//! queues; if nothing is ready the caller parks until any registered queue
//! fires, then drops all registrations and scans again from the top. O(n)
//! per wake, by design the simplest thing that is correct.

use alloc::vec::Vec;
use alloc::sync::Arc;

use crate::fs::file::File;
use crate::task::sched::cpu_relax;
use crate::task::{self, ThreadState, Tid};
use crate::waitqueue::WaitQueue;

/// Data available for reading
pub const POLLIN: u16 = 0x0001;
/// Urgent data
pub const POLLPRI: u16 = 0x0002;
/// Ready for writing
pub const POLLOUT: u16 = 0x0004;
/// Error condition (output only)
pub const POLLERR: u16 = 0x0008;
/// Hang up (output only)
pub const POLLHUP: u16 = 0x0010;
/// Invalid request (output only)
pub const POLLNVAL: u16 = 0x0020;
/// Normal data readable
pub const POLLRDNORM: u16 = 0x0040;
/// Normal data writable
pub const POLLWRNORM: u16 = 0x0100;

/// Readable-event mask
pub const POLL_IN_EVENTS: u16 = POLLIN | POLLRDNORM;
/// Writable-event mask
pub const POLL_OUT_EVENTS: u16 = POLLOUT | POLLWRNORM;

/// Default mask for regular files: always ready both ways
pub const DEFAULT_POLLMASK: u16 = POLLIN | POLLOUT | POLLRDNORM | POLLWRNORM;

/// One wait-queue registration made during a scan
struct PollEntry {
    /// Queue we registered on. The caller holds the file alive for the
    /// whole call, and the queue lives in the file, so the pointer stays
    /// valid for the entry's lifetime.
    wait_queue: *const WaitQueue,
    tid: Tid,
}

unsafe impl Send for PollEntry {}

/// Per-call poll state; dropping it removes every registration
pub struct PollContext {
    pub task: Option<Tid>,
    entries: Vec<PollEntry>,
}

impl PollContext {
    pub fn new(task: Option<Tid>) -> Self {
        Self {
            task,
            entries: Vec::new(),
        }
    }

    fn add_entry(&mut self, wq: &WaitQueue) {
        if let Some(tid) = self.task {
            wq.register_poller(tid);
            self.entries.push(PollEntry {
                wait_queue: wq as *const WaitQueue,
                tid,
            });
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    /// Whether any registered queue already consumed our entry (a wake
    /// happened since the scan)
    fn any_fired(&self) -> bool {
        self.entries.iter().any(|entry| {
            // Safety: the registered queues outlive the context (see PollEntry)
            let wq = unsafe { &*entry.wait_queue };
            !wq.contains(entry.tid)
        })
    }
}

impl Drop for PollContext {
    fn drop(&mut self) {
        for entry in self.entries.drain(..) {
            // Safety: the registered queues outlive the context (see PollEntry)
            let wq = unsafe { &*entry.wait_queue };
            wq.remove_waiter(entry.tid);
        }
    }
}

/// Handed to `FileOps::poll` so drivers can register the poller
pub struct PollTable<'a> {
    ctx: &'a mut PollContext,
    /// Event mask of interest
    pub key: u16,
    enabled: bool,
}

impl<'a> PollTable<'a> {
    pub fn new(ctx: &'a mut PollContext) -> Self {
        Self {
            ctx,
            key: 0,
            enabled: true,
        }
    }

    /// Register interest in a wait queue; called from FileOps::poll
    pub fn poll_wait(&mut self, wq: &WaitQueue) {
        if self.enabled {
            self.ctx.add_entry(wq);
        }
    }

    /// Stop registering (a ready descriptor was already found)
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn set_key(&mut self, events: u16) {
        // error and hangup are always of interest
        self.key = events | POLLERR | POLLHUP;
    }
}

/// One watched file in a poll call
pub struct PollRequest {
    pub file: Arc<File>,
    /// Requested events
    pub events: u16,
    /// Returned events, filled by `do_poll`
    pub revents: u16,
}

impl PollRequest {
    pub fn new(file: Arc<File>, events: u16) -> Self {
        Self {
            file,
            events,
            revents: 0,
        }
    }
}

/// Single scan over the watched files
///
/// Registers `ctx` on every file's wait queues (unless a ready descriptor
/// already disabled registration) and fills in `revents`. Returns the number
/// of ready files.
pub fn poll_scan(reqs: &mut [PollRequest], ctx: &mut PollContext) -> usize {
    let mut count = 0;
    for req in reqs.iter_mut() {
        let mut pt = PollTable::new(ctx);
        pt.set_key(req.events);
        let mask = req.file.f_op.poll(&req.file, Some(&mut pt));
        req.revents = mask & (req.events | POLLERR | POLLHUP | POLLNVAL);
        if req.revents != 0 {
            count += 1;
        }
    }
    count
}

fn park_current(tid: Tid, ctx: &PollContext) {
    // go Waiting first so any wake from here on transitions us back to
    // Ready; then check for a wake that slipped in during the scan
    task::update_thread(tid, ThreadState::Waiting);
    if ctx.any_fired() {
        task::set_current(tid);
        return;
    }
    task::schedule();
    while task::thread_state(tid) == Some(ThreadState::Waiting) {
        cpu_relax();
    }
    task::set_current(tid);
}

/// Block until at least one watched file is ready
///
/// Every pass re-registers from scratch and the registrations are dropped
/// before sleeping again, so a file added to the ready set between passes is
/// always noticed (level-triggered).
pub fn do_poll(reqs: &mut [PollRequest]) -> usize {
    if reqs.is_empty() {
        return 0;
    }
    let tid = task::current_tid();
    loop {
        let mut ctx = PollContext::new(tid);
        let count = poll_scan(reqs, &mut ctx);
        if count > 0 {
            return count;
        }
        match tid {
            Some(tid) => park_current(tid, &ctx),
            None => cpu_relax(),
        }
        // ctx drops here: stale registrations leave their wait queues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::dentry::Dentry;
    use crate::fs::file::FileOps;
    use crate::KernelResult;
    use crate::task::sched::TEST_SCHED_LOCK;
    use crate::task::{exit_thread, reap_thread, set_current, spawn_thread};
    use alloc::string::String;
    use core::sync::atomic::{AtomicBool, Ordering};

    struct GatedFile {
        ready: AtomicBool,
        wq: WaitQueue,
    }

    impl GatedFile {
        fn new() -> Self {
            Self {
                ready: AtomicBool::new(false),
                wq: WaitQueue::new(),
            }
        }

        fn make_ready(&self) {
            self.ready.store(true, Ordering::Release);
            self.wq.wake_all();
        }
    }

    struct GatedOps;

    impl FileOps for GatedOps {
        fn as_any(&self) -> &dyn core::any::Any {
            self
        }

        fn read(&self, _file: &File, _buf: &mut [u8]) -> KernelResult<usize> {
            Ok(0)
        }

        fn poll(&self, file: &File, pt: Option<&mut PollTable>) -> u16 {
            let gate = GATES.lock();
            let gated = &gate[file.get_pos() as usize];
            if let Some(pt) = pt {
                pt.poll_wait(&gated.wq);
            }
            if gated.ready.load(Ordering::Acquire) {
                POLL_IN_EVENTS
            } else {
                0
            }
        }
    }

    static GATED_OPS: GatedOps = GatedOps;
    static GATES: spin::Mutex<alloc::vec::Vec<GatedFile>> = spin::Mutex::new(alloc::vec::Vec::new());

    fn gated_file(index: usize) -> Arc<File> {
        let dentry = Arc::new(Dentry::new_anonymous(String::from("gated"), None));
        let f = File::new(dentry, crate::fs::file::flags::O_RDONLY, &GATED_OPS);
        // stash the gate index in the (otherwise unused) file position
        f.set_pos(index as u64);
        f
    }

    #[test]
    fn scan_reports_ready_count_and_registrations() {
        let _g = TEST_SCHED_LOCK.lock();
        {
            let mut gates = GATES.lock();
            gates.clear();
            gates.push(GatedFile::new());
            gates.push(GatedFile::new());
        }

        let tid = spawn_thread(0, 128);
        set_current(tid);

        let mut reqs = [
            PollRequest::new(gated_file(0), POLLIN),
            PollRequest::new(gated_file(1), POLLIN),
        ];

        // first scan: nothing ready, two registrations recorded
        let mut ctx = PollContext::new(Some(tid));
        assert_eq!(poll_scan(&mut reqs, &mut ctx), 0);
        assert_eq!(ctx.entry_count(), 2);
        {
            let gates = GATES.lock();
            assert_eq!(gates[0].wq.len(), 1);
            assert_eq!(gates[1].wq.len(), 1);
        }
        drop(ctx);
        // dropping the context removed the registrations
        {
            let gates = GATES.lock();
            assert!(gates[0].wq.is_empty());
            assert!(gates[1].wq.is_empty());
        }

        // second scan sees the state change
        GATES.lock()[1].ready.store(true, Ordering::Release);
        let mut ctx = PollContext::new(Some(tid));
        assert_eq!(poll_scan(&mut reqs, &mut ctx), 1);
        assert_eq!(reqs[0].revents, 0);
        assert_eq!(reqs[1].revents & POLLIN, POLLIN);
        drop(ctx);

        exit_thread(tid);
        assert!(reap_thread(tid));
    }

    #[test]
    fn do_poll_wakes_on_readiness() {
        let _g = TEST_SCHED_LOCK.lock();
        crate::task::sched::set_relax_hook(std::thread::yield_now);
        {
            let mut gates = GATES.lock();
            gates.clear();
            gates.push(GatedFile::new());
        }

        let tid = spawn_thread(0, 128);
        set_current(tid);

        let waker = std::thread::spawn(|| {
            for _ in 0..64 {
                std::thread::yield_now();
            }
            GATES.lock()[0].make_ready();
        });

        let mut reqs = [PollRequest::new(gated_file(0), POLLIN)];
        let n = do_poll(&mut reqs);
        assert_eq!(n, 1);
        assert_eq!(reqs[0].revents & POLLIN, POLLIN);
        waker.join().unwrap();

        // no stale registration survives the call
        assert!(GATES.lock()[0].wq.is_empty());

        exit_thread(tid);
        assert!(reap_thread(tid));
    }
}
