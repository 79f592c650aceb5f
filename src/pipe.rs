//! Anonymous pipes
//!
//! A pipe is a fixed-capacity byte ring shared by a read end and a write
//! end. Three counters (readers, writers, open file objects) are kept under
//! the pipe's semaphore; the backing buffer is released exactly once, when
//! the last of the three reaches zero. Bytes come out in the order they went
//! in, across any interleaving of writers.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use core::cmp::min;

use crate::fs::dentry::Dentry;
use crate::fs::fd::Fd;
use crate::fs::file::{File, FileOps, flags};
use crate::fs::inode::{AsAny, Inode, InodeData, InodeMode, InodeOps};
use crate::poll::{POLL_IN_EVENTS, POLL_OUT_EVENTS, POLLERR, POLLHUP, PollTable};
use crate::sync::{IrqSpinlock, Semaphore};
use crate::task;
use crate::task::sched::cpu_relax;
use crate::waitqueue::WaitQueue;
use crate::{KernelError, KernelResult};

/// Pipe capacity in bytes
pub const PIPE_SIZE: usize = 4096;

#[cfg(test)]
pub(crate) static PIPE_FREES: core::sync::atomic::AtomicUsize =
    core::sync::atomic::AtomicUsize::new(0);

struct PipeRing {
    /// Backing store; taken (freed) exactly once at teardown
    buf: Option<Vec<u8>>,
    head: usize,
    len: usize,
}

struct PipeCounts {
    readers: u32,
    writers: u32,
    files: u32,
}

/// Shared pipe object
pub struct Pipe {
    ring: IrqSpinlock<PipeRing>,
    /// Guards the counter triple and the teardown decision
    sem: Semaphore,
    counts: IrqSpinlock<PipeCounts>,
    /// Readers sleep here for data
    pub data_wq: WaitQueue,
    /// Writers sleep here for space
    pub space_wq: WaitQueue,
}

impl Pipe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            ring: IrqSpinlock::new(PipeRing {
                buf: Some(vec![0u8; PIPE_SIZE]),
                head: 0,
                len: 0,
            }),
            sem: Semaphore::new(1, 1),
            counts: IrqSpinlock::new(PipeCounts {
                readers: 1,
                writers: 1,
                files: 2,
            }),
            data_wq: WaitQueue::new(),
            space_wq: WaitQueue::new(),
        })
    }

    fn buffered(&self) -> usize {
        self.ring.lock().len
    }

    fn writers(&self) -> u32 {
        self.counts.lock().writers
    }

    fn readers(&self) -> u32 {
        self.counts.lock().readers
    }

    /// Pop up to `buf.len()` bytes; returns 0 only on an empty ring
    fn pop(&self, buf: &mut [u8]) -> usize {
        let mut ring = self.ring.lock();
        let n = min(buf.len(), ring.len);
        let Some(data) = ring.buf.as_ref() else {
            return 0;
        };
        for (i, b) in buf[..n].iter_mut().enumerate() {
            *b = data[(ring.head + i) % PIPE_SIZE];
        }
        ring.head = (ring.head + n) % PIPE_SIZE;
        ring.len -= n;
        n
    }

    /// Push as much of `buf` as fits; returns bytes accepted
    fn push(&self, buf: &[u8]) -> usize {
        let mut ring = self.ring.lock();
        let n = min(buf.len(), PIPE_SIZE - ring.len);
        let head = ring.head;
        let len = ring.len;
        let Some(data) = ring.buf.as_mut() else {
            return 0;
        };
        for (i, &b) in buf[..n].iter().enumerate() {
            data[(head + len + i) % PIPE_SIZE] = b;
        }
        ring.len += n;
        n
    }

    /// Blocking read
    ///
    /// Returns 0 (EOF) once the ring is empty and every writer is gone.
    pub fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            let n = self.pop(buf);
            if n > 0 {
                self.space_wq.wake_all();
                return Ok(n);
            }
            if self.writers() == 0 {
                return Ok(0);
            }
            self.data_wq.wait();
            cpu_relax();
        }
    }

    /// Blocking write
    ///
    /// With no readers left every write fails with `BrokenPipe`. Otherwise
    /// blocks until at least one byte fits, then accepts what fits.
    pub fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if self.readers() == 0 {
                return Err(KernelError::BrokenPipe);
            }
            let n = self.push(buf);
            if n > 0 {
                self.data_wq.wake_all();
                return Ok(n);
            }
            self.space_wq.wait();
            cpu_relax();
        }
    }

    fn teardown_check(&self) {
        // the semaphore serializes the check so two droppers cannot both
        // see the counters hit zero
        self.sem.acquire();
        let free = {
            let counts = self.counts.lock();
            counts.readers == 0 && counts.writers == 0 && counts.files == 0
        };
        if free {
            let taken = self.ring.lock().buf.take();
            if taken.is_some() {
                #[cfg(test)]
                PIPE_FREES.fetch_add(1, core::sync::atomic::Ordering::AcqRel);
            }
        }
        self.sem.release();
    }

    fn release_reader(&self) {
        {
            let mut counts = self.counts.lock();
            counts.readers = counts.readers.saturating_sub(1);
        }
        // writers blocked on space must see the hangup
        self.space_wq.wake_all();
        self.teardown_check();
    }

    fn release_writer(&self) {
        {
            let mut counts = self.counts.lock();
            counts.writers = counts.writers.saturating_sub(1);
        }
        // readers blocked on data must see EOF
        self.data_wq.wake_all();
        self.teardown_check();
    }

    fn release_file(&self) {
        {
            let mut counts = self.counts.lock();
            counts.files = counts.files.saturating_sub(1);
        }
        self.teardown_check();
    }
}

struct PipeData {
    pipe: Arc<Pipe>,
}

impl AsAny for PipeData {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

impl InodeData for PipeData {}

fn pipe_of(file: &File) -> KernelResult<Arc<Pipe>> {
    let inode = file.get_inode().ok_or(KernelError::BadFd)?;
    let private = inode.get_private().ok_or(KernelError::BadFd)?;
    let data = private
        .as_any()
        .downcast_ref::<PipeData>()
        .ok_or(KernelError::BadFd)?;
    Ok(data.pipe.clone())
}

struct PipeInodeOps;

impl InodeOps for PipeInodeOps {
    fn lookup(&self, _dir: &Inode, _name: &str) -> KernelResult<Arc<Inode>> {
        Err(KernelError::NotDirectory)
    }
}

static PIPE_INODE_OPS: PipeInodeOps = PipeInodeOps;

/// Read-end file operations
pub struct PipeReadOps;

impl FileOps for PipeReadOps {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }

    fn read(&self, file: &File, buf: &mut [u8]) -> KernelResult<usize> {
        pipe_of(file)?.read(buf)
    }

    fn write(&self, _file: &File, _buf: &[u8]) -> KernelResult<usize> {
        Err(KernelError::BadFd)
    }

    fn llseek(&self, _file: &File, _offset: i64, _whence: i32) -> KernelResult<u64> {
        Err(KernelError::IllegalSeek)
    }

    fn release(&self, file: &File) {
        if let Ok(pipe) = pipe_of(file) {
            pipe.release_reader();
            pipe.release_file();
        }
    }

    fn poll(&self, file: &File, pt: Option<&mut PollTable>) -> u16 {
        let Ok(pipe) = pipe_of(file) else {
            return POLLERR;
        };
        if let Some(pt) = pt {
            pt.poll_wait(&pipe.data_wq);
        }
        let mut mask = 0;
        if pipe.buffered() > 0 {
            mask |= POLL_IN_EVENTS;
        }
        if pipe.writers() == 0 {
            mask |= POLLHUP;
        }
        mask
    }
}

pub static PIPE_READ_OPS: PipeReadOps = PipeReadOps;

/// Write-end file operations
pub struct PipeWriteOps;

impl FileOps for PipeWriteOps {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }

    fn read(&self, _file: &File, _buf: &mut [u8]) -> KernelResult<usize> {
        Err(KernelError::BadFd)
    }

    fn write(&self, file: &File, buf: &[u8]) -> KernelResult<usize> {
        pipe_of(file)?.write(buf)
    }

    fn llseek(&self, _file: &File, _offset: i64, _whence: i32) -> KernelResult<u64> {
        Err(KernelError::IllegalSeek)
    }

    fn release(&self, file: &File) {
        if let Ok(pipe) = pipe_of(file) {
            pipe.release_writer();
            pipe.release_file();
        }
    }

    fn poll(&self, file: &File, pt: Option<&mut PollTable>) -> u16 {
        let Ok(pipe) = pipe_of(file) else {
            return POLLERR;
        };
        if let Some(pt) = pt {
            pt.poll_wait(&pipe.space_wq);
        }
        let mut mask = 0;
        if pipe.buffered() < PIPE_SIZE {
            mask |= POLL_OUT_EVENTS;
        }
        if pipe.readers() == 0 {
            mask |= POLLERR;
        }
        mask
    }
}

pub static PIPE_WRITE_OPS: PipeWriteOps = PipeWriteOps;

/// Build the two pipe-end files
pub fn pipe_files() -> (Arc<File>, Arc<File>) {
    let pipe = Pipe::new();
    let inode = Arc::new(Inode::new(
        0,
        InodeMode::fifo(0o600),
        alloc::sync::Weak::new(),
        &PIPE_INODE_OPS,
    ));
    inode.set_private(Arc::new(PipeData { pipe }));

    let rd_dentry = Arc::new(Dentry::new_anonymous(String::from("pipe:r"), Some(inode.clone())));
    let wr_dentry = Arc::new(Dentry::new_anonymous(String::from("pipe:w"), Some(inode)));

    let rd = File::new(rd_dentry, flags::O_RDONLY, &PIPE_READ_OPS);
    let wr = File::new(wr_dentry, flags::O_WRONLY, &PIPE_WRITE_OPS);
    (rd, wr)
}

/// pipe(): install the two ends in the lowest free descriptors
///
/// Read end lands on the lower number.
pub fn do_pipe() -> KernelResult<(Fd, Fd)> {
    let proc = task::current_process().ok_or(KernelError::NoProcess)?;
    let (rd, wr) = pipe_files();
    let rfd = proc.fds.install(rd)?;
    let wfd = match proc.fds.install(wr) {
        Ok(fd) => fd,
        Err(e) => {
            let _ = proc.fds.close(rfd);
            return Err(e);
        }
    };
    Ok((rfd, wfd))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::Ordering;
    use crate::task::sched::TEST_SCHED_LOCK;

    #[test]
    fn bytes_come_out_in_order() {
        let _g = TEST_SCHED_LOCK.lock();
        let (rd, wr) = pipe_files();

        assert_eq!(wr.write(b"abc"), Ok(3));
        assert_eq!(wr.write(b"defg"), Ok(4));

        let mut buf = [0u8; 2];
        assert_eq!(rd.read(&mut buf), Ok(2));
        assert_eq!(&buf, b"ab");
        let mut rest = [0u8; 16];
        assert_eq!(rd.read(&mut rest), Ok(5));
        assert_eq!(&rest[..5], b"cdefg");
    }

    #[test]
    fn wrong_direction_is_rejected() {
        let _g = TEST_SCHED_LOCK.lock();
        let (rd, wr) = pipe_files();
        let mut buf = [0u8; 4];
        // both the descriptor access mode and the op table refuse
        assert_eq!(rd.write(b"x"), Err(KernelError::BadFd));
        assert_eq!(wr.read(&mut buf), Err(KernelError::BadFd));
    }

    #[test]
    fn eof_and_broken_pipe() {
        let _g = TEST_SCHED_LOCK.lock();
        let (rd, wr) = pipe_files();
        wr.write(b"tail").unwrap();
        drop(wr);

        let mut buf = [0u8; 8];
        assert_eq!(rd.read(&mut buf), Ok(4));
        // writers gone, ring drained: EOF, not a block
        assert_eq!(rd.read(&mut buf), Ok(0));

        let (rd2, wr2) = pipe_files();
        drop(rd2);
        assert_eq!(wr2.write(b"x"), Err(KernelError::BrokenPipe));
    }

    #[test]
    fn buffer_freed_exactly_once() {
        let _g = TEST_SCHED_LOCK.lock();
        PIPE_FREES.store(0, Ordering::Release);

        let (rd, wr) = pipe_files();
        wr.write(b"data").unwrap();
        drop(wr);
        assert_eq!(PIPE_FREES.load(Ordering::Acquire), 0);
        drop(rd);
        assert_eq!(PIPE_FREES.load(Ordering::Acquire), 1);
    }

    #[test]
    fn do_pipe_takes_lowest_fds() {
        let _g = TEST_SCHED_LOCK.lock();
        let _fs = crate::fs::TEST_FS_LOCK.lock();
        crate::task::register_process(crate::task::Process::new(0));

        let (rfd, wfd) = do_pipe().unwrap();
        assert_eq!((rfd, wfd), (0, 1));

        let proc = crate::task::current_process().unwrap();
        proc.fds.close(rfd).unwrap();
        proc.fds.close(wfd).unwrap();
        crate::task::unregister_process(0);
    }
}
