//! File - open file description
//!
//! A `File` is one open of an inode: position, flags, and the operation
//! table selected for the file's type. Several descriptors may share one
//! `File` after dup.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use super::dentry::Dentry;
use super::inode::{FileType, Inode, InodeId};
use crate::poll::{DEFAULT_POLLMASK, PollTable};
use crate::{KernelError, KernelResult};

/// Open file flags (O_*)
pub mod flags {
    pub const O_RDONLY: u32 = 0;
    pub const O_WRONLY: u32 = 1;
    pub const O_RDWR: u32 = 2;
    /// Access mode mask
    pub const O_ACCMODE: u32 = 3;

    pub const O_CREAT: u32 = 0o100;
    pub const O_EXCL: u32 = 0o200;
    pub const O_TRUNC: u32 = 0o1000;
    pub const O_APPEND: u32 = 0o2000;
    pub const O_NONBLOCK: u32 = 0o4000;
    pub const O_DIRECTORY: u32 = 0o200000;
}

/// Seek whence values
pub mod seek {
    pub const SEEK_SET: i32 = 0;
    pub const SEEK_CUR: i32 = 1;
    pub const SEEK_END: i32 = 2;
}

/// Directory entry yielded by readdir
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub ino: InodeId,
    pub file_type: FileType,
    pub name: Vec<u8>,
}

/// File operations trait
///
/// Slots a file type does not support fall through to explicit
/// `OperationNotSupported` defaults.
pub trait FileOps: Send + Sync {
    /// Self as Any, for downcasting to the concrete ops type
    fn as_any(&self) -> &dyn core::any::Any;

    /// Read at the current position
    fn read(&self, file: &File, buf: &mut [u8]) -> KernelResult<usize>;

    /// Write at the current position
    fn write(&self, file: &File, buf: &[u8]) -> KernelResult<usize> {
        let _ = (file, buf);
        Err(KernelError::OperationNotSupported)
    }

    /// Reposition the file offset
    fn llseek(&self, file: &File, offset: i64, whence: i32) -> KernelResult<u64> {
        let inode = file.get_inode().ok_or(KernelError::BadFd)?;
        let size = inode.get_size();

        let new_pos = match whence {
            seek::SEEK_SET => {
                if offset < 0 {
                    return Err(KernelError::InvalidArgument);
                }
                offset as u64
            }
            seek::SEEK_CUR => {
                let cur = file.get_pos();
                if offset < 0 {
                    cur.checked_sub((-offset) as u64)
                        .ok_or(KernelError::InvalidArgument)?
                } else {
                    cur.saturating_add(offset as u64)
                }
            }
            seek::SEEK_END => {
                if offset < 0 {
                    size.checked_sub((-offset) as u64)
                        .ok_or(KernelError::InvalidArgument)?
                } else {
                    size.saturating_add(offset as u64)
                }
            }
            _ => return Err(KernelError::InvalidArgument),
        };

        file.set_pos(new_pos);
        Ok(new_pos)
    }

    /// Enumerate directory entries; the callback returns false to stop
    fn readdir(
        &self,
        file: &File,
        callback: &mut dyn FnMut(DirEntry) -> bool,
    ) -> KernelResult<()> {
        let _ = (file, callback);
        Err(KernelError::NotDirectory)
    }

    /// Sync file data to backing store
    fn fsync(&self, _file: &File) -> KernelResult<()> {
        Ok(())
    }

    /// Called when the last reference to the file is dropped
    fn release(&self, _file: &File) {}

    /// Report ready events, registering on wait queues via `pt`
    fn poll(&self, _file: &File, _pt: Option<&mut PollTable>) -> u16 {
        DEFAULT_POLLMASK
    }
}

/// Open file description
pub struct File {
    /// Dentry this file was opened from
    pub dentry: Arc<Dentry>,

    /// Current position
    pos: AtomicU64,

    /// Open flags
    f_lock: Mutex<u32>,

    /// File operations for this open
    pub f_op: &'static dyn FileOps,
}

impl File {
    pub fn new(dentry: Arc<Dentry>, flags: u32, f_op: &'static dyn FileOps) -> Arc<Self> {
        Arc::new(Self {
            dentry,
            pos: AtomicU64::new(0),
            f_lock: Mutex::new(flags),
            f_op,
        })
    }

    pub fn get_inode(&self) -> Option<Arc<Inode>> {
        self.dentry.get_inode()
    }

    pub fn get_pos(&self) -> u64 {
        self.pos.load(Ordering::Relaxed)
    }

    pub fn set_pos(&self, pos: u64) {
        self.pos.store(pos, Ordering::Relaxed);
    }

    pub fn advance_pos(&self, n: u64) -> u64 {
        self.pos.fetch_add(n, Ordering::Relaxed)
    }

    pub fn get_flags(&self) -> u32 {
        *self.f_lock.lock()
    }

    pub fn set_flags(&self, flags: u32) {
        *self.f_lock.lock() = flags;
    }

    /// Whether the access mode permits reads
    pub fn readable(&self) -> bool {
        let acc = self.get_flags() & flags::O_ACCMODE;
        acc == flags::O_RDONLY || acc == flags::O_RDWR
    }

    /// Whether the access mode permits writes
    pub fn writable(&self) -> bool {
        let acc = self.get_flags() & flags::O_ACCMODE;
        acc == flags::O_WRONLY || acc == flags::O_RDWR
    }

    pub fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        if !self.readable() {
            return Err(KernelError::BadFd);
        }
        self.f_op.read(self, buf)
    }

    pub fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        if !self.writable() {
            return Err(KernelError::BadFd);
        }
        self.f_op.write(self, buf)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        self.f_op.release(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::String;

    struct NopOps;

    impl FileOps for NopOps {
        fn as_any(&self) -> &dyn core::any::Any {
            self
        }

        fn read(&self, _file: &File, _buf: &mut [u8]) -> KernelResult<usize> {
            Ok(0)
        }
    }

    static NOP_OPS: NopOps = NopOps;

    fn anon_file(open_flags: u32) -> Arc<File> {
        let dentry = Arc::new(Dentry::new_anonymous(String::from("test"), None));
        File::new(dentry, open_flags, &NOP_OPS)
    }

    #[test]
    fn access_mode_gates_direction() {
        let rd = anon_file(flags::O_RDONLY);
        assert!(rd.readable());
        assert!(!rd.writable());
        assert_eq!(rd.write(b"x"), Err(KernelError::BadFd));

        let wr = anon_file(flags::O_WRONLY);
        assert!(!wr.readable());
        let mut buf = [0u8; 4];
        assert_eq!(wr.read(&mut buf), Err(KernelError::BadFd));

        let rw = anon_file(flags::O_RDWR);
        assert!(rw.readable() && rw.writable());
        // write slot was never provided by the ops table
        assert_eq!(rw.write(b"x"), Err(KernelError::OperationNotSupported));
    }
}
