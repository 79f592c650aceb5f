//! Inode - file object representation
//!
//! An inode represents a file object independent of its name(s) in the
//! directory tree. The operation table is chosen once, at creation, from the
//! mode bits, and never changes for the life of the inode.

use alloc::string::String;
use alloc::sync::{Arc, Weak};
use core::sync::atomic::{AtomicU16, AtomicU32, AtomicU64, Ordering};

use spin::RwLock;

use super::superblock::SuperBlock;
use crate::{KernelError, KernelResult};

pub use crate::chardev::DevId;
pub use crate::task::{Gid, Uid};

/// Unique inode identifier within a filesystem
pub type InodeId = u64;

/// File type bits (matches S_IFMT)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum FileType {
    Regular = 0o100000,
    Directory = 0o040000,
    Symlink = 0o120000,
    CharDev = 0o020000,
    BlockDev = 0o060000,
    Fifo = 0o010000,
    Socket = 0o140000,
}

impl FileType {
    pub fn from_mode(mode: u16) -> Option<Self> {
        match mode & 0o170000 {
            0o100000 => Some(FileType::Regular),
            0o040000 => Some(FileType::Directory),
            0o120000 => Some(FileType::Symlink),
            0o020000 => Some(FileType::CharDev),
            0o060000 => Some(FileType::BlockDev),
            0o010000 => Some(FileType::Fifo),
            0o140000 => Some(FileType::Socket),
            _ => None,
        }
    }
}

/// Inode mode (file type + permission bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeMode(pub u16);

impl InodeMode {
    pub fn regular(perm: u16) -> Self {
        Self((FileType::Regular as u16) | (perm & 0o7777))
    }

    pub fn directory(perm: u16) -> Self {
        Self((FileType::Directory as u16) | (perm & 0o7777))
    }

    pub fn chardev(perm: u16) -> Self {
        Self((FileType::CharDev as u16) | (perm & 0o7777))
    }

    pub fn blockdev(perm: u16) -> Self {
        Self((FileType::BlockDev as u16) | (perm & 0o7777))
    }

    pub fn fifo(perm: u16) -> Self {
        Self((FileType::Fifo as u16) | (perm & 0o7777))
    }

    pub fn socket() -> Self {
        Self((FileType::Socket as u16) | 0o600)
    }

    pub fn file_type(&self) -> Option<FileType> {
        FileType::from_mode(self.0)
    }

    pub fn is_dir(&self) -> bool {
        self.file_type() == Some(FileType::Directory)
    }

    pub fn is_file(&self) -> bool {
        self.file_type() == Some(FileType::Regular)
    }

    pub fn is_chrdev(&self) -> bool {
        self.file_type() == Some(FileType::CharDev)
    }

    pub fn is_blkdev(&self) -> bool {
        self.file_type() == Some(FileType::BlockDev)
    }

    pub fn is_device(&self) -> bool {
        self.is_chrdev() || self.is_blkdev()
    }

    pub fn is_fifo(&self) -> bool {
        self.file_type() == Some(FileType::Fifo)
    }

    /// Permission bits (lower 12 bits)
    pub fn perm(&self) -> u16 {
        self.0 & 0o7777
    }

    pub fn raw(&self) -> u16 {
        self.0
    }
}

/// Inode operations trait - filesystem-specific behavior
///
/// Directory-tree operations default to `OperationNotSupported`; a filesystem
/// implements exactly the slots it backs.
pub trait InodeOps: Send + Sync {
    /// Look up a child entry in a directory inode
    fn lookup(&self, dir: &Inode, name: &str) -> KernelResult<Arc<Inode>>;

    /// Create a regular file in a directory
    fn create(&self, dir: &Inode, name: &str, mode: InodeMode) -> KernelResult<Arc<Inode>> {
        let _ = (dir, name, mode);
        Err(KernelError::OperationNotSupported)
    }

    /// Create a device node in a directory
    fn mknod(
        &self,
        dir: &Inode,
        name: &str,
        mode: InodeMode,
        rdev: DevId,
    ) -> KernelResult<Arc<Inode>> {
        let _ = (dir, name, mode, rdev);
        Err(KernelError::OperationNotSupported)
    }

    /// Create a directory
    fn mkdir(&self, dir: &Inode, name: &str, mode: InodeMode) -> KernelResult<Arc<Inode>> {
        let _ = (dir, name, mode);
        Err(KernelError::OperationNotSupported)
    }

    /// Remove a non-directory entry
    fn unlink(&self, dir: &Inode, name: &str) -> KernelResult<()> {
        let _ = (dir, name);
        Err(KernelError::OperationNotSupported)
    }

    /// Remove an empty directory
    fn rmdir(&self, dir: &Inode, name: &str) -> KernelResult<()> {
        let _ = (dir, name);
        Err(KernelError::OperationNotSupported)
    }

    /// Move `old_name` in `old_dir` to `new_name` in `new_dir`
    ///
    /// The VFS has already done the POSIX legality checks and removed any
    /// replaced target; in-memory filesystems only adjust their bookkeeping
    /// (the dentry relink happens in the caller).
    fn rename(
        &self,
        old_dir: &Inode,
        old_name: &str,
        new_dir: &Arc<Inode>,
        new_name: &str,
    ) -> KernelResult<()> {
        let _ = (old_dir, old_name, new_dir, new_name);
        Err(KernelError::OperationNotSupported)
    }

    /// Truncate or extend a file to `length`
    fn truncate(&self, inode: &Inode, length: u64) -> KernelResult<()> {
        let _ = (inode, length);
        Err(KernelError::OperationNotSupported)
    }

    fn getattr(&self, inode: &Inode) -> InodeAttr {
        InodeAttr {
            ino: inode.ino,
            mode: inode.mode(),
            uid: inode.uid(),
            gid: inode.gid(),
            size: inode.size.load(Ordering::Relaxed),
            nlink: inode.nlink.load(Ordering::Relaxed),
            rdev: inode.rdev,
            mtime: inode.mtime(),
        }
    }
}

/// Attributes returned by getattr
#[derive(Debug, Clone)]
pub struct InodeAttr {
    pub ino: InodeId,
    pub mode: InodeMode,
    pub uid: Uid,
    pub gid: Gid,
    pub size: u64,
    pub nlink: u32,
    pub rdev: DevId,
    /// Last modification, in ticks since boot
    pub mtime: u64,
}

/// Trait for downcasting filesystem-private data to concrete types
pub trait AsAny: Send + Sync {
    fn as_any(&self) -> &dyn core::any::Any;
}

/// Filesystem-specific data attached to an inode
pub trait InodeData: Send + Sync + AsAny {}

/// The inode structure
pub struct Inode {
    /// Inode number (unique within the filesystem)
    pub ino: InodeId,

    /// File mode, atomic for chmod
    mode: AtomicU16,

    uid: AtomicU32,
    gid: AtomicU32,

    /// File size in bytes
    pub size: AtomicU64,

    /// Link count
    pub nlink: AtomicU32,

    /// Device ID for char/block nodes, null otherwise
    pub rdev: DevId,

    /// Last modification, in ticks since boot
    mtime: AtomicU64,

    /// Back pointer to the owning superblock
    pub sb: Weak<SuperBlock>,

    /// Inode operations, fixed at creation from the mode bits
    pub i_op: &'static dyn InodeOps,

    /// Filesystem-specific private data (ramfs file contents live here)
    pub private: RwLock<Option<Arc<dyn InodeData>>>,
}

impl Inode {
    pub fn new(
        ino: InodeId,
        mode: InodeMode,
        sb: Weak<SuperBlock>,
        i_op: &'static dyn InodeOps,
    ) -> Self {
        Self {
            ino,
            mode: AtomicU16::new(mode.0),
            uid: AtomicU32::new(0),
            gid: AtomicU32::new(0),
            size: AtomicU64::new(0),
            nlink: AtomicU32::new(1),
            rdev: DevId::null(),
            mtime: AtomicU64::new(crate::time::current_ticks()),
            sb,
            i_op,
            private: RwLock::new(None),
        }
    }

    /// Create an inode for a device node
    pub fn new_device(
        ino: InodeId,
        mode: InodeMode,
        rdev: DevId,
        sb: Weak<SuperBlock>,
        i_op: &'static dyn InodeOps,
    ) -> Self {
        let mut inode = Self::new(ino, mode, sb, i_op);
        inode.rdev = rdev;
        inode
    }

    pub fn mode(&self) -> InodeMode {
        InodeMode(self.mode.load(Ordering::Acquire))
    }

    /// Update permission bits, preserving the file type
    pub fn set_mode_perm(&self, perm: u16) {
        loop {
            let old = self.mode.load(Ordering::Acquire);
            let new = (old & 0o170000) | (perm & 0o7777);
            if self
                .mode
                .compare_exchange_weak(old, new, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
        }
    }

    pub fn uid(&self) -> Uid {
        self.uid.load(Ordering::Acquire)
    }

    pub fn gid(&self) -> Gid {
        self.gid.load(Ordering::Acquire)
    }

    pub fn set_owner(&self, uid: Uid, gid: Gid) {
        self.uid.store(uid, Ordering::Release);
        self.gid.store(gid, Ordering::Release);
    }

    pub fn get_size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    pub fn set_size(&self, size: u64) {
        self.size.store(size, Ordering::Release);
    }

    pub fn mtime(&self) -> u64 {
        self.mtime.load(Ordering::Acquire)
    }

    pub fn touch(&self) {
        self.mtime
            .store(crate::time::current_ticks(), Ordering::Release);
    }

    pub fn inc_nlink(&self) {
        self.nlink.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dec_nlink(&self) -> u32 {
        let prev = self.nlink.fetch_sub(1, Ordering::AcqRel);
        prev.saturating_sub(1)
    }

    pub fn get_nlink(&self) -> u32 {
        self.nlink.load(Ordering::Acquire)
    }

    pub fn superblock(&self) -> Option<Arc<SuperBlock>> {
        self.sb.upgrade()
    }

    pub fn set_private(&self, data: Arc<dyn InodeData>) {
        *self.private.write() = Some(data);
    }

    pub fn get_private(&self) -> Option<Arc<dyn InodeData>> {
        self.private.read().clone()
    }
}

/// Split a path's final component from its directory prefix
///
/// `"/a/b/c"` becomes `("/a/b", "c")`. Trailing slashes belong to the
/// component they follow and are stripped by the caller.
pub fn split_parent(path: &str) -> (String, String) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => (String::from("/"), String::from(&trimmed[1..])),
        Some(pos) => (String::from(&trimmed[..pos]), String::from(&trimmed[pos + 1..])),
        None => (String::from("."), String::from(trimmed)),
    }
}
