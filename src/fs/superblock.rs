//! Superblock - filesystem instance representation
//!
//! Each mounted filesystem has a superblock holding filesystem-wide state.
//! Filesystem drivers register a [`FileSystemType`] by name; mounting looks
//! the type up and calls its mount function to build a superblock.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU64, Ordering};

use spin::{Mutex, RwLock};

use super::dentry::Dentry;
use super::file::FileOps;
use super::inode::{AsAny, Inode, InodeId, InodeMode, InodeOps};
use crate::{KernelError, KernelResult};

/// Ramfs magic number
pub const RAMFS_MAGIC: u64 = 0x858458f6;
/// Devfs magic number
pub const DEVFS_MAGIC: u64 = 0x1373;

/// Superblock operations trait
pub trait SuperOps: Send + Sync {
    /// Allocate a new inode on this filesystem
    fn alloc_inode(
        &self,
        sb: &Arc<SuperBlock>,
        mode: InodeMode,
        i_op: &'static dyn InodeOps,
    ) -> KernelResult<Arc<Inode>>;

    /// Called when an inode's last reference goes away
    fn drop_inode(&self, _inode: &Inode) {}

    /// Sync to backing store (no-op for in-memory filesystems)
    fn sync_fs(&self) -> KernelResult<()> {
        Ok(())
    }

    fn statfs(&self) -> StatFs {
        StatFs::default()
    }
}

/// Filesystem statistics
#[derive(Debug, Clone, Default)]
pub struct StatFs {
    pub f_type: u64,
    pub f_bsize: u64,
    pub f_blocks: u64,
    pub f_bfree: u64,
    pub f_files: u64,
    pub f_namelen: u64,
}

/// Mount function building a superblock for a filesystem type
pub type MountFn = fn(fs_type: &'static FileSystemType) -> KernelResult<Arc<SuperBlock>>;

/// Filesystem type descriptor
pub struct FileSystemType {
    /// Name used for mounting ("ramfs", "devfs")
    pub name: &'static str,

    /// Build a superblock with a ready root dentry
    pub mount: MountFn,

    /// Default file operations for regular files on this filesystem
    pub file_ops: &'static dyn FileOps,
}

/// Filesystem-specific superblock data
pub trait SuperBlockData: Send + Sync + AsAny {}

static NEXT_DEV_ID: AtomicU64 = AtomicU64::new(1);

/// A mounted filesystem instance
pub struct SuperBlock {
    pub fs_type: &'static FileSystemType,

    /// Root dentry of this filesystem
    pub root: RwLock<Option<Arc<Dentry>>>,

    pub s_op: &'static dyn SuperOps,

    next_ino: AtomicU64,

    /// Unique id for this instance; two inodes compare as same-filesystem
    /// only when their superblocks share this id
    pub dev_id: u64,

    /// Filesystem-specific private data
    pub private: RwLock<Option<Arc<dyn SuperBlockData>>>,

    /// Serializes cross-directory renames within this filesystem
    pub rename_mutex: Mutex<()>,
}

impl SuperBlock {
    pub fn new(fs_type: &'static FileSystemType, s_op: &'static dyn SuperOps) -> Arc<Self> {
        Arc::new(Self {
            fs_type,
            root: RwLock::new(None),
            s_op,
            next_ino: AtomicU64::new(1),
            dev_id: NEXT_DEV_ID.fetch_add(1, Ordering::Relaxed),
            private: RwLock::new(None),
            rename_mutex: Mutex::new(()),
        })
    }

    pub fn set_root(&self, root: Arc<Dentry>) {
        *self.root.write() = Some(root);
    }

    pub fn get_root(&self) -> Option<Arc<Dentry>> {
        self.root.read().clone()
    }

    pub fn alloc_ino(&self) -> InodeId {
        self.next_ino.fetch_add(1, Ordering::Relaxed)
    }

    pub fn set_private(&self, data: Arc<dyn SuperBlockData>) {
        *self.private.write() = Some(data);
    }

    pub fn get_private(&self) -> Option<Arc<dyn SuperBlockData>> {
        self.private.read().clone()
    }
}

/// Global filesystem type registry
static FS_TYPES: Mutex<BTreeMap<&'static str, &'static FileSystemType>> =
    Mutex::new(BTreeMap::new());

/// Make a filesystem type available for mounting by name
pub fn register_filesystem(fs_type: &'static FileSystemType) {
    FS_TYPES.lock().insert(fs_type.name, fs_type);
}

pub fn find_filesystem(name: &str) -> Option<&'static FileSystemType> {
    FS_TYPES.lock().get(name).copied()
}

/// Register the built-in filesystem types
pub fn init_fs_registry() {
    register_filesystem(&super::ramfs::RAMFS_TYPE);
    register_filesystem(&super::devfs::DEVFS_TYPE);
}

/// Mount a registered filesystem type, returning its superblock
pub fn mount_filesystem(name: &str) -> KernelResult<Arc<SuperBlock>> {
    let fs_type = find_filesystem(name).ok_or(KernelError::NoDevice)?;
    (fs_type.mount)(fs_type)
}
