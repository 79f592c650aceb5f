//! Virtual filesystem layer
//!
//! Superblock/inode/dentry/file objects with trait-based operation tables,
//! path resolution, mounting, and the two built-in filesystems (ramfs,
//! devfs). Path-based operations live in [`namei`]; descriptor plumbing in
//! [`fd`].

pub mod dentry;
pub mod devfs;
pub mod dir;
pub mod fd;
pub mod file;
pub mod inode;
pub mod mount;
pub mod namei;
pub mod path;
pub mod ramfs;
pub mod superblock;

pub use dentry::Dentry;
pub use file::File;
pub use inode::{Inode, InodeMode};
pub use namei::{do_open, vfs_create, vfs_mkdir, vfs_mknod, vfs_rename, vfs_rmdir, vfs_unlink};
pub use path::{LookupFlags, lookup_path};
pub use superblock::{SuperBlock, init_fs_registry, register_filesystem};

/// Serializes tests that drive the global mount namespace
#[cfg(test)]
pub(crate) static TEST_FS_LOCK: spin::Mutex<()> = spin::Mutex::new(());
