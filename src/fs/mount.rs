//! Mount table
//!
//! A mount grafts a filesystem's root onto a dentry of the tree above it.
//! Path resolution calls [`follow_mount`] on every step so a mounted-on
//! dentry transparently becomes the mounted filesystem's root.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use super::dentry::Dentry;
use super::superblock::{SuperBlock, mount_filesystem};
use crate::{KernelError, KernelResult};

/// One mount: a superblock attached at a mountpoint dentry
pub struct Mount {
    /// The mounted filesystem
    pub sb: Arc<SuperBlock>,
    /// Dentry this filesystem is mounted on (None for the namespace root)
    pub mountpoint: Option<Arc<Dentry>>,
    /// Filesystem type name, for the mount listing
    pub fs_name: &'static str,
}

struct MountTable {
    /// Root of the whole namespace
    root: Option<Arc<Dentry>>,
    mounts: Vec<Arc<Mount>>,
}

static MOUNTS: RwLock<MountTable> = RwLock::new(MountTable {
    root: None,
    mounts: Vec::new(),
});

/// The namespace root dentry (None before the root mount)
pub fn namespace_root() -> Option<Arc<Dentry>> {
    MOUNTS.read().root.clone()
}

/// Mount the root filesystem
///
/// The first mount in the namespace; everything else hangs off it.
pub fn mount_root(fs_name: &str) -> KernelResult<Arc<Dentry>> {
    let sb = mount_filesystem(fs_name)?;
    let root = sb.get_root().ok_or(KernelError::NoDevice)?;
    let fs_name = sb.fs_type.name;

    let mut table = MOUNTS.write();
    if table.root.is_some() {
        return Err(KernelError::Busy);
    }
    table.root = Some(root.clone());
    table.mounts.push(Arc::new(Mount {
        sb,
        mountpoint: None,
        fs_name,
    }));
    log::debug!("vfs: mounted {} as root", fs_name);
    Ok(root)
}

/// Mount a filesystem type on an existing directory dentry
pub fn mount_at(fs_name: &str, mountpoint: Arc<Dentry>) -> KernelResult<Arc<SuperBlock>> {
    let dir_inode = mountpoint.get_inode().ok_or(KernelError::NotFound)?;
    if !dir_inode.mode().is_dir() {
        return Err(KernelError::NotDirectory);
    }
    if mountpoint.is_mountpoint() {
        return Err(KernelError::Busy);
    }

    let sb = mount_filesystem(fs_name)?;
    let root = sb.get_root().ok_or(KernelError::NoDevice)?;
    // the mounted root inherits the mountpoint's parent for ".." walks
    if let Some(parent) = mountpoint.get_parent() {
        root.set_parent(&parent);
    }
    let fs_name = sb.fs_type.name;

    mountpoint.set_mountpoint(true);
    log::debug!("vfs: mounted {} on {}", fs_name, mountpoint.name);
    MOUNTS.write().mounts.push(Arc::new(Mount {
        sb: sb.clone(),
        mountpoint: Some(mountpoint),
        fs_name,
    }));
    Ok(sb)
}

/// Detach the filesystem mounted on `mountpoint`
pub fn umount_at(mountpoint: &Arc<Dentry>) -> KernelResult<()> {
    if !mountpoint.is_mountpoint() {
        return Err(KernelError::InvalidArgument);
    }
    let mut table = MOUNTS.write();
    let pos = table
        .mounts
        .iter()
        .position(|m| {
            m.mountpoint
                .as_ref()
                .is_some_and(|mp| Arc::ptr_eq(mp, mountpoint))
        })
        .ok_or(KernelError::InvalidArgument)?;
    table.mounts.remove(pos);
    mountpoint.set_mountpoint(false);
    Ok(())
}

/// Cross from a mounted-on dentry to the root of what is mounted there
pub fn follow_mount(dentry: Arc<Dentry>) -> Arc<Dentry> {
    if !dentry.is_mountpoint() {
        return dentry;
    }
    let table = MOUNTS.read();
    for mount in table.mounts.iter().rev() {
        if let Some(mp) = &mount.mountpoint {
            if Arc::ptr_eq(mp, &dentry) {
                if let Some(root) = mount.sb.get_root() {
                    return root;
                }
            }
        }
    }
    dentry
}

/// Names of the mounted filesystems, namespace root first
pub fn mount_list() -> Vec<String> {
    MOUNTS
        .read()
        .mounts
        .iter()
        .map(|m| String::from(m.fs_name))
        .collect()
}

#[cfg(test)]
pub(crate) fn reset_for_tests() {
    let mut table = MOUNTS.write();
    for m in table.mounts.iter() {
        if let Some(mp) = &m.mountpoint {
            mp.set_mountpoint(false);
        }
    }
    table.root = None;
    table.mounts.clear();
}
