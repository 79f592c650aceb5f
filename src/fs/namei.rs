//! Path-based VFS operations
//!
//! Everything here takes paths, resolves them through the dentry cache, does
//! the POSIX legality checks, and only then delegates to the filesystem's
//! inode ops. Resolution handles are plain `Arc`s, so an early error return
//! releases everything the walk acquired.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use super::dentry::{Dentry, is_subdir};
use super::devfs::{BLOCKDEV_FILE_OPS, CHARDEV_FILE_OPS};
use super::dir::DIR_FILE_OPS;
use super::file::{File, FileOps, flags};
use super::inode::{DevId, InodeMode};
use super::path::{LookupFlags, lookup_parent, lookup_path};
use crate::chardev::get_chardev;
use crate::storage::get_blkdev;
use crate::{KernelError, KernelResult};

/// Resolve `name` under `parent` without crossing into a mounted fs
fn lookup_entry(parent: &Arc<Dentry>, name: &str) -> KernelResult<Arc<Dentry>> {
    if let Some(child) = parent.lookup_child(name) {
        return Ok(child);
    }
    let dir_inode = parent.get_inode().ok_or(KernelError::NotFound)?;
    let inode = dir_inode.i_op.lookup(&dir_inode, name)?;
    let child = Arc::new(Dentry::new(String::from(name), Some(inode), parent.sb.clone()));
    child.set_parent(parent);
    parent.add_child(child.clone());
    Ok(child)
}

/// Create a regular file
pub fn vfs_create(path: &str, mode: u16) -> KernelResult<Arc<Dentry>> {
    let (parent, name) = lookup_parent(path)?;
    if lookup_entry(&parent, &name).is_ok() {
        return Err(KernelError::AlreadyExists);
    }
    let dir_inode = parent.get_inode().ok_or(KernelError::NotFound)?;
    let inode = dir_inode
        .i_op
        .create(&dir_inode, &name, InodeMode::regular(mode))?;
    let dentry = Arc::new(Dentry::new(name, Some(inode), parent.sb.clone()));
    dentry.set_parent(&parent);
    parent.add_child(dentry.clone());
    dir_inode.touch();
    Ok(dentry)
}

/// Create a device node
pub fn vfs_mknod(path: &str, mode: InodeMode, rdev: DevId) -> KernelResult<Arc<Dentry>> {
    let (parent, name) = lookup_parent(path)?;
    if lookup_entry(&parent, &name).is_ok() {
        return Err(KernelError::AlreadyExists);
    }
    let dir_inode = parent.get_inode().ok_or(KernelError::NotFound)?;
    let inode = dir_inode.i_op.mknod(&dir_inode, &name, mode, rdev)?;
    let dentry = Arc::new(Dentry::new(name, Some(inode), parent.sb.clone()));
    dentry.set_parent(&parent);
    parent.add_child(dentry.clone());
    dir_inode.touch();
    Ok(dentry)
}

/// Create a directory
pub fn vfs_mkdir(path: &str, mode: u16) -> KernelResult<Arc<Dentry>> {
    let (parent, name) = lookup_parent(path)?;
    if lookup_entry(&parent, &name).is_ok() {
        return Err(KernelError::AlreadyExists);
    }
    let dir_inode = parent.get_inode().ok_or(KernelError::NotFound)?;
    let inode = dir_inode
        .i_op
        .mkdir(&dir_inode, &name, InodeMode::directory(mode))?;
    let dentry = Arc::new(Dentry::new(name, Some(inode), parent.sb.clone()));
    dentry.set_parent(&parent);
    parent.add_child(dentry.clone());
    dir_inode.inc_nlink();
    dir_inode.touch();
    Ok(dentry)
}

/// Remove a non-directory entry
pub fn vfs_unlink(path: &str) -> KernelResult<()> {
    let (parent, name) = lookup_parent(path)?;
    let dentry = lookup_entry(&parent, &name)?;
    let inode = dentry.get_inode().ok_or(KernelError::NotFound)?;

    if inode.mode().is_dir() {
        return Err(KernelError::IsDirectory);
    }
    if dentry.is_mountpoint() {
        return Err(KernelError::Busy);
    }

    let dir_inode = parent.get_inode().ok_or(KernelError::NotFound)?;
    dir_inode.i_op.unlink(&dir_inode, &name)?;
    parent.remove_child(&name);
    inode.dec_nlink();
    dir_inode.touch();
    Ok(())
}

/// Remove an empty directory
pub fn vfs_rmdir(path: &str) -> KernelResult<()> {
    let (parent, name) = lookup_parent(path)?;
    let dentry = lookup_entry(&parent, &name)?;
    let inode = dentry.get_inode().ok_or(KernelError::NotFound)?;

    if !inode.mode().is_dir() {
        return Err(KernelError::NotDirectory);
    }
    if dentry.is_mountpoint() {
        return Err(KernelError::Busy);
    }
    if dentry.num_children() != 0 {
        return Err(KernelError::DirectoryNotEmpty);
    }

    let dir_inode = parent.get_inode().ok_or(KernelError::NotFound)?;
    dir_inode.i_op.rmdir(&dir_inode, &name)?;
    parent.remove_child(&name);
    // the entry itself plus its "."
    inode.dec_nlink();
    inode.dec_nlink();
    dir_inode.dec_nlink();
    dir_inode.touch();
    Ok(())
}

/// Rename, POSIX rules
///
/// In order: same-identity renames succeed without doing anything; a
/// directory can only replace an empty directory; a non-directory can never
/// replace a directory and vice versa; no crossing filesystems; a replaced
/// target is unlinked before the filesystem op runs; the actual move is a
/// dentry relink.
pub fn vfs_rename(old_path: &str, new_path: &str) -> KernelResult<()> {
    let (old_parent, old_name) = lookup_parent(old_path)?;
    let (new_parent, new_name) = lookup_parent(new_path)?;

    let old_dentry = lookup_entry(&old_parent, &old_name)?;
    let old_inode = old_dentry.get_inode().ok_or(KernelError::NotFound)?;
    if old_dentry.is_mountpoint() {
        return Err(KernelError::Busy);
    }

    let old_sb = old_parent.superblock().ok_or(KernelError::Io)?;
    let new_sb = new_parent.superblock().ok_or(KernelError::Io)?;
    if old_sb.dev_id != new_sb.dev_id {
        return Err(KernelError::CrossDevice);
    }

    let target = lookup_entry(&new_parent, &new_name).ok();

    if let Some(ref target_dentry) = target {
        let target_inode = target_dentry.get_inode().ok_or(KernelError::NotFound)?;

        // renaming something onto itself is a successful no-op
        if target_inode.ino == old_inode.ino && Arc::ptr_eq(&old_sb, &new_sb) {
            return Ok(());
        }

        match (old_inode.mode().is_dir(), target_inode.mode().is_dir()) {
            (true, false) => return Err(KernelError::NotDirectory),
            (false, true) => return Err(KernelError::IsDirectory),
            (true, true) => {
                if target_dentry.num_children() != 0 {
                    return Err(KernelError::DirectoryNotEmpty);
                }
            }
            (false, false) => {}
        }
    }

    if old_inode.mode().is_dir() && is_subdir(&new_parent, &old_dentry) {
        // would move a directory under itself
        return Err(KernelError::InvalidArgument);
    }

    // cross-directory renames serialize against each other
    let _rename_guard = if !Arc::ptr_eq(&old_parent, &new_parent) {
        Some(old_sb.rename_mutex.lock())
    } else {
        None
    };

    // a differing target goes away first
    if let Some(target_dentry) = target {
        let target_inode = target_dentry.get_inode().ok_or(KernelError::NotFound)?;
        new_parent.remove_child(&new_name);
        target_inode.dec_nlink();
        if target_inode.mode().is_dir() {
            target_inode.dec_nlink();
        }
    }

    let old_dir_inode = old_parent.get_inode().ok_or(KernelError::NotFound)?;
    let new_dir_inode = new_parent.get_inode().ok_or(KernelError::NotFound)?;
    old_dir_inode
        .i_op
        .rename(&old_dir_inode, &old_name, &new_dir_inode, &new_name)?;

    // the filesystem said yes; relink the dentry under its new name
    let new_dentry = Arc::new(Dentry::new(
        new_name,
        Some(old_inode.clone()),
        new_parent.sb.clone(),
    ));
    new_dentry.set_parent(&new_parent);

    let mut moved_children: Vec<Arc<Dentry>> = Vec::new();
    old_dentry.for_each_child(|_, child| moved_children.push(child.clone()));
    for child in moved_children {
        child.set_parent(&new_dentry);
        new_dentry.add_child(child);
    }

    old_parent.remove_child(&old_name);
    new_parent.add_child(new_dentry);

    if old_inode.mode().is_dir() && !Arc::ptr_eq(&old_parent, &new_parent) {
        old_dir_inode.dec_nlink();
        new_dir_inode.inc_nlink();
    }
    old_dir_inode.touch();
    new_dir_inode.touch();
    Ok(())
}

/// Open a file by path
pub fn do_open(path: &str, open_flags: u32, mode: u16) -> KernelResult<Arc<File>> {
    let dentry = match lookup_path(path, LookupFlags::default()) {
        Ok(dentry) => {
            if open_flags & (flags::O_CREAT | flags::O_EXCL) == (flags::O_CREAT | flags::O_EXCL) {
                return Err(KernelError::AlreadyExists);
            }
            dentry
        }
        Err(KernelError::NotFound) if open_flags & flags::O_CREAT != 0 => vfs_create(path, mode)?,
        Err(e) => return Err(e),
    };

    let inode = dentry.get_inode().ok_or(KernelError::NotFound)?;
    let imode = inode.mode();

    if open_flags & flags::O_DIRECTORY != 0 && !imode.is_dir() {
        return Err(KernelError::NotDirectory);
    }
    if imode.is_dir() && open_flags & flags::O_ACCMODE != flags::O_RDONLY {
        return Err(KernelError::IsDirectory);
    }

    let f_op: &'static dyn FileOps = if imode.is_dir() {
        &DIR_FILE_OPS
    } else if imode.is_chrdev() {
        // driver existence is checked at open, not at mknod
        let dev = get_chardev(inode.rdev).ok_or(KernelError::NoDevice)?;
        dev.open()?;
        &CHARDEV_FILE_OPS
    } else if imode.is_blkdev() {
        get_blkdev(inode.rdev).ok_or(KernelError::NoDevice)?;
        &BLOCKDEV_FILE_OPS
    } else if imode.is_file() {
        let sb = inode.superblock().ok_or(KernelError::Io)?;
        sb.fs_type.file_ops
    } else {
        return Err(KernelError::OperationNotSupported);
    };

    if open_flags & flags::O_TRUNC != 0 && imode.is_file() {
        inode.i_op.truncate(&inode, 0)?;
    }

    Ok(File::new(dentry, open_flags, f_op))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chardev::{DevId, major, mem_minor, register_builtin_chardevs};
    use crate::fs::mount::{self, mount_at, mount_root};
    use crate::fs::superblock::init_fs_registry;
    use crate::fs::TEST_FS_LOCK;

    fn fresh_root() {
        mount::reset_for_tests();
        init_fs_registry();
        mount_root("ramfs").unwrap();
    }

    #[test]
    fn create_write_read_roundtrip() {
        let _g = TEST_FS_LOCK.lock();
        fresh_root();

        let f = do_open("/hello.txt", flags::O_CREAT | flags::O_RDWR, 0o644).unwrap();
        assert_eq!(f.write(b"kernel"), Ok(6));
        f.set_pos(0);
        let mut buf = [0u8; 16];
        assert_eq!(f.read(&mut buf), Ok(6));
        assert_eq!(&buf[..6], b"kernel");

        // O_EXCL on an existing file
        assert_eq!(
            do_open("/hello.txt", flags::O_CREAT | flags::O_EXCL, 0o644).err(),
            Some(KernelError::AlreadyExists)
        );
    }

    #[test]
    fn rename_same_identity_is_noop() {
        let _g = TEST_FS_LOCK.lock();
        fresh_root();

        vfs_create("/a", 0o644).unwrap();
        assert_eq!(vfs_rename("/a", "/a"), Ok(()));
        assert!(lookup_path("/a", LookupFlags::default()).is_ok());
    }

    #[test]
    fn rename_type_mismatches() {
        let _g = TEST_FS_LOCK.lock();
        fresh_root();

        vfs_create("/file", 0o644).unwrap();
        vfs_mkdir("/dir", 0o755).unwrap();
        vfs_mkdir("/full", 0o755).unwrap();
        vfs_create("/full/x", 0o644).unwrap();

        assert_eq!(vfs_rename("/file", "/dir").err(), Some(KernelError::IsDirectory));
        assert_eq!(vfs_rename("/dir", "/file").err(), Some(KernelError::NotDirectory));
        assert_eq!(
            vfs_rename("/dir", "/full").err(),
            Some(KernelError::DirectoryNotEmpty)
        );
    }

    #[test]
    fn rename_rejects_own_subtree_and_cross_device() {
        let _g = TEST_FS_LOCK.lock();
        fresh_root();

        vfs_mkdir("/a", 0o755).unwrap();
        vfs_mkdir("/a/b", 0o755).unwrap();
        assert_eq!(
            vfs_rename("/a", "/a/b/c").err(),
            Some(KernelError::InvalidArgument)
        );

        vfs_mkdir("/dev", 0o755).unwrap();
        let dev_mp = lookup_path("/dev", LookupFlags::default()).unwrap();
        mount_at("devfs", dev_mp).unwrap();
        vfs_create("/plain", 0o644).unwrap();
        assert_eq!(
            vfs_rename("/plain", "/dev/plain").err(),
            Some(KernelError::CrossDevice)
        );
    }

    #[test]
    fn rename_replaces_file_target() {
        let _g = TEST_FS_LOCK.lock();
        fresh_root();

        let src = do_open("/src", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        src.write(b"new contents").unwrap();
        drop(src);
        let dst = do_open("/dst", flags::O_CREAT | flags::O_WRONLY, 0o644).unwrap();
        dst.write(b"old").unwrap();
        drop(dst);

        assert_eq!(vfs_rename("/src", "/dst"), Ok(()));
        assert_eq!(
            lookup_path("/src", LookupFlags::default()).err(),
            Some(KernelError::NotFound)
        );

        let f = do_open("/dst", flags::O_RDONLY, 0).unwrap();
        let mut buf = [0u8; 32];
        assert_eq!(f.read(&mut buf), Ok(12));
        assert_eq!(&buf[..12], b"new contents");
    }

    #[test]
    fn rename_directory_carries_children() {
        let _g = TEST_FS_LOCK.lock();
        fresh_root();

        vfs_mkdir("/olddir", 0o755).unwrap();
        vfs_create("/olddir/kept", 0o644).unwrap();
        assert_eq!(vfs_rename("/olddir", "/newdir"), Ok(()));
        assert!(lookup_path("/newdir/kept", LookupFlags::default()).is_ok());
        assert_eq!(
            lookup_path("/olddir", LookupFlags::default()).err(),
            Some(KernelError::NotFound)
        );
    }

    #[test]
    fn unlink_and_rmdir_cross_checks() {
        let _g = TEST_FS_LOCK.lock();
        fresh_root();

        vfs_mkdir("/d", 0o755).unwrap();
        vfs_create("/d/f", 0o644).unwrap();

        assert_eq!(vfs_unlink("/d").err(), Some(KernelError::IsDirectory));
        assert_eq!(vfs_rmdir("/d/f").err(), Some(KernelError::NotDirectory));
        assert_eq!(vfs_rmdir("/d").err(), Some(KernelError::DirectoryNotEmpty));

        assert_eq!(vfs_unlink("/d/f"), Ok(()));
        assert_eq!(vfs_rmdir("/d"), Ok(()));
        assert_eq!(
            lookup_path("/d", LookupFlags::default()).err(),
            Some(KernelError::NotFound)
        );
    }

    #[test]
    fn device_node_routes_to_driver() {
        let _g = TEST_FS_LOCK.lock();
        fresh_root();
        register_builtin_chardevs();

        vfs_mkdir("/dev", 0o755).unwrap();
        let dev_mp = lookup_path("/dev", LookupFlags::default()).unwrap();
        mount_at("devfs", dev_mp).unwrap();

        vfs_mknod(
            "/dev/zero",
            InodeMode::chardev(0o666),
            DevId::new(major::MEM, mem_minor::ZERO),
        )
        .unwrap();

        let f = do_open("/dev/zero", flags::O_RDWR, 0).unwrap();
        let mut buf = [0xffu8; 8];
        assert_eq!(f.read(&mut buf), Ok(8));
        assert_eq!(buf, [0u8; 8]);
        assert_eq!(f.write(b"ignored"), Ok(7));

        // a node whose driver is not registered fails at open
        vfs_mknod(
            "/dev/phantom",
            InodeMode::chardev(0o666),
            DevId::new(42, 0),
        )
        .unwrap();
        assert_eq!(
            do_open("/dev/phantom", flags::O_RDONLY, 0).err(),
            Some(KernelError::NoDevice)
        );
    }

    #[test]
    fn trailing_slash_requires_directory() {
        let _g = TEST_FS_LOCK.lock();
        fresh_root();

        vfs_create("/f", 0o644).unwrap();
        assert_eq!(
            lookup_path("/f/", LookupFlags::default()).err(),
            Some(KernelError::NotDirectory)
        );
        vfs_mkdir("/d", 0o755).unwrap();
        assert!(lookup_path("/d/", LookupFlags::default()).is_ok());
    }
}
