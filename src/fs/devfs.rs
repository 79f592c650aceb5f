//! Devfs - device filesystem
//!
//! Device nodes are created with `mknod` and carry a raw [`DevId`]; the
//! driver behind the ID is resolved through the char/block device registries
//! when the node is opened, never at creation. `devfs_get_inode` picks the
//! inode operation table purely from the mode bits.

use alloc::sync::Arc;
use core::cmp::min;

use super::dentry::Dentry;
use super::file::{File, FileOps};
use super::inode::{DevId, Inode, InodeMode, InodeOps};
use super::superblock::{DEVFS_MAGIC, FileSystemType, StatFs, SuperBlock, SuperOps};
use crate::chardev::get_chardev;
use crate::poll::{POLL_IN_EVENTS, POLL_OUT_EVENTS};
use crate::storage::{bread, bwrite, get_blkdev};
use crate::{KernelError, KernelResult};

/// Build a devfs inode, selecting the op table from the mode bits
pub fn devfs_get_inode(
    sb: &Arc<SuperBlock>,
    mode: InodeMode,
    rdev: DevId,
) -> KernelResult<Arc<Inode>> {
    let i_op: &'static dyn InodeOps = if mode.is_dir() {
        &DEVFS_DIR_OPS
    } else {
        &DEVFS_NODE_OPS
    };
    if mode.is_device() {
        Ok(Arc::new(Inode::new_device(
            sb.alloc_ino(),
            mode,
            rdev,
            Arc::downgrade(sb),
            i_op,
        )))
    } else {
        Ok(Arc::new(Inode::new(
            sb.alloc_ino(),
            mode,
            Arc::downgrade(sb),
            i_op,
        )))
    }
}

/// Directory inode operations
pub struct DevfsDirOps;

impl InodeOps for DevfsDirOps {
    fn lookup(&self, _dir: &Inode, _name: &str) -> KernelResult<Arc<Inode>> {
        Err(KernelError::NotFound)
    }

    fn mknod(
        &self,
        dir: &Inode,
        _name: &str,
        mode: InodeMode,
        rdev: DevId,
    ) -> KernelResult<Arc<Inode>> {
        if !mode.is_device() && !mode.is_fifo() {
            return Err(KernelError::InvalidArgument);
        }
        let sb = dir.superblock().ok_or(KernelError::Io)?;
        devfs_get_inode(&sb, mode, rdev)
    }

    fn mkdir(&self, dir: &Inode, _name: &str, mode: InodeMode) -> KernelResult<Arc<Inode>> {
        let sb = dir.superblock().ok_or(KernelError::Io)?;
        let inode = devfs_get_inode(&sb, mode, DevId::null())?;
        inode.inc_nlink();
        Ok(inode)
    }

    fn unlink(&self, _dir: &Inode, _name: &str) -> KernelResult<()> {
        Ok(())
    }

    fn rmdir(&self, _dir: &Inode, _name: &str) -> KernelResult<()> {
        Ok(())
    }

    fn rename(
        &self,
        _old_dir: &Inode,
        _old_name: &str,
        _new_dir: &Arc<Inode>,
        _new_name: &str,
    ) -> KernelResult<()> {
        Ok(())
    }
}

pub static DEVFS_DIR_OPS: DevfsDirOps = DevfsDirOps;

/// Leaf (device node) inode operations
pub struct DevfsNodeOps;

impl InodeOps for DevfsNodeOps {
    fn lookup(&self, _dir: &Inode, _name: &str) -> KernelResult<Arc<Inode>> {
        Err(KernelError::NotDirectory)
    }
}

pub static DEVFS_NODE_OPS: DevfsNodeOps = DevfsNodeOps;

/// File operations for character device nodes
///
/// Every call re-resolves the driver from the inode's rdev; a node whose
/// driver was unregistered reads as a missing device, not stale state.
pub struct CharDevFileOps;

impl CharDevFileOps {
    fn driver(file: &File) -> KernelResult<(Arc<dyn crate::chardev::CharDevice>, DevId)> {
        let inode = file.get_inode().ok_or(KernelError::BadFd)?;
        let dev = get_chardev(inode.rdev).ok_or(KernelError::NoDevice)?;
        Ok((dev, inode.rdev))
    }
}

impl FileOps for CharDevFileOps {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }

    fn read(&self, file: &File, buf: &mut [u8]) -> KernelResult<usize> {
        let (dev, _) = Self::driver(file)?;
        dev.read(buf)
    }

    fn write(&self, file: &File, buf: &[u8]) -> KernelResult<usize> {
        let (dev, _) = Self::driver(file)?;
        dev.write(buf)
    }

    fn llseek(&self, _file: &File, _offset: i64, _whence: i32) -> KernelResult<u64> {
        Err(KernelError::IllegalSeek)
    }

    fn release(&self, file: &File) {
        if let Ok((dev, _)) = Self::driver(file) {
            dev.close();
        }
    }

    fn poll(&self, file: &File, _pt: Option<&mut crate::poll::PollTable>) -> u16 {
        match Self::driver(file) {
            Ok((dev, _)) => {
                let mut mask = 0;
                if dev.poll_read() {
                    mask |= POLL_IN_EVENTS;
                }
                if dev.poll_write() {
                    mask |= POLL_OUT_EVENTS;
                }
                mask
            }
            Err(_) => crate::poll::POLLERR,
        }
    }
}

pub static CHARDEV_FILE_OPS: CharDevFileOps = CharDevFileOps;

/// File operations for block device nodes: positioned byte I/O through the
/// buffer-cache helpers
pub struct BlockDevFileOps;

impl FileOps for BlockDevFileOps {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }

    fn read(&self, file: &File, buf: &mut [u8]) -> KernelResult<usize> {
        let inode = file.get_inode().ok_or(KernelError::BadFd)?;
        let dev = get_blkdev(inode.rdev).ok_or(KernelError::NoDevice)?;

        let size = dev.sector_count() * crate::storage::SECTOR_SIZE;
        let pos = file.get_pos();
        if pos >= size {
            return Ok(0);
        }
        let n = min(buf.len() as u64, size - pos) as usize;
        bread(dev.as_ref(), pos, &mut buf[..n])?;
        file.advance_pos(n as u64);
        Ok(n)
    }

    fn write(&self, file: &File, buf: &[u8]) -> KernelResult<usize> {
        let inode = file.get_inode().ok_or(KernelError::BadFd)?;
        let dev = get_blkdev(inode.rdev).ok_or(KernelError::NoDevice)?;

        let n = bwrite(dev.as_ref(), file.get_pos(), buf)?;
        file.advance_pos(n as u64);
        Ok(n)
    }
}

pub static BLOCKDEV_FILE_OPS: BlockDevFileOps = BlockDevFileOps;

/// Superblock operations
pub struct DevfsSuperOps;

impl SuperOps for DevfsSuperOps {
    fn alloc_inode(
        &self,
        sb: &Arc<SuperBlock>,
        mode: InodeMode,
        _i_op: &'static dyn InodeOps,
    ) -> KernelResult<Arc<Inode>> {
        devfs_get_inode(sb, mode, DevId::null())
    }

    fn statfs(&self) -> StatFs {
        StatFs {
            f_type: DEVFS_MAGIC,
            f_bsize: 4096,
            f_namelen: 255,
            ..StatFs::default()
        }
    }
}

pub static DEVFS_SUPER_OPS: DevfsSuperOps = DevfsSuperOps;

fn devfs_mount(fs_type: &'static FileSystemType) -> KernelResult<Arc<SuperBlock>> {
    let sb = SuperBlock::new(fs_type, &DEVFS_SUPER_OPS);
    let root_inode = devfs_get_inode(&sb, InodeMode::directory(0o755), DevId::null())?;
    root_inode.inc_nlink();
    let root = Arc::new(Dentry::new_root(root_inode, Arc::downgrade(&sb)));
    sb.set_root(root);
    Ok(sb)
}

/// Devfs filesystem type
pub static DEVFS_TYPE: FileSystemType = FileSystemType {
    name: "devfs",
    mount: devfs_mount,
    file_ops: &CHARDEV_FILE_OPS,
};
