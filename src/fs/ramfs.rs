//! Ramfs - memory-backed filesystem
//!
//! The dentry cache is the directory structure; ramfs directory inodes keep
//! no entry list of their own, so `lookup` on a ramfs directory is always a
//! miss and the create/unlink ops only manage inode allocation and link
//! counts. Regular-file contents live in an [`InodeData`] attachment.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp::min;

use spin::RwLock;

use super::dentry::Dentry;
use super::file::{File, FileOps, flags};
use super::inode::{AsAny, Inode, InodeData, InodeMode, InodeOps};
use super::superblock::{FileSystemType, RAMFS_MAGIC, StatFs, SuperBlock, SuperOps};
use crate::{KernelError, KernelResult};

/// Regular-file backing store
pub struct RamfsFileData {
    pub content: RwLock<Vec<u8>>,
}

impl RamfsFileData {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            content: RwLock::new(Vec::new()),
        })
    }
}

impl AsAny for RamfsFileData {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }
}

impl InodeData for RamfsFileData {}

fn with_file_data<R>(inode: &Inode, f: impl FnOnce(&RamfsFileData) -> R) -> KernelResult<R> {
    let private = inode.get_private().ok_or(KernelError::Io)?;
    let data = private
        .as_any()
        .downcast_ref::<RamfsFileData>()
        .ok_or(KernelError::Io)?;
    Ok(f(data))
}

/// Directory inode operations
pub struct RamfsDirOps;

impl InodeOps for RamfsDirOps {
    fn lookup(&self, _dir: &Inode, _name: &str) -> KernelResult<Arc<Inode>> {
        // the dentry cache is authoritative; a cache miss is a real miss
        Err(KernelError::NotFound)
    }

    fn create(&self, dir: &Inode, _name: &str, mode: InodeMode) -> KernelResult<Arc<Inode>> {
        let sb = dir.superblock().ok_or(KernelError::Io)?;
        let inode = sb.s_op.alloc_inode(&sb, mode, &RAMFS_FILE_OPS)?;
        inode.set_private(RamfsFileData::new());
        Ok(inode)
    }

    fn mkdir(&self, dir: &Inode, _name: &str, mode: InodeMode) -> KernelResult<Arc<Inode>> {
        let sb = dir.superblock().ok_or(KernelError::Io)?;
        let inode = sb.s_op.alloc_inode(&sb, mode, &RAMFS_DIR_OPS)?;
        // "." and the parent's entry
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
        // pure dentry relink, nothing to move
        Ok(())
    }
}

pub static RAMFS_DIR_OPS: RamfsDirOps = RamfsDirOps;

/// Regular-file inode operations
pub struct RamfsFileInodeOps;

impl InodeOps for RamfsFileInodeOps {
    fn lookup(&self, _dir: &Inode, _name: &str) -> KernelResult<Arc<Inode>> {
        Err(KernelError::NotDirectory)
    }

    fn truncate(&self, inode: &Inode, length: u64) -> KernelResult<()> {
        with_file_data(inode, |data| {
            data.content.write().resize(length as usize, 0);
        })?;
        inode.set_size(length);
        inode.touch();
        Ok(())
    }
}

pub static RAMFS_FILE_OPS: RamfsFileInodeOps = RamfsFileInodeOps;

/// Regular-file file operations
pub struct RamfsFileFileOps;

impl FileOps for RamfsFileFileOps {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }

    fn read(&self, file: &File, buf: &mut [u8]) -> KernelResult<usize> {
        let inode = file.get_inode().ok_or(KernelError::BadFd)?;
        let n = with_file_data(&inode, |data| {
            let content = data.content.read();
            let pos = file.get_pos() as usize;
            if pos >= content.len() {
                return 0;
            }
            let n = min(buf.len(), content.len() - pos);
            buf[..n].copy_from_slice(&content[pos..pos + n]);
            n
        })?;
        file.advance_pos(n as u64);
        Ok(n)
    }

    fn write(&self, file: &File, buf: &[u8]) -> KernelResult<usize> {
        let inode = file.get_inode().ok_or(KernelError::BadFd)?;
        let total = with_file_data(&inode, |data| {
            let mut content = data.content.write();
            if file.get_flags() & flags::O_APPEND != 0 {
                file.set_pos(content.len() as u64);
            }
            let pos = file.get_pos() as usize;
            if pos + buf.len() > content.len() {
                content.resize(pos + buf.len(), 0);
            }
            content[pos..pos + buf.len()].copy_from_slice(buf);
            content.len() as u64
        })?;
        inode.set_size(total);
        inode.touch();
        file.advance_pos(buf.len() as u64);
        Ok(buf.len())
    }
}

pub static RAMFS_FILE_FILE_OPS: RamfsFileFileOps = RamfsFileFileOps;

/// Superblock operations
pub struct RamfsSuperOps;

impl SuperOps for RamfsSuperOps {
    fn alloc_inode(
        &self,
        sb: &Arc<SuperBlock>,
        mode: InodeMode,
        i_op: &'static dyn InodeOps,
    ) -> KernelResult<Arc<Inode>> {
        Ok(Arc::new(Inode::new(
            sb.alloc_ino(),
            mode,
            Arc::downgrade(sb),
            i_op,
        )))
    }

    fn statfs(&self) -> StatFs {
        StatFs {
            f_type: RAMFS_MAGIC,
            f_bsize: 4096,
            f_namelen: 255,
            ..StatFs::default()
        }
    }
}

pub static RAMFS_SUPER_OPS: RamfsSuperOps = RamfsSuperOps;

fn ramfs_mount(fs_type: &'static FileSystemType) -> KernelResult<Arc<SuperBlock>> {
    let sb = SuperBlock::new(fs_type, &RAMFS_SUPER_OPS);
    let root_inode = sb
        .s_op
        .alloc_inode(&sb, InodeMode::directory(0o755), &RAMFS_DIR_OPS)?;
    root_inode.inc_nlink();
    let root = Arc::new(Dentry::new_root(root_inode, Arc::downgrade(&sb)));
    sb.set_root(root);
    Ok(sb)
}

/// Ramfs filesystem type
pub static RAMFS_TYPE: FileSystemType = FileSystemType {
    name: "ramfs",
    mount: ramfs_mount,
    file_ops: &RAMFS_FILE_FILE_OPS,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_builds_directory_root() {
        let sb = ramfs_mount(&RAMFS_TYPE).unwrap();
        let root = sb.get_root().unwrap();
        let inode = root.get_inode().unwrap();
        assert!(inode.mode().is_dir());
        assert_eq!(inode.i_op.lookup(&inode, "missing").err(), Some(KernelError::NotFound));
    }

    #[test]
    fn truncate_resizes_content() {
        let sb = ramfs_mount(&RAMFS_TYPE).unwrap();
        let root_inode = sb.get_root().unwrap().get_inode().unwrap();
        let file_inode = root_inode
            .i_op
            .create(&root_inode, "f", InodeMode::regular(0o644))
            .unwrap();

        file_inode.i_op.truncate(&file_inode, 16).unwrap();
        assert_eq!(file_inode.get_size(), 16);
        file_inode.i_op.truncate(&file_inode, 4).unwrap();
        assert_eq!(file_inode.get_size(), 4);
    }
}
