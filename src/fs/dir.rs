//! Generic directory file operations
//!
//! Directories on the in-memory filesystems keep their entries in the dentry
//! cache, so one readdir implementation serves every filesystem here.

use super::file::{DirEntry, File, FileOps};
use super::inode::FileType;
use crate::{KernelError, KernelResult};

pub struct DirFileOps;

impl FileOps for DirFileOps {
    fn as_any(&self) -> &dyn core::any::Any {
        self
    }

    fn read(&self, _file: &File, _buf: &mut [u8]) -> KernelResult<usize> {
        Err(KernelError::IsDirectory)
    }

    fn write(&self, _file: &File, _buf: &[u8]) -> KernelResult<usize> {
        Err(KernelError::IsDirectory)
    }

    fn readdir(
        &self,
        file: &File,
        callback: &mut dyn FnMut(DirEntry) -> bool,
    ) -> KernelResult<()> {
        let inode = file.get_inode().ok_or(KernelError::BadFd)?;
        if !inode.mode().is_dir() {
            return Err(KernelError::NotDirectory);
        }

        let mut stop = false;
        file.dentry.for_each_child(|name, child| {
            if stop {
                return;
            }
            if let Some(child_inode) = child.get_inode() {
                let entry = DirEntry {
                    ino: child_inode.ino,
                    file_type: child_inode
                        .mode()
                        .file_type()
                        .unwrap_or(FileType::Regular),
                    name: name.as_bytes().to_vec(),
                };
                if !callback(entry) {
                    stop = true;
                }
            }
        });
        Ok(())
    }
}

/// Shared directory ops instance
pub static DIR_FILE_OPS: DirFileOps = DirFileOps;
