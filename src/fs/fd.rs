//! File descriptor table
//!
//! Descriptors are indices into a per-process slot vector. Allocation always
//! takes the lowest free slot, which is what makes `pipe()` land its two ends
//! on predictable numbers.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::file::File;
use crate::sync::IrqSpinlock;
use crate::{KernelError, KernelResult};

/// Per-process open file limit
pub const MAX_FDS: usize = 256;

/// File descriptor number
pub type Fd = usize;

pub struct FdTable {
    files: IrqSpinlock<Vec<Option<Arc<File>>>>,
}

impl FdTable {
    pub const fn new() -> Self {
        Self {
            files: IrqSpinlock::new(Vec::new()),
        }
    }

    /// Install a file in the lowest free slot
    pub fn install(&self, file: Arc<File>) -> KernelResult<Fd> {
        let mut files = self.files.lock();
        for (fd, slot) in files.iter_mut().enumerate() {
            if slot.is_none() {
                *slot = Some(file);
                return Ok(fd);
            }
        }
        if files.len() >= MAX_FDS {
            return Err(KernelError::ProcessFileLimit);
        }
        files.push(Some(file));
        Ok(files.len() - 1)
    }

    pub fn get(&self, fd: Fd) -> KernelResult<Arc<File>> {
        self.files
            .lock()
            .get(fd)
            .and_then(Clone::clone)
            .ok_or(KernelError::BadFd)
    }

    /// Release a descriptor; the file itself goes away with its last clone
    pub fn close(&self, fd: Fd) -> KernelResult<()> {
        let mut files = self.files.lock();
        match files.get_mut(fd) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(KernelError::BadFd),
        }
    }

    /// Duplicate a descriptor into the lowest free slot
    pub fn dup(&self, fd: Fd) -> KernelResult<Fd> {
        let file = self.get(fd)?;
        self.install(file)
    }

    /// Number of live descriptors
    pub fn count(&self) -> usize {
        self.files.lock().iter().filter(|s| s.is_some()).count()
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::dentry::Dentry;
    use crate::fs::file::{FileOps, flags};
    use crate::KernelResult;
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

    fn file() -> Arc<File> {
        let dentry = Arc::new(Dentry::new_anonymous(String::from("fd-test"), None));
        File::new(dentry, flags::O_RDONLY, &NOP_OPS)
    }

    #[test]
    fn install_reuses_lowest_free_slot() {
        let table = FdTable::new();
        assert_eq!(table.install(file()), Ok(0));
        assert_eq!(table.install(file()), Ok(1));
        assert_eq!(table.install(file()), Ok(2));

        assert!(table.close(1).is_ok());
        assert_eq!(table.install(file()), Ok(1));
        assert_eq!(table.count(), 3);
    }

    #[test]
    fn close_and_dup() {
        let table = FdTable::new();
        let fd = table.install(file()).unwrap();
        let dup = table.dup(fd).unwrap();
        assert_ne!(fd, dup);
        assert!(Arc::ptr_eq(&table.get(fd).unwrap(), &table.get(dup).unwrap()));

        assert!(table.close(fd).is_ok());
        assert_eq!(table.get(fd).err(), Some(KernelError::BadFd));
        assert_eq!(table.close(fd).err(), Some(KernelError::BadFd));
        // the dup keeps the file alive
        assert!(table.get(dup).is_ok());
    }
}
