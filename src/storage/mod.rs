//! Block device layer
//!
//! Devices expose sector-granular I/O; [`bread`]/[`bwrite`] bridge the gap to
//! byte-addressed callers by bouncing partial sectors through a stack buffer.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::RwLock;

use crate::chardev::DevId;
use crate::sync::IrqSpinlock;
use crate::{KernelError, KernelResult};

/// Sector size in bytes
pub const SECTOR_SIZE: u64 = 512;

/// Round a byte count up to whole sectors
pub fn bytes_to_sectors(bytes: u64) -> u64 {
    bytes.div_ceil(SECTOR_SIZE)
}

/// Driver interface for a block device
pub trait BlockDevice: Send + Sync {
    /// Device name for diagnostics
    fn name(&self) -> &str;

    /// Capacity in sectors
    fn sector_count(&self) -> u64;

    /// Read whole sectors starting at `sector`; `buf` length must be a
    /// multiple of [`SECTOR_SIZE`]
    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> KernelResult<()>;

    /// Write whole sectors starting at `sector`
    fn write_sectors(&self, sector: u64, buf: &[u8]) -> KernelResult<()>;
}

/// Global block device registry
static BLKDEVS: RwLock<BTreeMap<DevId, Arc<dyn BlockDevice>>> = RwLock::new(BTreeMap::new());

pub fn register_blkdev(id: DevId, dev: Arc<dyn BlockDevice>) -> KernelResult<()> {
    let mut devs = BLKDEVS.write();
    if devs.contains_key(&id) {
        return Err(KernelError::AlreadyExists);
    }
    devs.insert(id, dev);
    Ok(())
}

pub fn unregister_blkdev(id: DevId) -> Option<Arc<dyn BlockDevice>> {
    BLKDEVS.write().remove(&id)
}

pub fn get_blkdev(id: DevId) -> Option<Arc<dyn BlockDevice>> {
    BLKDEVS.read().get(&id).cloned()
}

fn check_range(dev: &dyn BlockDevice, offset: u64, len: usize) -> KernelResult<()> {
    let end = offset
        .checked_add(len as u64)
        .ok_or(KernelError::InvalidArgument)?;
    if end > dev.sector_count() * SECTOR_SIZE {
        return Err(KernelError::InvalidArgument);
    }
    Ok(())
}

/// Byte-addressed read
///
/// The span is widened to whole sectors for the device and the requested
/// window copied out.
pub fn bread(dev: &dyn BlockDevice, offset: u64, buf: &mut [u8]) -> KernelResult<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    check_range(dev, offset, buf.len())?;

    let first = offset / SECTOR_SIZE;
    let skip = (offset % SECTOR_SIZE) as usize;
    let sectors = bytes_to_sectors(skip as u64 + buf.len() as u64);

    let mut bounce = vec![0u8; (sectors * SECTOR_SIZE) as usize];
    dev.read_sectors(first, &mut bounce)?;
    buf.copy_from_slice(&bounce[skip..skip + buf.len()]);
    Ok(buf.len())
}

/// Byte-addressed write
///
/// Partial head/tail sectors are read back first so the untouched bytes
/// survive the sector-sized write.
pub fn bwrite(dev: &dyn BlockDevice, offset: u64, buf: &[u8]) -> KernelResult<usize> {
    if buf.is_empty() {
        return Ok(0);
    }
    check_range(dev, offset, buf.len())?;

    let first = offset / SECTOR_SIZE;
    let skip = (offset % SECTOR_SIZE) as usize;
    let sectors = bytes_to_sectors(skip as u64 + buf.len() as u64);

    let mut bounce = vec![0u8; (sectors * SECTOR_SIZE) as usize];
    if skip != 0 || buf.len() % SECTOR_SIZE as usize != 0 {
        dev.read_sectors(first, &mut bounce)?;
    }
    bounce[skip..skip + buf.len()].copy_from_slice(buf);
    dev.write_sectors(first, &bounce)?;
    Ok(buf.len())
}

/// Memory-backed block device
pub struct RamDisk {
    data: IrqSpinlock<Vec<u8>>,
}

impl RamDisk {
    pub fn new(sectors: u64) -> Self {
        Self {
            data: IrqSpinlock::new(vec![0u8; (sectors * SECTOR_SIZE) as usize]),
        }
    }
}

impl BlockDevice for RamDisk {
    fn name(&self) -> &str {
        "ram"
    }

    fn sector_count(&self) -> u64 {
        self.data.lock().len() as u64 / SECTOR_SIZE
    }

    fn read_sectors(&self, sector: u64, buf: &mut [u8]) -> KernelResult<()> {
        if buf.len() % SECTOR_SIZE as usize != 0 {
            return Err(KernelError::InvalidArgument);
        }
        let data = self.data.lock();
        let start = (sector * SECTOR_SIZE) as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(KernelError::InvalidArgument);
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_sectors(&self, sector: u64, buf: &[u8]) -> KernelResult<()> {
        if buf.len() % SECTOR_SIZE as usize != 0 {
            return Err(KernelError::InvalidArgument);
        }
        let mut data = self.data.lock();
        let start = (sector * SECTOR_SIZE) as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(KernelError::InvalidArgument);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }
}
