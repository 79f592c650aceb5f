//! Character device framework
//!
//! Character devices are addressed by major/minor number, Linux style: the
//! major selects a driver, the minor an instance. devfs nodes carry a
//! [`DevId`] and route their file operations through the registry here.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU32, Ordering};

use spin::RwLock;

use crate::{KernelError, KernelResult};

/// Major device number type
pub type DevMajor = u16;

/// Minor device number type
pub type DevMinor = u16;

/// Device ID combining major and minor numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevId {
    pub major: DevMajor,
    pub minor: DevMinor,
}

impl DevId {
    pub const fn new(major: DevMajor, minor: DevMinor) -> Self {
        Self { major, minor }
    }

    pub const fn null() -> Self {
        Self { major: 0, minor: 0 }
    }

    pub const fn is_null(&self) -> bool {
        self.major == 0 && self.minor == 0
    }

    /// Encode as a single u32 (12-bit major, 20-bit minor)
    pub const fn encode(&self) -> u32 {
        ((self.major as u32) << 20) | (self.minor as u32 & 0xFFFFF)
    }

    pub const fn decode(dev: u32) -> Self {
        Self {
            major: ((dev >> 20) & 0xFFF) as u16,
            minor: (dev & 0xFFFFF) as u16,
        }
    }
}

/// Well-known major numbers
pub mod major {
    use super::DevMajor;

    /// Memory devices (/dev/null, /dev/zero, /dev/random)
    pub const MEM: DevMajor = 1;
}

/// Minor numbers under [`major::MEM`]
pub mod mem_minor {
    use super::DevMinor;

    pub const NULL: DevMinor = 3;
    pub const ZERO: DevMinor = 5;
    pub const RANDOM: DevMinor = 8;
}

/// Driver interface for a character device
pub trait CharDevice: Send + Sync {
    /// Device name for diagnostics
    fn name(&self) -> &str;

    /// Called on open; devices needing no setup use the default
    fn open(&self) -> KernelResult<()> {
        Ok(())
    }

    /// Called on final close
    fn close(&self) {}

    /// Read from the device
    fn read(&self, buf: &mut [u8]) -> KernelResult<usize>;

    /// Write to the device
    fn write(&self, buf: &[u8]) -> KernelResult<usize>;

    /// Readiness for poll
    fn poll_read(&self) -> bool {
        true
    }

    fn poll_write(&self) -> bool {
        true
    }
}

/// Registry mapping device IDs to drivers
pub struct CharDeviceRegistry {
    devices: BTreeMap<DevId, Arc<dyn CharDevice>>,
}

impl CharDeviceRegistry {
    pub const fn new() -> Self {
        Self {
            devices: BTreeMap::new(),
        }
    }

    /// Register a driver for an ID; an ID already taken is an error
    pub fn register(&mut self, id: DevId, device: Arc<dyn CharDevice>) -> KernelResult<()> {
        if self.devices.contains_key(&id) {
            return Err(KernelError::AlreadyExists);
        }
        self.devices.insert(id, device);
        Ok(())
    }

    pub fn unregister(&mut self, id: DevId) -> Option<Arc<dyn CharDevice>> {
        self.devices.remove(&id)
    }

    pub fn get(&self, id: DevId) -> Option<Arc<dyn CharDevice>> {
        self.devices.get(&id).cloned()
    }
}

impl Default for CharDeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global character device registry
pub static CHARDEV_REGISTRY: RwLock<CharDeviceRegistry> = RwLock::new(CharDeviceRegistry::new());

pub fn register_chardev(id: DevId, device: Arc<dyn CharDevice>) -> KernelResult<()> {
    CHARDEV_REGISTRY.write().register(id, device)
}

pub fn unregister_chardev(id: DevId) -> Option<Arc<dyn CharDevice>> {
    CHARDEV_REGISTRY.write().unregister(id)
}

pub fn get_chardev(id: DevId) -> Option<Arc<dyn CharDevice>> {
    CHARDEV_REGISTRY.read().get(id)
}

/// /dev/null: reads EOF, writes vanish
pub struct NullDevice;

impl CharDevice for NullDevice {
    fn name(&self) -> &str {
        "null"
    }

    fn read(&self, _buf: &mut [u8]) -> KernelResult<usize> {
        Ok(0)
    }

    fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        Ok(buf.len())
    }
}

/// /dev/zero: reads fill with zero bytes, writes vanish
pub struct ZeroDevice;

impl CharDevice for ZeroDevice {
    fn name(&self) -> &str {
        "zero"
    }

    fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        buf.fill(0);
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        Ok(buf.len())
    }
}

/// /dev/random: xorshift PRNG stream (not cryptographic)
pub struct RandomDevice {
    state: AtomicU32,
}

impl RandomDevice {
    pub const fn new(seed: u32) -> Self {
        Self {
            state: AtomicU32::new(seed),
        }
    }

    fn next(&self) -> u32 {
        let mut x = self.state.load(Ordering::Relaxed);
        if x == 0 {
            x = 0x9e37_79b9;
        }
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state.store(x, Ordering::Relaxed);
        x
    }
}

impl CharDevice for RandomDevice {
    fn name(&self) -> &str {
        "random"
    }

    fn read(&self, buf: &mut [u8]) -> KernelResult<usize> {
        for b in buf.iter_mut() {
            *b = self.next() as u8;
        }
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8]) -> KernelResult<usize> {
        // writes stir the pool
        for &b in buf {
            let x = self.state.load(Ordering::Relaxed);
            self.state.store(x.rotate_left(7) ^ b as u32, Ordering::Relaxed);
        }
        Ok(buf.len())
    }
}

/// Register the built-in memory devices
pub fn register_builtin_chardevs() {
    let _ = register_chardev(DevId::new(major::MEM, mem_minor::NULL), Arc::new(NullDevice));
    let _ = register_chardev(DevId::new(major::MEM, mem_minor::ZERO), Arc::new(ZeroDevice));
    let _ = register_chardev(
        DevId::new(major::MEM, mem_minor::RANDOM),
        Arc::new(RandomDevice::new(0x1234_5678)),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn devid_encode_roundtrip() {
        let id = DevId::new(major::MEM, mem_minor::RANDOM);
        assert_eq!(DevId::decode(id.encode()), id);
        assert!(DevId::null().is_null());
        assert!(!id.is_null());
    }

    #[test]
    fn registry_rejects_duplicate_id() {
        let mut reg = CharDeviceRegistry::new();
        let id = DevId::new(major::MEM, mem_minor::NULL);
        assert!(reg.register(id, Arc::new(NullDevice)).is_ok());
        assert_eq!(
            reg.register(id, Arc::new(NullDevice)),
            Err(KernelError::AlreadyExists)
        );
        assert!(reg.get(id).is_some());
        assert!(reg.unregister(id).is_some());
        assert!(reg.get(id).is_none());
    }

    #[test]
    fn mem_devices_behave() {
        let mut buf = [0xffu8; 8];
        assert_eq!(NullDevice.read(&mut buf), Ok(0));
        assert_eq!(NullDevice.write(&buf), Ok(8));

        assert_eq!(ZeroDevice.read(&mut buf), Ok(8));
        assert_eq!(buf, [0u8; 8]);

        let rng = RandomDevice::new(42);
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        assert_eq!(rng.read(&mut a), Ok(16));
        assert_eq!(rng.read(&mut b), Ok(16));
        assert_ne!(a, b);
    }
}
