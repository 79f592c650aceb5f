//! Network device abstraction
//!
//! A `NetDevice` pairs an interface identity (name, MAC, IP configuration)
//! with a driver-provided operations table. Devices live in a global
//! registry; the first registered device that is up serves as the default
//! route interface.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use bitflags::bitflags;
use spin::{Mutex, RwLock};

use super::ipv4::Ipv4Addr;
use super::skb::SkBuff;
use crate::waitqueue::WaitQueue;
use crate::{KernelError, KernelResult};

bitflags! {
    /// Interface flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IfFlags: u32 {
        /// Interface is up
        const UP = 1 << 0;
        /// Broadcast address valid
        const BROADCAST = 1 << 1;
        /// Loopback interface
        const LOOPBACK = 1 << 3;
        /// Resources allocated
        const RUNNING = 1 << 6;
        /// Does not use ARP
        const NOARP = 1 << 7;
        /// Receive all packets
        const PROMISC = 1 << 8;
    }
}

/// Driver operations for a network interface
pub trait NetDeviceOps: Send + Sync {
    /// Transmit a frame; takes ownership of the buffer
    fn xmit(&self, skb: Box<SkBuff>) -> KernelResult<()>;

    /// Maximum transmission unit
    fn mtu(&self) -> u32 {
        1500
    }

    /// Start the interface
    fn open(&self) -> KernelResult<()> {
        Ok(())
    }

    /// Stop the interface
    fn stop(&self) -> KernelResult<()> {
        Ok(())
    }
}

/// Interface statistics
#[derive(Default)]
pub struct NetDeviceStats {
    pub rx_packets: AtomicU64,
    pub tx_packets: AtomicU64,
    pub rx_bytes: AtomicU64,
    pub tx_bytes: AtomicU64,
    pub rx_dropped: AtomicU64,
    pub tx_errors: AtomicU64,
}

/// A network interface
pub struct NetDevice {
    name: String,
    mac: [u8; 6],
    mtu: u32,
    flags: AtomicU32,
    ops: &'static dyn NetDeviceOps,
    pub stats: NetDeviceStats,
    ipv4_addr: Mutex<Option<Ipv4Addr>>,
    ipv4_netmask: Mutex<Option<Ipv4Addr>>,
    rx_wait: WaitQueue,
}

impl NetDevice {
    pub fn new(name: String, mac: [u8; 6], ops: &'static dyn NetDeviceOps) -> Self {
        let mtu = ops.mtu();
        Self {
            name,
            mac,
            mtu,
            flags: AtomicU32::new(IfFlags::BROADCAST.bits()),
            ops,
            stats: NetDeviceStats::default(),
            ipv4_addr: Mutex::new(None),
            ipv4_netmask: Mutex::new(None),
            rx_wait: WaitQueue::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mac(&self) -> [u8; 6] {
        self.mac
    }

    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    pub fn get_flags(&self) -> IfFlags {
        IfFlags::from_bits_truncate(self.flags.load(Ordering::Acquire))
    }

    pub fn is_up(&self) -> bool {
        self.get_flags().contains(IfFlags::UP)
    }

    pub fn up(&self) -> KernelResult<()> {
        self.ops.open()?;
        self.flags.fetch_or(
            (IfFlags::UP | IfFlags::RUNNING).bits(),
            Ordering::Release,
        );
        Ok(())
    }

    pub fn down(&self) -> KernelResult<()> {
        self.flags.fetch_and(
            !(IfFlags::UP | IfFlags::RUNNING).bits(),
            Ordering::Release,
        );
        self.ops.stop()
    }

    pub fn ipv4_addr(&self) -> Option<Ipv4Addr> {
        *self.ipv4_addr.lock()
    }

    pub fn ipv4_netmask(&self) -> Option<Ipv4Addr> {
        *self.ipv4_netmask.lock()
    }

    pub fn set_ipv4(&self, addr: Ipv4Addr, netmask: Ipv4Addr) {
        *self.ipv4_addr.lock() = Some(addr);
        *self.ipv4_netmask.lock() = Some(netmask);
    }

    /// Whether `addr` is on this interface's subnet
    pub fn on_subnet(&self, addr: Ipv4Addr) -> bool {
        match (self.ipv4_addr(), self.ipv4_netmask()) {
            (Some(local), Some(mask)) => addr.mask(mask) == local.mask(mask),
            _ => false,
        }
    }

    /// Transmit a frame through the driver
    pub fn xmit(&self, skb: Box<SkBuff>) -> KernelResult<()> {
        if !self.is_up() {
            return Err(KernelError::NetworkUnreachable);
        }
        let len = skb.len() as u64;
        match self.ops.xmit(skb) {
            Ok(()) => {
                self.stats.tx_packets.fetch_add(1, Ordering::Relaxed);
                self.stats.tx_bytes.fetch_add(len, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.stats.tx_errors.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    pub fn rx_wait(&self) -> &WaitQueue {
        &self.rx_wait
    }

    pub fn wake_rx(&self) {
        self.rx_wait.wake_all();
    }
}

/// Global device registry
static DEVICES: RwLock<Vec<Arc<NetDevice>>> = RwLock::new(Vec::new());

/// Register an interface
pub fn register_netdev(dev: Arc<NetDevice>) {
    let mac = dev.mac();
    log::info!(
        "net: registered {} ({:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x})",
        dev.name(),
        mac[0],
        mac[1],
        mac[2],
        mac[3],
        mac[4],
        mac[5]
    );
    DEVICES.write().push(dev);
}

/// Remove an interface from the registry
pub fn unregister_netdev(name: &str) -> Option<Arc<NetDevice>> {
    let mut devs = DEVICES.write();
    let pos = devs.iter().position(|d| d.name() == name)?;
    Some(devs.remove(pos))
}

/// Look up an interface by name
pub fn get_netdev(name: &str) -> Option<Arc<NetDevice>> {
    DEVICES.read().iter().find(|d| d.name() == name).cloned()
}

/// The first interface that is up (single-NIC setups)
pub fn get_default_netdev() -> Option<Arc<NetDevice>> {
    DEVICES.read().iter().find(|d| d.is_up()).cloned()
}

/// Interface whose subnet contains `addr`, if any
pub fn netdev_for_subnet(addr: Ipv4Addr) -> Option<Arc<NetDevice>> {
    DEVICES
        .read()
        .iter()
        .find(|d| d.is_up() && d.on_subnet(addr))
        .cloned()
}

#[cfg(test)]
pub(crate) fn clear_netdevs() {
    DEVICES.write().clear();
}

/// Software loopback: every transmitted frame re-enters the receive path
/// on the same interface.
pub struct LoopbackOps;

impl NetDeviceOps for LoopbackOps {
    fn xmit(&self, skb: Box<SkBuff>) -> KernelResult<()> {
        super::net_rx(*skb);
        Ok(())
    }
}

pub static LOOPBACK_OPS: LoopbackOps = LoopbackOps;

/// Create, configure, register, and bring up a loopback interface
pub fn register_loopback(name: &str, addr: Ipv4Addr, netmask: Ipv4Addr) -> KernelResult<Arc<NetDevice>> {
    let mac = [0x02, 0, 0, 0, 0, 1];
    let dev = Arc::new(NetDevice::new(String::from(name), mac, &LOOPBACK_OPS));
    dev.set_ipv4(addr, netmask);
    dev.up()?;
    register_netdev(dev.clone());
    Ok(dev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TEST_NET_LOCK;

    #[test]
    fn down_device_refuses_transmit() {
        let _g = TEST_NET_LOCK.lock();
        let dev = NetDevice::new(String::from("test0"), [2, 0, 0, 0, 0, 9], &LOOPBACK_OPS);
        let skb = SkBuff::alloc_tx(16).unwrap();
        assert_eq!(dev.xmit(skb), Err(KernelError::NetworkUnreachable));

        dev.up().unwrap();
        assert!(dev.get_flags().contains(IfFlags::UP | IfFlags::RUNNING));
    }

    #[test]
    fn subnet_match_selects_device() {
        let _g = TEST_NET_LOCK.lock();
        clear_netdevs();
        let dev = register_loopback(
            "lo0",
            Ipv4Addr::new(10, 0, 2, 15),
            Ipv4Addr::new(255, 255, 255, 0),
        )
        .unwrap();

        assert!(dev.on_subnet(Ipv4Addr::new(10, 0, 2, 99)));
        assert!(!dev.on_subnet(Ipv4Addr::new(10, 0, 3, 1)));
        assert!(netdev_for_subnet(Ipv4Addr::new(10, 0, 2, 1)).is_some());
        assert!(netdev_for_subnet(Ipv4Addr::new(192, 168, 0, 1)).is_none());
        clear_netdevs();
    }
}
