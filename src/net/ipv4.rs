//! IPv4
//!
//! Header parsing and construction, the internet checksum, the receive
//! dispatch into UDP/raw sockets, and the transmit path (route decision,
//! header build, neighbour resolution, link header, device transmit).

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::fmt;

use super::arp;
use super::device::{self, NetDevice};
use super::ethernet::{self, ETH_ALEN, ETH_HLEN, EtherType};
use super::skb::SkBuff;
use super::udp;
use crate::{KernelError, KernelResult};

/// IP protocol numbers
pub const IPPROTO_ICMP: u8 = 1;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_RAW: u8 = 255;

/// Minimum IP header length (no options)
pub const IP_HLEN_MIN: usize = 20;

/// Default TTL
pub const IP_DEFAULT_TTL: u8 = 64;

/// IPv4 address, host byte order internally
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Ipv4Addr(pub u32);

impl Ipv4Addr {
    pub const fn new(a: u8, b: u8, c: u8, d: u8) -> Self {
        Self(((a as u32) << 24) | ((b as u32) << 16) | ((c as u32) << 8) | (d as u32))
    }

    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn octets(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn is_broadcast(self) -> bool {
        self.0 == 0xFFFF_FFFF
    }

    pub fn is_unspecified(self) -> bool {
        self.0 == 0
    }

    /// Apply a netmask
    pub fn mask(self, netmask: Self) -> Self {
        Self(self.0 & netmask.0)
    }
}

impl fmt::Debug for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let o = self.octets();
        write!(f, "{}.{}.{}.{}", o[0], o[1], o[2], o[3])
    }
}

impl fmt::Display for Ipv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// IPv4 header without options
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Ipv4Hdr {
    /// Version (4 bits) + IHL (4 bits)
    pub version_ihl: u8,
    pub tos: u8,
    pub tot_len: [u8; 2],
    pub id: [u8; 2],
    pub frag_off: [u8; 2],
    pub ttl: u8,
    pub protocol: u8,
    pub check: [u8; 2],
    pub saddr: [u8; 4],
    pub daddr: [u8; 4],
}

impl Ipv4Hdr {
    pub fn version(&self) -> u8 {
        self.version_ihl >> 4
    }

    /// Header length in bytes
    pub fn ihl(&self) -> usize {
        ((self.version_ihl & 0x0F) as usize) * 4
    }

    pub fn tot_len(&self) -> u16 {
        u16::from_be_bytes(self.tot_len)
    }

    pub fn is_fragment(&self) -> bool {
        // More Fragments set, or a nonzero fragment offset
        (self.frag_off[0] & 0x20 != 0)
            || u16::from_be_bytes([self.frag_off[0] & 0x1F, self.frag_off[1]]) != 0
    }

    pub fn saddr(&self) -> Ipv4Addr {
        Ipv4Addr::from_be_bytes(self.saddr)
    }

    pub fn daddr(&self) -> Ipv4Addr {
        Ipv4Addr::from_be_bytes(self.daddr)
    }
}

static IP_ID: core::sync::atomic::AtomicU16 = core::sync::atomic::AtomicU16::new(1);

fn next_ip_id() -> u16 {
    IP_ID.fetch_add(1, core::sync::atomic::Ordering::Relaxed)
}

/// Internet checksum: one's complement of the one's complement sum of all
/// 16-bit big-endian words, odd trailing byte padded with zero.
pub fn ip_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut i = 0;
    while i + 1 < data.len() {
        sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
        i += 2;
    }
    if i < data.len() {
        sum += (data[i] as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// A header checksums to zero when valid
pub fn ip_check_checksum(hdr: &[u8]) -> bool {
    ip_checksum(hdr) == 0
}

/// Pseudo-header partial sum for UDP checksums
pub fn pseudo_header_checksum(saddr: Ipv4Addr, daddr: Ipv4Addr, protocol: u8, len: u16) -> u32 {
    let mut sum: u32 = 0;

    let s = saddr.to_be_bytes();
    sum += u16::from_be_bytes([s[0], s[1]]) as u32;
    sum += u16::from_be_bytes([s[2], s[3]]) as u32;

    let d = daddr.to_be_bytes();
    sum += u16::from_be_bytes([d[0], d[1]]) as u32;
    sum += u16::from_be_bytes([d[2], d[3]]) as u32;

    sum += protocol as u32;
    sum += len as u32;
    sum
}

/// Receive an IP packet (Ethernet header still present)
pub fn ip_rcv(mut skb: SkBuff) {
    if skb.pull(ETH_HLEN).is_none() {
        return;
    }
    if skb.len() < IP_HLEN_MIN {
        return;
    }

    let hdr = unsafe { &*(skb.data().as_ptr() as *const Ipv4Hdr) };

    if hdr.version() != 4 {
        return;
    }
    let ihl = hdr.ihl();
    if ihl < IP_HLEN_MIN || ihl > skb.len() {
        return;
    }
    if !ip_check_checksum(&skb.data()[..ihl]) {
        return;
    }
    let tot_len = hdr.tot_len() as usize;
    if tot_len < ihl || tot_len > skb.len() {
        return;
    }
    if tot_len < skb.len() {
        let excess = skb.len() - tot_len;
        skb.trim(excess);
    }
    if hdr.is_fragment() {
        return;
    }

    skb.ip_protocol = hdr.protocol;
    skb.saddr = Some(hdr.saddr());
    skb.daddr = Some(hdr.daddr());

    let protocol = hdr.protocol;
    let saddr = hdr.saddr();

    // raw sockets see the whole datagram, header included
    super::socket::raw_deliver(protocol, saddr, skb.data());

    if skb.pull(ihl).is_none() {
        return;
    }

    match protocol {
        IPPROTO_UDP => udp::udp_rcv(skb),
        _ => {
            log::trace!("ip: dropping protocol {} datagram", protocol);
        }
    }
}

/// Route decision: pick the outgoing device and the next-hop address
///
/// An on-subnet destination is its own next hop; everything else goes to
/// the configured gateway through the default interface.
pub fn route_lookup(daddr: Ipv4Addr) -> KernelResult<(Arc<NetDevice>, Ipv4Addr)> {
    if let Some(dev) = device::netdev_for_subnet(daddr) {
        return Ok((dev, daddr));
    }
    let dev = device::get_default_netdev().ok_or(KernelError::NetworkUnreachable)?;
    let config = super::get_config().ok_or(KernelError::NetworkUnreachable)?;
    Ok((dev, config.gateway))
}

/// Transmit an IP datagram
///
/// Builds the IP header over the payload already in `skb`, resolves the
/// next-hop hardware address (blocking until ARP answers), prepends the
/// link header, and hands the frame to the device.
pub fn ip_queue_xmit(mut skb: Box<SkBuff>, protocol: u8) -> KernelResult<()> {
    let daddr = skb.daddr.ok_or(KernelError::InvalidArgument)?;
    let (dev, next_hop) = route_lookup(daddr)?;
    let saddr = match skb.saddr {
        Some(a) => a,
        None => dev.ipv4_addr().ok_or(KernelError::AddressNotAvailable)?,
    };

    let payload_len = skb.len();
    let tot_len = (IP_HLEN_MIN + payload_len) as u16;

    let ip_hdr = skb.push(IP_HLEN_MIN).ok_or(KernelError::NoBufferSpace)?;
    // version 4, IHL 5
    ip_hdr[0] = 0x45;
    ip_hdr[1] = 0;
    ip_hdr[2..4].copy_from_slice(&tot_len.to_be_bytes());
    ip_hdr[4..6].copy_from_slice(&next_ip_id().to_be_bytes());
    // Don't Fragment
    ip_hdr[6] = 0x40;
    ip_hdr[7] = 0;
    ip_hdr[8] = IP_DEFAULT_TTL;
    ip_hdr[9] = protocol;
    ip_hdr[10] = 0;
    ip_hdr[11] = 0;
    ip_hdr[12..16].copy_from_slice(&saddr.to_be_bytes());
    ip_hdr[16..20].copy_from_slice(&daddr.to_be_bytes());

    let checksum = ip_checksum(&ip_hdr[..IP_HLEN_MIN]);
    ip_hdr[10..12].copy_from_slice(&checksum.to_be_bytes());

    skb.saddr = Some(saddr);
    skb.dev = Some(Arc::clone(&dev));

    let dest_mac = arp::lookup_mac_addr_from_ip(&dev, next_hop)?;
    ip_finish_output(skb, dest_mac)
}

/// Prepend the Ethernet header and transmit
pub fn ip_finish_output(mut skb: Box<SkBuff>, dest_mac: [u8; ETH_ALEN]) -> KernelResult<()> {
    let dev = skb.dev.clone().ok_or(KernelError::NoDevice)?;
    ethernet::eth_header(&mut skb, &dest_mac, &dev.mac(), EtherType::Ipv4)
        .ok_or(KernelError::NoBufferSpace)?;
    dev.xmit(skb)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_verifies_built_header() {
        let mut hdr = [0u8; IP_HLEN_MIN];
        hdr[0] = 0x45;
        hdr[2..4].copy_from_slice(&28u16.to_be_bytes());
        hdr[8] = IP_DEFAULT_TTL;
        hdr[9] = IPPROTO_UDP;
        hdr[12..16].copy_from_slice(&Ipv4Addr::new(10, 0, 2, 15).to_be_bytes());
        hdr[16..20].copy_from_slice(&Ipv4Addr::new(10, 0, 2, 2).to_be_bytes());

        let sum = ip_checksum(&hdr);
        hdr[10..12].copy_from_slice(&sum.to_be_bytes());
        assert!(ip_check_checksum(&hdr));

        // any corruption breaks verification
        hdr[16] ^= 1;
        assert!(!ip_check_checksum(&hdr));
    }

    #[test]
    fn odd_length_data_is_padded() {
        // checksum of [0x01] equals checksum of [0x01, 0x00]
        assert_eq!(ip_checksum(&[0x01]), ip_checksum(&[0x01, 0x00]));
    }

    #[test]
    fn addr_helpers() {
        let a = Ipv4Addr::new(10, 0, 2, 15);
        assert_eq!(a.to_be_bytes(), [10, 0, 2, 15]);
        assert_eq!(Ipv4Addr::from_be_bytes([10, 0, 2, 15]), a);
        assert_eq!(
            a.mask(Ipv4Addr::new(255, 255, 255, 0)),
            Ipv4Addr::new(10, 0, 2, 0)
        );
        assert!(Ipv4Addr::new(255, 255, 255, 255).is_broadcast());
        assert!(Ipv4Addr::new(0, 0, 0, 0).is_unspecified());
    }
}
