//! ARP and the neighbour cache
//!
//! The neighbour cache is a flat list: lookups scan linearly for a
//! Reachable entry, and learning appends a new entry without refreshing an
//! existing one, so repeated resolutions of the same address accumulate
//! duplicates. Resolution sends a broadcast request through a packet-family
//! socket and then blocks in a receive loop with no timeout or retry bound;
//! an unanswered request blocks the caller indefinitely. Both behaviors are
//! inherited gaps, kept for parity (see DESIGN.md).

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::RwLock;

use super::device::NetDevice;
use super::ethernet::{self, ETH_ALEN, ETH_BROADCAST, ETH_HLEN, ETH_P_ARP, ETH_P_IP, EtherType};
use super::ipv4::Ipv4Addr;
use super::skb::SkBuff;
use super::socket::{AddressFamily, SockAddr, Socket, SocketType};
use crate::KernelResult;
use crate::task::sched::cpu_relax;

/// Hardware type: Ethernet
pub const ARPHRD_ETHER: u16 = 1;

/// Operation codes
pub const ARPOP_REQUEST: u16 = 1;
pub const ARPOP_REPLY: u16 = 2;

/// ARP payload size for Ethernet/IPv4
pub const ARP_HLEN: usize = 28;

/// Neighbour reachability state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighbourState {
    Incomplete,
    Reachable,
    Stale,
    Delay,
    Probe,
    Failed,
}

/// One IP-to-hardware-address binding
#[derive(Debug, Clone)]
pub struct Neighbour {
    pub ip: Ipv4Addr,
    pub mac: [u8; ETH_ALEN],
    pub state: NeighbourState,
}

/// Global neighbour cache
static NEIGHBOURS: RwLock<Vec<Neighbour>> = RwLock::new(Vec::new());

/// First Reachable entry for `ip`
pub fn neigh_lookup(ip: Ipv4Addr) -> Option<[u8; ETH_ALEN]> {
    NEIGHBOURS
        .read()
        .iter()
        .find(|n| n.ip == ip && n.state == NeighbourState::Reachable)
        .map(|n| n.mac)
}

/// Append an entry; never updates an existing one in place
pub fn neigh_insert(ip: Ipv4Addr, mac: [u8; ETH_ALEN], state: NeighbourState) {
    NEIGHBOURS.write().push(Neighbour { ip, mac, state });
}

/// Snapshot of the cache, for diagnostics
pub fn neigh_entries() -> Vec<Neighbour> {
    NEIGHBOURS.read().clone()
}

#[cfg(test)]
pub(crate) fn clear_neighbours() {
    NEIGHBOURS.write().clear();
}

/// ARP payload for Ethernet/IPv4
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct ArpHdr {
    pub ar_hrd: [u8; 2],
    pub ar_pro: [u8; 2],
    pub ar_hln: u8,
    pub ar_pln: u8,
    pub ar_op: [u8; 2],
    pub ar_sha: [u8; ETH_ALEN],
    pub ar_sip: [u8; 4],
    pub ar_tha: [u8; ETH_ALEN],
    pub ar_tip: [u8; 4],
}

impl ArpHdr {
    pub fn hardware_type(&self) -> u16 {
        u16::from_be_bytes(self.ar_hrd)
    }

    pub fn protocol_type(&self) -> u16 {
        u16::from_be_bytes(self.ar_pro)
    }

    pub fn operation(&self) -> u16 {
        u16::from_be_bytes(self.ar_op)
    }

    pub fn sender_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from_be_bytes(self.ar_sip)
    }

    pub fn target_ip(&self) -> Ipv4Addr {
        Ipv4Addr::from_be_bytes(self.ar_tip)
    }
}

/// Receive an ARP packet (Ethernet header still present)
pub fn arp_rcv(mut skb: SkBuff) {
    if skb.pull(ETH_HLEN).is_none() {
        return;
    }
    if skb.len() < ARP_HLEN {
        return;
    }

    let hdr = unsafe { &*(skb.data().as_ptr() as *const ArpHdr) };

    if hdr.hardware_type() != ARPHRD_ETHER || hdr.protocol_type() != ETH_P_IP {
        return;
    }
    if hdr.ar_hln != ETH_ALEN as u8 || hdr.ar_pln != 4 {
        return;
    }

    let sender_ip = hdr.sender_ip();
    let sender_mac = hdr.ar_sha;
    let target_ip = hdr.target_ip();
    let op = hdr.operation();

    // learn the sender (appends, never refreshes)
    neigh_insert(sender_ip, sender_mac, NeighbourState::Reachable);
    log::debug!("arp: learned {} -> {:02x?}", sender_ip, sender_mac);

    if op == ARPOP_REQUEST {
        if let Some(dev) = skb.dev.as_ref() {
            if dev.ipv4_addr() == Some(target_ip) {
                send_arp_reply(dev, sender_ip, &sender_mac);
            }
        }
    }
}

fn fill_arp_payload(
    buf: &mut [u8],
    op: u16,
    sender_mac: &[u8; ETH_ALEN],
    sender_ip: Ipv4Addr,
    target_mac: &[u8; ETH_ALEN],
    target_ip: Ipv4Addr,
) {
    buf[0..2].copy_from_slice(&ARPHRD_ETHER.to_be_bytes());
    buf[2..4].copy_from_slice(&ETH_P_IP.to_be_bytes());
    buf[4] = ETH_ALEN as u8;
    buf[5] = 4;
    buf[6..8].copy_from_slice(&op.to_be_bytes());
    buf[8..14].copy_from_slice(sender_mac);
    buf[14..18].copy_from_slice(&sender_ip.to_be_bytes());
    buf[18..24].copy_from_slice(target_mac);
    buf[24..28].copy_from_slice(&target_ip.to_be_bytes());
}

/// Build a broadcast request frame (Ethernet header included)
pub fn build_arp_request(dev: &NetDevice, target_ip: Ipv4Addr) -> Option<Vec<u8>> {
    let our_ip = dev.ipv4_addr()?;
    let mut frame = alloc::vec![0u8; ETH_HLEN + ARP_HLEN];
    frame[0..6].copy_from_slice(&ETH_BROADCAST);
    frame[6..12].copy_from_slice(&dev.mac());
    frame[12..14].copy_from_slice(&ETH_P_ARP.to_be_bytes());
    fill_arp_payload(
        &mut frame[ETH_HLEN..],
        ARPOP_REQUEST,
        &dev.mac(),
        our_ip,
        &[0; ETH_ALEN],
        target_ip,
    );
    Some(frame)
}

fn send_arp_reply(dev: &Arc<NetDevice>, target_ip: Ipv4Addr, target_mac: &[u8; ETH_ALEN]) {
    let Some(our_ip) = dev.ipv4_addr() else {
        return;
    };
    let Some(mut skb) = SkBuff::alloc(ETH_HLEN, ARP_HLEN) else {
        return;
    };
    let Some(payload) = skb.put(ARP_HLEN) else {
        return;
    };
    fill_arp_payload(
        payload,
        ARPOP_REPLY,
        &dev.mac(),
        our_ip,
        target_mac,
        target_ip,
    );
    if ethernet::eth_header(&mut skb, target_mac, &dev.mac(), EtherType::Arp).is_none() {
        return;
    }
    let _ = dev.xmit(skb);
}

/// Parse a received frame as an ARP reply for `ip`; returns the sender MAC
fn match_arp_reply(frame: &[u8], ip: Ipv4Addr) -> Option<[u8; ETH_ALEN]> {
    if frame.len() < ETH_HLEN + ARP_HLEN {
        return None;
    }
    let hdr = unsafe { &*(frame[ETH_HLEN..].as_ptr() as *const ArpHdr) };
    if hdr.operation() != ARPOP_REPLY || hdr.sender_ip() != ip {
        return None;
    }
    Some(hdr.ar_sha)
}

/// Resolve an IP address to a hardware address
///
/// Cache hit returns immediately. On a miss, a broadcast request goes out
/// through a packet socket and the caller loops on that socket's receive
/// queue until a matching reply arrives. There is no timeout: if nobody
/// answers, this never returns.
pub fn lookup_mac_addr_from_ip(dev: &Arc<NetDevice>, ip: Ipv4Addr) -> KernelResult<[u8; ETH_ALEN]> {
    if let Some(mac) = neigh_lookup(ip) {
        return Ok(mac);
    }

    let sock = Socket::new(AddressFamily::Packet, SocketType::Raw, ETH_P_ARP as i32);
    sock.ops().bind(&sock, SockAddr::Packet { protocol: ETH_P_ARP })?;

    let frame = build_arp_request(dev, ip).ok_or(crate::KernelError::AddressNotAvailable)?;
    sock.ops().sendmsg(&sock, &frame, None)?;

    let mut buf = alloc::vec![0u8; ETH_HLEN + ARP_HLEN];
    loop {
        if let Some(n) = sock.try_recv_frame(&mut buf) {
            if let Some(mac) = match_arp_reply(&buf[..n], ip) {
                neigh_insert(ip, mac, NeighbourState::Reachable);
                return Ok(mac);
            }
            continue;
        }
        cpu_relax();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TEST_NET_LOCK;
    use crate::net::device::{LOOPBACK_OPS, clear_netdevs};
    use alloc::string::String;

    fn arp_frame(op: u16, sender_mac: [u8; 6], sender_ip: Ipv4Addr, target_ip: Ipv4Addr) -> Vec<u8> {
        let mut frame = alloc::vec![0u8; ETH_HLEN + ARP_HLEN];
        frame[0..6].copy_from_slice(&ETH_BROADCAST);
        frame[6..12].copy_from_slice(&sender_mac);
        frame[12..14].copy_from_slice(&ETH_P_ARP.to_be_bytes());
        fill_arp_payload(
            &mut frame[ETH_HLEN..],
            op,
            &sender_mac,
            sender_ip,
            &[0; 6],
            target_ip,
        );
        frame
    }

    #[test]
    fn repeated_learning_accumulates_duplicates() {
        let _g = TEST_NET_LOCK.lock();
        clear_neighbours();

        let ip = Ipv4Addr::new(10, 0, 2, 2);
        let frame = arp_frame(ARPOP_REPLY, [2, 0, 0, 0, 0, 7], ip, Ipv4Addr::new(10, 0, 2, 15));

        arp_rcv(*SkBuff::from_frame(&frame).unwrap());
        arp_rcv(*SkBuff::from_frame(&frame).unwrap());

        // entries append rather than refresh
        let dups = neigh_entries().iter().filter(|n| n.ip == ip).count();
        assert_eq!(dups, 2);
        assert_eq!(neigh_lookup(ip), Some([2, 0, 0, 0, 0, 7]));
        clear_neighbours();
    }

    #[test]
    fn lookup_skips_non_reachable_entries() {
        let _g = TEST_NET_LOCK.lock();
        clear_neighbours();

        let ip = Ipv4Addr::new(10, 0, 2, 9);
        neigh_insert(ip, [1; 6], NeighbourState::Incomplete);
        assert_eq!(neigh_lookup(ip), None);
        neigh_insert(ip, [2; 6], NeighbourState::Reachable);
        assert_eq!(neigh_lookup(ip), Some([2; 6]));
        clear_neighbours();
    }

    #[test]
    fn cached_entry_resolves_without_network() {
        let _g = TEST_NET_LOCK.lock();
        clear_neighbours();
        clear_netdevs();

        let dev = Arc::new(super::super::device::NetDevice::new(
            String::from("test0"),
            [2, 0, 0, 0, 0, 1],
            &LOOPBACK_OPS,
        ));

        let ip = Ipv4Addr::new(10, 0, 2, 2);
        neigh_insert(ip, [0xAA; 6], NeighbourState::Reachable);
        assert_eq!(lookup_mac_addr_from_ip(&dev, ip), Ok([0xAA; 6]));
        clear_neighbours();
    }

    #[test]
    fn request_frame_layout() {
        let _g = TEST_NET_LOCK.lock();
        let dev = super::super::device::NetDevice::new(
            String::from("test0"),
            [2, 0, 0, 0, 0, 1],
            &LOOPBACK_OPS,
        );
        dev.set_ipv4(Ipv4Addr::new(10, 0, 2, 15), Ipv4Addr::new(255, 255, 255, 0));

        let frame = build_arp_request(&dev, Ipv4Addr::new(10, 0, 2, 2)).unwrap();
        assert_eq!(&frame[0..6], &ETH_BROADCAST);
        assert_eq!(&frame[12..14], &ETH_P_ARP.to_be_bytes());

        let hdr = unsafe { &*(frame[ETH_HLEN..].as_ptr() as *const ArpHdr) };
        assert_eq!(hdr.operation(), ARPOP_REQUEST);
        assert_eq!(hdr.sender_ip(), Ipv4Addr::new(10, 0, 2, 15));
        assert_eq!(hdr.target_ip(), Ipv4Addr::new(10, 0, 2, 2));
    }
}
