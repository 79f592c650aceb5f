//! UDP
//!
//! Connectionless datagram transport: a global port table maps local ports
//! to sockets; receive demultiplexes on the destination port and queues the
//! payload on the owning socket.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicU16, Ordering};

use spin::RwLock;

use super::ipv4::{self, IPPROTO_UDP, Ipv4Addr};
use super::skb::SkBuff;
use super::socket::Socket;
use crate::{KernelError, KernelResult};

/// UDP header length
pub const UDP_HLEN: usize = 8;

/// UDP header
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct UdpHdr {
    pub source: [u8; 2],
    pub dest: [u8; 2],
    pub len: [u8; 2],
    pub check: [u8; 2],
}

impl UdpHdr {
    pub fn source_port(&self) -> u16 {
        u16::from_be_bytes(self.source)
    }

    pub fn dest_port(&self) -> u16 {
        u16::from_be_bytes(self.dest)
    }

    pub fn length(&self) -> u16 {
        u16::from_be_bytes(self.len)
    }
}

/// Local port to socket map
static UDP_PORTS: RwLock<BTreeMap<u16, Arc<Socket>>> = RwLock::new(BTreeMap::new());

/// First ephemeral port (IANA dynamic range)
const EPHEMERAL_BASE: u16 = 49152;

static NEXT_EPHEMERAL: AtomicU16 = AtomicU16::new(EPHEMERAL_BASE);

/// Allocate an unused ephemeral port
pub fn alloc_ephemeral_port() -> u16 {
    let ports = UDP_PORTS.read();
    loop {
        let raw = NEXT_EPHEMERAL.fetch_add(1, Ordering::Relaxed);
        let port = if raw < EPHEMERAL_BASE {
            NEXT_EPHEMERAL.store(EPHEMERAL_BASE, Ordering::Relaxed);
            EPHEMERAL_BASE
        } else {
            raw
        };
        if !ports.contains_key(&port) {
            return port;
        }
    }
}

/// Claim a local port for a socket
pub fn udp_register_socket(port: u16, socket: Arc<Socket>) -> KernelResult<()> {
    let mut ports = UDP_PORTS.write();
    if ports.contains_key(&port) {
        return Err(KernelError::AddressInUse);
    }
    ports.insert(port, socket);
    Ok(())
}

pub fn udp_unregister_socket(port: u16) {
    UDP_PORTS.write().remove(&port);
}

pub fn udp_lookup_socket(port: u16) -> Option<Arc<Socket>> {
    UDP_PORTS.read().get(&port).cloned()
}

#[cfg(test)]
pub(crate) fn clear_udp_ports() {
    UDP_PORTS.write().clear();
}

/// Receive a UDP datagram (IP header already stripped)
pub fn udp_rcv(skb: SkBuff) {
    if skb.len() < UDP_HLEN {
        return;
    }

    let hdr = unsafe { &*(skb.data().as_ptr() as *const UdpHdr) };

    let dest_port = hdr.dest_port();
    let source_port = hdr.source_port();
    let udp_len = hdr.length() as usize;

    if udp_len < UDP_HLEN || udp_len > skb.len() {
        return;
    }

    let Some(saddr) = skb.saddr else {
        return;
    };

    let payload = &skb.data()[UDP_HLEN..udp_len];

    if let Some(socket) = udp_lookup_socket(dest_port) {
        log::trace!("udp: {} bytes to port {}", payload.len(), dest_port);
        socket.deliver_datagram(saddr, source_port, payload);
        socket.wake_rx();
    }
    // no listener: drop silently
}

/// Send a UDP datagram from a socket
///
/// `dest` overrides the socket's connected remote address. An unbound
/// socket is bound to the sending interface and an ephemeral port first,
/// so replies can be received.
pub fn udp_sendmsg(
    socket: &Arc<Socket>,
    data: &[u8],
    dest: Option<(Ipv4Addr, u16)>,
) -> KernelResult<usize> {
    let (dest_addr, dest_port) = match dest {
        Some(d) => d,
        None => socket.remote_addr().ok_or(KernelError::DestAddrRequired)?,
    };

    let (src_addr, src_port) = match socket.local_addr() {
        Some((addr, port)) if port != 0 => (addr, port),
        _ => {
            let config = super::get_config().ok_or(KernelError::AddressNotAvailable)?;
            let port = alloc_ephemeral_port();
            udp_register_socket(port, Arc::clone(socket))?;
            socket.set_local(config.local_addr, port);
            (config.local_addr, port)
        }
    };

    udp_build_and_send(src_addr, src_port, dest_addr, dest_port, data)?;
    Ok(data.len())
}

fn udp_build_and_send(
    saddr: Ipv4Addr,
    sport: u16,
    daddr: Ipv4Addr,
    dport: u16,
    data: &[u8],
) -> KernelResult<()> {
    let mut skb = SkBuff::alloc_tx(UDP_HLEN + data.len()).ok_or(KernelError::NoBufferSpace)?;

    skb.put(UDP_HLEN).ok_or(KernelError::NoBufferSpace)?;
    skb.put(data.len())
        .ok_or(KernelError::NoBufferSpace)?
        .copy_from_slice(data);

    let udp_len = (UDP_HLEN + data.len()) as u16;
    let hdr = &mut skb.data_mut()[..UDP_HLEN];
    hdr[0..2].copy_from_slice(&sport.to_be_bytes());
    hdr[2..4].copy_from_slice(&dport.to_be_bytes());
    hdr[4..6].copy_from_slice(&udp_len.to_be_bytes());
    hdr[6..8].copy_from_slice(&[0, 0]);

    let checksum = udp_checksum(saddr, daddr, skb.data());
    skb.data_mut()[6..8].copy_from_slice(&checksum.to_be_bytes());

    skb.saddr = Some(saddr);
    skb.daddr = Some(daddr);

    ipv4::ip_queue_xmit(skb, IPPROTO_UDP)
}

/// UDP checksum over pseudo-header + header + data
///
/// A computed zero is transmitted as 0xFFFF (zero on the wire means "no
/// checksum").
pub fn udp_checksum(saddr: Ipv4Addr, daddr: Ipv4Addr, udp_data: &[u8]) -> u16 {
    let len = udp_data.len() as u16;
    let mut sum = ipv4::pseudo_header_checksum(saddr, daddr, IPPROTO_UDP, len);

    let mut i = 0;
    while i + 1 < udp_data.len() {
        sum += u16::from_be_bytes([udp_data[i], udp_data[i + 1]]) as u32;
        i += 2;
    }
    if i < udp_data.len() {
        sum += (udp_data[i] as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    let result = !(sum as u16);
    if result == 0 { 0xFFFF } else { result }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TEST_NET_LOCK;
    use crate::net::socket::{AddressFamily, SocketType};

    #[test]
    fn checksum_includes_pseudo_header() {
        let saddr = Ipv4Addr::new(10, 0, 2, 15);
        let daddr = Ipv4Addr::new(10, 0, 2, 2);
        let datagram = [0u8, 53, 0, 53, 0, 9, 0, 0, 0x42];

        let sum = udp_checksum(saddr, daddr, &datagram);
        // verifying with the checksum in place folds to zero (or the
        // all-ones representation of zero)
        let mut with_sum = datagram;
        with_sum[6..8].copy_from_slice(&sum.to_be_bytes());
        let verify = udp_checksum(saddr, daddr, &with_sum);
        assert!(verify == 0 || verify == 0xFFFF);

        // a different source address changes the checksum
        assert_ne!(sum, udp_checksum(Ipv4Addr::new(10, 0, 2, 16), daddr, &datagram));
    }

    #[test]
    fn port_table_rejects_duplicates() {
        let _g = TEST_NET_LOCK.lock();
        clear_udp_ports();

        let a = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        let b = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        udp_register_socket(5000, a).unwrap();
        assert_eq!(udp_register_socket(5000, b), Err(KernelError::AddressInUse));
        assert!(udp_lookup_socket(5000).is_some());

        udp_unregister_socket(5000);
        assert!(udp_lookup_socket(5000).is_none());
        clear_udp_ports();
    }

    #[test]
    fn ephemeral_ports_skip_taken_slots() {
        let _g = TEST_NET_LOCK.lock();
        clear_udp_ports();

        let p1 = alloc_ephemeral_port();
        let sock = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        udp_register_socket(p1, sock).unwrap();
        let p2 = alloc_ephemeral_port();
        assert_ne!(p1, p2);
        udp_unregister_socket(p1);
        clear_udp_ports();
    }
}
