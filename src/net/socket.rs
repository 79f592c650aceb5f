//! Socket layer
//!
//! A socket is polymorphic over its address family and type through a
//! `ProtoOps` table chosen once at creation: UDP datagram, raw IP, and
//! packet (link-layer) sockets. Addressing state lives directly on the
//! socket; receive queues are per-socket with FIFO delivery and wait-queue
//! wakeups.

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use spin::{Mutex, RwLock};

use super::device;
use super::ethernet::{self, ETH_HLEN, EtherType};
use super::ipv4::{self, Ipv4Addr};
use super::skb::SkBuff;
use super::udp;
use crate::fs::file::flags;
use crate::task::sched::cpu_relax;
use crate::waitqueue::WaitQueue;
use crate::{KernelError, KernelResult};

/// Address family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AddressFamily {
    /// IPv4
    Inet = 2,
    /// Link-layer packet access
    Packet = 17,
}

/// Socket type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SocketType {
    /// Datagram
    Dgram = 2,
    /// Raw
    Raw = 3,
}

/// Socket-level address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SockAddr {
    /// IPv4 address and port
    Inet { addr: Ipv4Addr, port: u16 },
    /// Link-layer protocol binding
    Packet { protocol: u16 },
}

/// Per-family operations
///
/// Unsupported slots return `OperationNotSupported` explicitly.
pub trait ProtoOps: Send + Sync {
    fn bind(&self, sock: &Arc<Socket>, addr: SockAddr) -> KernelResult<()> {
        let _ = (sock, addr);
        Err(KernelError::OperationNotSupported)
    }

    fn connect(&self, sock: &Arc<Socket>, addr: SockAddr) -> KernelResult<()> {
        let _ = (sock, addr);
        Err(KernelError::OperationNotSupported)
    }

    fn listen(&self, sock: &Arc<Socket>, backlog: u32) -> KernelResult<()> {
        let _ = (sock, backlog);
        Err(KernelError::OperationNotSupported)
    }

    fn shutdown(&self, sock: &Arc<Socket>) -> KernelResult<()> {
        sock.set_eof();
        sock.wake_rx();
        Ok(())
    }

    fn sendmsg(&self, sock: &Arc<Socket>, buf: &[u8], dest: Option<SockAddr>)
    -> KernelResult<usize>;

    fn recvmsg(
        &self,
        sock: &Arc<Socket>,
        buf: &mut [u8],
    ) -> KernelResult<(usize, Option<SockAddr>)>;
}

/// Maximum queued datagrams/frames per socket
const MAX_RX_QUEUE: usize = 64;

/// Socket object
pub struct Socket {
    pub family: AddressFamily,
    pub sock_type: SocketType,
    /// Family-specific protocol number (IP protocol, or EtherType)
    pub protocol: i32,

    /// Open flags (O_NONBLOCK)
    flags: AtomicU32,

    local_addr: Mutex<Option<(Ipv4Addr, u16)>>,
    remote_addr: Mutex<Option<(Ipv4Addr, u16)>>,

    /// Datagram receive queue: (source addr, source port, payload)
    dgram_rx: Mutex<VecDeque<(Ipv4Addr, u16, Vec<u8>)>>,
    /// Frame receive queue for packet sockets (complete frames)
    frame_rx: Mutex<VecDeque<Vec<u8>>>,

    rx_wait: WaitQueue,
    eof: AtomicBool,

    ops: &'static dyn ProtoOps,
}

static UDP_PROTO_OPS: UdpProtoOps = UdpProtoOps;
static RAW_PROTO_OPS: RawIpProtoOps = RawIpProtoOps;
static PACKET_PROTO_OPS: PacketProtoOps = PacketProtoOps;

impl Socket {
    pub fn new(family: AddressFamily, sock_type: SocketType, protocol: i32) -> Arc<Self> {
        let ops: &'static dyn ProtoOps = match (family, sock_type) {
            (AddressFamily::Inet, SocketType::Dgram) => &UDP_PROTO_OPS,
            (AddressFamily::Inet, SocketType::Raw) => &RAW_PROTO_OPS,
            (AddressFamily::Packet, _) => &PACKET_PROTO_OPS,
        };
        Arc::new(Self {
            family,
            sock_type,
            protocol,
            flags: AtomicU32::new(0),
            local_addr: Mutex::new(None),
            remote_addr: Mutex::new(None),
            dgram_rx: Mutex::new(VecDeque::new()),
            frame_rx: Mutex::new(VecDeque::new()),
            rx_wait: WaitQueue::new(),
            eof: AtomicBool::new(false),
            ops,
        })
    }

    pub fn ops(&self) -> &'static dyn ProtoOps {
        self.ops
    }

    pub fn local_addr(&self) -> Option<(Ipv4Addr, u16)> {
        *self.local_addr.lock()
    }

    pub fn remote_addr(&self) -> Option<(Ipv4Addr, u16)> {
        *self.remote_addr.lock()
    }

    pub fn set_local(&self, addr: Ipv4Addr, port: u16) {
        *self.local_addr.lock() = Some((addr, port));
    }

    pub fn set_remote(&self, addr: Ipv4Addr, port: u16) {
        *self.remote_addr.lock() = Some((addr, port));
    }

    pub fn is_nonblocking(&self) -> bool {
        self.flags.load(Ordering::Acquire) & flags::O_NONBLOCK != 0
    }

    pub fn set_nonblocking(&self, enable: bool) {
        if enable {
            self.flags.fetch_or(flags::O_NONBLOCK, Ordering::Release);
        } else {
            self.flags.fetch_and(!flags::O_NONBLOCK, Ordering::Release);
        }
    }

    pub fn is_eof(&self) -> bool {
        self.eof.load(Ordering::Acquire)
    }

    pub fn set_eof(&self) {
        self.eof.store(true, Ordering::Release);
    }

    /// Queue a datagram (UDP and raw IP receive path)
    pub fn deliver_datagram(&self, src_addr: Ipv4Addr, src_port: u16, data: &[u8]) {
        let mut queue = self.dgram_rx.lock();
        if queue.len() < MAX_RX_QUEUE {
            queue.push_back((src_addr, src_port, data.to_vec()));
        }
    }

    /// Queue a complete link-layer frame (packet socket receive path)
    pub fn deliver_frame(&self, frame: &[u8]) {
        let mut queue = self.frame_rx.lock();
        if queue.len() < MAX_RX_QUEUE {
            queue.push_back(frame.to_vec());
        }
    }

    /// Non-blocking frame pop; truncates to `buf`
    pub fn try_recv_frame(&self, buf: &mut [u8]) -> Option<usize> {
        let frame = self.frame_rx.lock().pop_front()?;
        let n = buf.len().min(frame.len());
        buf[..n].copy_from_slice(&frame[..n]);
        Some(n)
    }

    pub fn poll_read(&self) -> bool {
        !self.dgram_rx.lock().is_empty() || !self.frame_rx.lock().is_empty() || self.is_eof()
    }

    pub fn rx_wait(&self) -> &WaitQueue {
        &self.rx_wait
    }

    pub fn wake_rx(&self) {
        self.rx_wait.wake_all();
    }

    /// Blocking datagram receive shared by the UDP and raw families
    fn recv_datagram(&self, buf: &mut [u8]) -> KernelResult<(usize, Option<SockAddr>)> {
        loop {
            if let Some((addr, port, data)) = self.dgram_rx.lock().pop_front() {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                return Ok((n, Some(SockAddr::Inet { addr, port })));
            }
            if self.is_eof() {
                return Ok((0, None));
            }
            if self.is_nonblocking() {
                return Err(KernelError::WouldBlock);
            }
            self.rx_wait.wait();
            cpu_relax();
        }
    }
}

/// UDP datagram sockets
struct UdpProtoOps;

impl ProtoOps for UdpProtoOps {
    fn bind(&self, sock: &Arc<Socket>, addr: SockAddr) -> KernelResult<()> {
        let SockAddr::Inet { addr, port } = addr else {
            return Err(KernelError::AddressFamilyNotSupported);
        };
        let port = if port == 0 { udp::alloc_ephemeral_port() } else { port };
        udp::udp_register_socket(port, Arc::clone(sock))?;
        sock.set_local(addr, port);
        Ok(())
    }

    fn connect(&self, sock: &Arc<Socket>, addr: SockAddr) -> KernelResult<()> {
        let SockAddr::Inet { addr, port } = addr else {
            return Err(KernelError::AddressFamilyNotSupported);
        };
        sock.set_remote(addr, port);
        Ok(())
    }

    fn sendmsg(
        &self,
        sock: &Arc<Socket>,
        buf: &[u8],
        dest: Option<SockAddr>,
    ) -> KernelResult<usize> {
        let dest = match dest {
            Some(SockAddr::Inet { addr, port }) => Some((addr, port)),
            Some(SockAddr::Packet { .. }) => {
                return Err(KernelError::AddressFamilyNotSupported);
            }
            None => None,
        };
        udp::udp_sendmsg(sock, buf, dest)
    }

    fn recvmsg(
        &self,
        sock: &Arc<Socket>,
        buf: &mut [u8],
    ) -> KernelResult<(usize, Option<SockAddr>)> {
        sock.recv_datagram(buf)
    }

    fn shutdown(&self, sock: &Arc<Socket>) -> KernelResult<()> {
        if let Some((_, port)) = sock.local_addr() {
            udp::udp_unregister_socket(port);
        }
        sock.set_eof();
        sock.wake_rx();
        Ok(())
    }
}

/// Raw sockets registered for IP delivery: (protocol, socket)
static RAW_SOCKETS: RwLock<Vec<(u8, Arc<Socket>)>> = RwLock::new(Vec::new());

/// Hand a received IP datagram (header included) to matching raw sockets
pub fn raw_deliver(protocol: u8, saddr: Ipv4Addr, datagram: &[u8]) {
    for (proto, sock) in RAW_SOCKETS.read().iter() {
        if *proto == protocol {
            sock.deliver_datagram(saddr, 0, datagram);
            sock.wake_rx();
        }
    }
}

fn raw_unregister(sock: &Arc<Socket>) {
    RAW_SOCKETS.write().retain(|(_, s)| !Arc::ptr_eq(s, sock));
}

/// Raw IP sockets
struct RawIpProtoOps;

impl ProtoOps for RawIpProtoOps {
    fn bind(&self, sock: &Arc<Socket>, addr: SockAddr) -> KernelResult<()> {
        let SockAddr::Inet { addr, port } = addr else {
            return Err(KernelError::AddressFamilyNotSupported);
        };
        sock.set_local(addr, port);
        RAW_SOCKETS
            .write()
            .push((sock.protocol as u8, Arc::clone(sock)));
        Ok(())
    }

    fn connect(&self, sock: &Arc<Socket>, addr: SockAddr) -> KernelResult<()> {
        let SockAddr::Inet { addr, port } = addr else {
            return Err(KernelError::AddressFamilyNotSupported);
        };
        sock.set_remote(addr, port);
        Ok(())
    }

    fn sendmsg(
        &self,
        sock: &Arc<Socket>,
        buf: &[u8],
        dest: Option<SockAddr>,
    ) -> KernelResult<usize> {
        let daddr = match dest {
            Some(SockAddr::Inet { addr, .. }) => addr,
            Some(SockAddr::Packet { .. }) => {
                return Err(KernelError::AddressFamilyNotSupported);
            }
            None => sock.remote_addr().ok_or(KernelError::DestAddrRequired)?.0,
        };

        let mut skb = SkBuff::alloc_tx(buf.len()).ok_or(KernelError::NoBufferSpace)?;
        skb.put(buf.len())
            .ok_or(KernelError::NoBufferSpace)?
            .copy_from_slice(buf);
        skb.saddr = sock.local_addr().map(|(a, _)| a).filter(|a| !a.is_unspecified());
        skb.daddr = Some(daddr);

        ipv4::ip_queue_xmit(skb, sock.protocol as u8)?;
        Ok(buf.len())
    }

    fn recvmsg(
        &self,
        sock: &Arc<Socket>,
        buf: &mut [u8],
    ) -> KernelResult<(usize, Option<SockAddr>)> {
        sock.recv_datagram(buf)
    }

    fn shutdown(&self, sock: &Arc<Socket>) -> KernelResult<()> {
        raw_unregister(sock);
        sock.set_eof();
        sock.wake_rx();
        Ok(())
    }
}

/// Packet sockets registered for frame delivery: (EtherType, socket)
static PACKET_SOCKETS: RwLock<Vec<(u16, Arc<Socket>)>> = RwLock::new(Vec::new());

/// Hand a received frame to packet sockets bound to its EtherType
pub fn packet_deliver(ethertype: u16, frame: &[u8]) {
    for (proto, sock) in PACKET_SOCKETS.read().iter() {
        if *proto == ethertype {
            sock.deliver_frame(frame);
            sock.wake_rx();
        }
    }
}

fn packet_unregister(sock: &Arc<Socket>) {
    PACKET_SOCKETS.write().retain(|(_, s)| !Arc::ptr_eq(s, sock));
}

/// Link-layer packet sockets
struct PacketProtoOps;

impl ProtoOps for PacketProtoOps {
    fn bind(&self, sock: &Arc<Socket>, addr: SockAddr) -> KernelResult<()> {
        let SockAddr::Packet { protocol } = addr else {
            return Err(KernelError::AddressFamilyNotSupported);
        };
        PACKET_SOCKETS.write().push((protocol, Arc::clone(sock)));
        Ok(())
    }

    fn sendmsg(
        &self,
        sock: &Arc<Socket>,
        buf: &[u8],
        dest: Option<SockAddr>,
    ) -> KernelResult<usize> {
        let dev = device::get_default_netdev().ok_or(KernelError::NoDevice)?;

        match sock.sock_type {
            SocketType::Raw => {
                // payload is a complete frame
                let skb = SkBuff::from_frame(buf).ok_or(KernelError::NoBufferSpace)?;
                dev.xmit(skb)?;
                Ok(buf.len())
            }
            SocketType::Dgram => {
                // link header built from the destination neighbour lookup
                let Some(SockAddr::Inet { addr, .. }) = dest else {
                    return Err(KernelError::DestAddrRequired);
                };
                let dest_mac = super::arp::neigh_lookup(addr)
                    .ok_or(KernelError::HostUnreachable)?;
                let mut skb =
                    SkBuff::alloc(ETH_HLEN, buf.len()).ok_or(KernelError::NoBufferSpace)?;
                skb.put(buf.len())
                    .ok_or(KernelError::NoBufferSpace)?
                    .copy_from_slice(buf);
                ethernet::eth_header(
                    &mut skb,
                    &dest_mac,
                    &dev.mac(),
                    EtherType::from_u16(sock.protocol as u16),
                )
                .ok_or(KernelError::NoBufferSpace)?;
                dev.xmit(skb)?;
                Ok(buf.len())
            }
        }
    }

    fn recvmsg(
        &self,
        sock: &Arc<Socket>,
        buf: &mut [u8],
    ) -> KernelResult<(usize, Option<SockAddr>)> {
        loop {
            if let Some(n) = sock.try_recv_frame(buf) {
                return Ok((
                    n,
                    Some(SockAddr::Packet {
                        protocol: sock.protocol as u16,
                    }),
                ));
            }
            if sock.is_eof() {
                return Ok((0, None));
            }
            if sock.is_nonblocking() {
                return Err(KernelError::WouldBlock);
            }
            sock.rx_wait().wait();
            cpu_relax();
        }
    }

    fn shutdown(&self, sock: &Arc<Socket>) -> KernelResult<()> {
        packet_unregister(sock);
        sock.set_eof();
        sock.wake_rx();
        Ok(())
    }
}

/// Detach a socket from every delivery registry (close path)
pub fn socket_release(sock: &Arc<Socket>) {
    let _ = sock.ops().shutdown(sock);
}

#[cfg(test)]
pub(crate) fn clear_socket_registries() {
    RAW_SOCKETS.write().clear();
    PACKET_SOCKETS.write().clear();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::TEST_NET_LOCK;

    #[test]
    fn listen_is_unsupported_for_datagram_families() {
        let _g = TEST_NET_LOCK.lock();
        let sock = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        assert_eq!(
            sock.ops().listen(&sock, 8),
            Err(KernelError::OperationNotSupported)
        );
    }

    #[test]
    fn nonblocking_recv_reports_would_block() {
        let _g = TEST_NET_LOCK.lock();
        let sock = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        sock.set_nonblocking(true);
        let mut buf = [0u8; 16];
        assert_eq!(
            sock.ops().recvmsg(&sock, &mut buf),
            Err(KernelError::WouldBlock)
        );
    }

    #[test]
    fn delivered_datagram_is_received_with_source() {
        let _g = TEST_NET_LOCK.lock();
        let sock = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        let src = Ipv4Addr::new(10, 0, 2, 2);
        sock.deliver_datagram(src, 5353, b"hello");

        let mut buf = [0u8; 16];
        let (n, from) = sock.ops().recvmsg(&sock, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
        assert_eq!(from, Some(SockAddr::Inet { addr: src, port: 5353 }));
    }

    #[test]
    fn packet_socket_receives_bound_ethertype_only() {
        let _g = TEST_NET_LOCK.lock();
        clear_socket_registries();

        let sock = Socket::new(AddressFamily::Packet, SocketType::Raw, 0x0806);
        sock.ops()
            .bind(&sock, SockAddr::Packet { protocol: 0x0806 })
            .unwrap();

        packet_deliver(0x0800, b"ip frame");
        packet_deliver(0x0806, b"arp frame");

        let mut buf = [0u8; 32];
        assert_eq!(sock.try_recv_frame(&mut buf), Some(9));
        assert_eq!(&buf[..9], b"arp frame");
        assert_eq!(sock.try_recv_frame(&mut buf), None);

        socket_release(&sock);
        assert!(PACKET_SOCKETS.read().is_empty());
    }

    #[test]
    fn shutdown_turns_recv_into_eof() {
        let _g = TEST_NET_LOCK.lock();
        let sock = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        sock.ops().shutdown(&sock).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(sock.ops().recvmsg(&sock, &mut buf), Ok((0, None)));
    }
}
