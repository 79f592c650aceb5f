//! Network subsystem
//!
//! Layering, bottom up: socket buffers, Ethernet framing, ARP/neighbour
//! cache, IPv4, UDP, then the socket layer and its file wrapper, with the
//! DNS stub resolver on top. `net_rx` is the receive entry point drivers
//! call with a complete frame; `dev_queue_xmit` is the transmit exit point.

use alloc::boxed::Box;

use spin::RwLock;

pub mod arp;
pub mod device;
pub mod dns;
pub mod ethernet;
pub mod ipv4;
pub mod skb;
pub mod socket;
pub mod socket_file;
pub mod udp;

pub use device::{NetDevice, NetDeviceOps, register_netdev};
pub use ethernet::EtherType;
pub use ipv4::Ipv4Addr;
pub use skb::SkBuff;
pub use socket::{AddressFamily, SockAddr, Socket, SocketType};
pub use socket_file::socket_file;

use crate::KernelResult;

/// Static interface configuration
#[derive(Debug, Clone, Copy)]
pub struct NetConfig {
    pub local_addr: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns_server: Ipv4Addr,
}

static CONFIG: RwLock<Option<NetConfig>> = RwLock::new(None);

/// Install the network configuration
pub fn init(config: NetConfig) {
    log::info!(
        "net: configured {} mask {} gw {} dns {}",
        config.local_addr,
        config.netmask,
        config.gateway,
        config.dns_server
    );
    *CONFIG.write() = Some(config);
}

pub fn get_config() -> Option<NetConfig> {
    *CONFIG.read()
}

/// Receive path entry point, called by drivers with a complete frame
pub fn net_rx(skb: SkBuff) {
    // packet sockets tap the frame before protocol dispatch
    socket::packet_deliver(ethernet::eth_type_trans(&skb).to_u16(), skb.data());

    match ethernet::eth_type_trans(&skb) {
        EtherType::Ipv4 => ipv4::ip_rcv(skb),
        EtherType::Arp => arp::arp_rcv(skb),
        EtherType::Unknown(_) => {
            // unknown protocol: drop
        }
    }

    if let Some(dev) = device::get_default_netdev() {
        dev.wake_rx();
    }
}

/// Transmit a frame through the device recorded on the buffer
pub fn dev_queue_xmit(skb: Box<SkBuff>) -> KernelResult<()> {
    let dev = skb
        .dev
        .clone()
        .ok_or(crate::KernelError::NoDevice)?;
    dev.xmit(skb)
}

/// Serializes tests that drive the global network state
#[cfg(test)]
pub(crate) static TEST_NET_LOCK: spin::Mutex<()> = spin::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::arp::{NeighbourState, clear_neighbours, neigh_insert};
    use crate::net::device::{clear_netdevs, register_loopback};
    use crate::net::socket::clear_socket_registries;
    use crate::net::udp::clear_udp_ports;

    fn fresh_net() -> alloc::sync::Arc<NetDevice> {
        clear_netdevs();
        clear_neighbours();
        clear_udp_ports();
        clear_socket_registries();

        let local = Ipv4Addr::new(10, 0, 2, 15);
        let dev = register_loopback("lo0", local, Ipv4Addr::new(255, 255, 255, 0)).unwrap();
        init(NetConfig {
            local_addr: local,
            netmask: Ipv4Addr::new(255, 255, 255, 0),
            gateway: Ipv4Addr::new(10, 0, 2, 2),
            dns_server: Ipv4Addr::new(10, 0, 2, 3),
        });
        neigh_insert(local, dev.mac(), NeighbourState::Reachable);
        dev
    }

    #[test]
    fn udp_datagram_loops_back_to_listener() {
        let _g = TEST_NET_LOCK.lock();
        let _dev = fresh_net();
        let local = Ipv4Addr::new(10, 0, 2, 15);

        let receiver = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        receiver
            .ops()
            .bind(&receiver, SockAddr::Inet { addr: local, port: 5353 })
            .unwrap();
        receiver.set_nonblocking(true);

        let sender = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        let sent = sender
            .ops()
            .sendmsg(
                &sender,
                b"loopback",
                Some(SockAddr::Inet { addr: local, port: 5353 }),
            )
            .unwrap();
        assert_eq!(sent, 8);

        // frame went out lo0, came straight back, and was demuxed to the
        // listener with the sender's ephemeral source port
        let mut buf = [0u8; 32];
        let (n, from) = receiver.ops().recvmsg(&receiver, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"loopback");
        let sender_port = sender.local_addr().unwrap().1;
        assert_eq!(from, Some(SockAddr::Inet { addr: local, port: sender_port }));

        let _ = sender.ops().shutdown(&sender);
        let _ = receiver.ops().shutdown(&receiver);
        clear_udp_ports();
        clear_netdevs();
        clear_neighbours();
    }

    #[test]
    fn raw_socket_sees_looped_ip_datagram() {
        let _g = TEST_NET_LOCK.lock();
        let _dev = fresh_net();
        let local = Ipv4Addr::new(10, 0, 2, 15);

        let raw = Socket::new(AddressFamily::Inet, SocketType::Raw, ipv4::IPPROTO_UDP as i32);
        raw.ops()
            .bind(&raw, SockAddr::Inet { addr: local, port: 0 })
            .unwrap();
        raw.set_nonblocking(true);

        let sender = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
        sender
            .ops()
            .sendmsg(
                &sender,
                b"x",
                Some(SockAddr::Inet { addr: local, port: 7 }),
            )
            .unwrap();

        // the raw socket receives the full IP datagram, header included
        let mut buf = [0u8; 128];
        let (n, from) = raw.ops().recvmsg(&raw, &mut buf).unwrap();
        assert!(n > ipv4::IP_HLEN_MIN);
        assert_eq!(buf[0] >> 4, 4);
        assert_eq!(buf[9], ipv4::IPPROTO_UDP);
        assert_eq!(from, Some(SockAddr::Inet { addr: local, port: 0 }));

        let _ = raw.ops().shutdown(&raw);
        let _ = sender.ops().shutdown(&sender);
        clear_udp_ports();
        clear_netdevs();
        clear_neighbours();
        clear_socket_registries();
    }
}
