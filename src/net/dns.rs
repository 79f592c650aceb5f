//! DNS resolver
//!
//! Minimal stub resolver: one A-record question over UDP to the configured
//! server. Response parsing walks the question and answer sections; a label
//! length of 64 or more signals a 2-byte compression pointer that
//! terminates the name. When a response carries several A records the last
//! one in wire order wins (each match overwrites the previous), a
//! non-standard tie-break kept for parity and pinned by test.

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicU32, Ordering};

use super::ipv4::Ipv4Addr;
use super::socket::{AddressFamily, SockAddr, Socket, SocketType};
use crate::{KernelError, KernelResult};

/// DNS server port
pub const DNS_PORT: u16 = 53;

/// Fixed header size
const DNS_HLEN: usize = 12;

/// Query flags: standard query, recursion desired
const DNS_FLAGS_QUERY: u16 = 0x0100;

/// Record type A, class IN
const DNS_TYPE_A: u16 = 1;
const DNS_CLASS_IN: u16 = 1;

static TXID_STATE: AtomicU32 = AtomicU32::new(0);

/// Transaction id from a xorshift stream seeded with the clock
fn next_txid() -> u16 {
    let mut x = TXID_STATE.load(Ordering::Relaxed);
    if x == 0 {
        x = (crate::time::current_ticks() as u32) | 1;
    }
    x ^= x << 13;
    x ^= x >> 17;
    x ^= x << 5;
    TXID_STATE.store(x, Ordering::Relaxed);
    x as u16
}

/// Build a single-question A query for `domain`
pub fn build_dns_query(txid: u16, domain: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(DNS_HLEN + domain.len() + 6);

    buf.extend_from_slice(&txid.to_be_bytes());
    buf.extend_from_slice(&DNS_FLAGS_QUERY.to_be_bytes());
    // one question, no answer/authority/additional
    buf.extend_from_slice(&1u16.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());
    buf.extend_from_slice(&0u16.to_be_bytes());

    // question name: dot-separated labels, length-prefixed
    for label in domain.split('.') {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);

    buf.extend_from_slice(&DNS_TYPE_A.to_be_bytes());
    buf.extend_from_slice(&DNS_CLASS_IN.to_be_bytes());
    buf
}

/// Advance past an encoded name starting at `pos`
///
/// A label byte of 64 or more is a compression pointer: two bytes, and the
/// name ends there.
fn skip_name(buf: &[u8], mut pos: usize) -> KernelResult<usize> {
    loop {
        let len = *buf.get(pos).ok_or(KernelError::InvalidArgument)? as usize;
        if len == 0 {
            return Ok(pos + 1);
        }
        if len >= 64 {
            return Ok(pos + 2);
        }
        pos += 1 + len;
    }
}

fn read_u16(buf: &[u8], pos: usize) -> KernelResult<u16> {
    let hi = *buf.get(pos).ok_or(KernelError::InvalidArgument)?;
    let lo = *buf.get(pos + 1).ok_or(KernelError::InvalidArgument)?;
    Ok(u16::from_be_bytes([hi, lo]))
}

/// Extract the resolved address from a response packet
///
/// Walks every answer; every matching A record overwrites the result, so
/// the last record in wire order is returned.
pub fn parse_dns_response(buf: &[u8]) -> KernelResult<Ipv4Addr> {
    if buf.len() < DNS_HLEN {
        return Err(KernelError::InvalidArgument);
    }

    let qdcount = read_u16(buf, 4)? as usize;
    let ancount = read_u16(buf, 6)? as usize;

    let mut pos = DNS_HLEN;
    for _ in 0..qdcount {
        pos = skip_name(buf, pos)?;
        pos += 4; // qtype + qclass
    }

    let mut ip: Option<Ipv4Addr> = None;
    for _ in 0..ancount {
        pos = skip_name(buf, pos)?;
        let rtype = read_u16(buf, pos)?;
        let rclass = read_u16(buf, pos + 2)?;
        let rdlength = read_u16(buf, pos + 8)? as usize;
        pos += 10;

        if rtype == DNS_TYPE_A && rclass == DNS_CLASS_IN && rdlength == 4 {
            let octets = buf.get(pos..pos + 4).ok_or(KernelError::InvalidArgument)?;
            ip = Some(Ipv4Addr::from_be_bytes([
                octets[0], octets[1], octets[2], octets[3],
            ]));
        }
        pos += rdlength;
    }

    ip.ok_or(KernelError::AddressNotAvailable)
}

/// Resolve a host name to an IPv4 address via the configured DNS server
pub fn resolve(domain: &str) -> KernelResult<Ipv4Addr> {
    let config = super::get_config().ok_or(KernelError::NetworkUnreachable)?;

    let sock = Socket::new(AddressFamily::Inet, SocketType::Dgram, 0);
    sock.ops().bind(
        &sock,
        SockAddr::Inet {
            addr: config.local_addr,
            port: 0,
        },
    )?;
    sock.ops().connect(
        &sock,
        SockAddr::Inet {
            addr: config.dns_server,
            port: DNS_PORT,
        },
    )?;

    let txid = next_txid();
    let query = build_dns_query(txid, domain);
    sock.ops().sendmsg(&sock, &query, None)?;

    let mut response = alloc::vec![0u8; 512];
    let result = loop {
        let (n, _) = sock.ops().recvmsg(&sock, &mut response)?;
        if n == 0 {
            break Err(KernelError::NotConnected);
        }
        // responses for other transactions are not ours
        if n >= 2 && read_u16(&response, 0)? == txid {
            break parse_dns_response(&response[..n]);
        }
    };
    let _ = sock.ops().shutdown(&sock);
    result
}

/// getaddrinfo-style convenience wrapper: dotted-quad literals short-circuit
pub fn getaddrinfo(node: &str) -> KernelResult<Ipv4Addr> {
    if let Some(ip) = parse_ipv4_literal(node) {
        return Ok(ip);
    }
    resolve(node)
}

fn parse_ipv4_literal(s: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut parts = s.split('.');
    for slot in octets.iter_mut() {
        *slot = parts.next()?.parse().ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(Ipv4Addr::from_be_bytes(octets))
}
