//! Ethernet framing

use super::skb::SkBuff;

/// Hardware address length
pub const ETH_ALEN: usize = 6;

/// Ethernet header length (dst + src + ethertype)
pub const ETH_HLEN: usize = 14;

/// Broadcast hardware address
pub const ETH_BROADCAST: [u8; ETH_ALEN] = [0xFF; ETH_ALEN];

/// EtherType values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EtherType {
    Ipv4,
    Arp,
    Unknown(u16),
}

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_ARP: u16 = 0x0806;

impl EtherType {
    pub fn from_u16(v: u16) -> Self {
        match v {
            ETH_P_IP => EtherType::Ipv4,
            ETH_P_ARP => EtherType::Arp,
            other => EtherType::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            EtherType::Ipv4 => ETH_P_IP,
            EtherType::Arp => ETH_P_ARP,
            EtherType::Unknown(v) => v,
        }
    }
}

/// Prepend an Ethernet header to a frame under construction
pub fn eth_header(
    skb: &mut SkBuff,
    dest: &[u8; ETH_ALEN],
    source: &[u8; ETH_ALEN],
    proto: EtherType,
) -> Option<()> {
    let hdr = skb.push(ETH_HLEN)?;
    hdr[0..6].copy_from_slice(dest);
    hdr[6..12].copy_from_slice(source);
    hdr[12..14].copy_from_slice(&proto.to_u16().to_be_bytes());
    Some(())
}

/// Classify a received frame by its EtherType without consuming the header
pub fn eth_type_trans(skb: &SkBuff) -> EtherType {
    let data = skb.data();
    if data.len() < ETH_HLEN {
        return EtherType::Unknown(0);
    }
    EtherType::from_u16(u16::from_be_bytes([data[12], data[13]]))
}

/// Destination MAC of a received frame
pub fn eth_dest(skb: &SkBuff) -> Option<[u8; ETH_ALEN]> {
    let data = skb.data();
    if data.len() < ETH_HLEN {
        return None;
    }
    let mut mac = [0u8; ETH_ALEN];
    mac.copy_from_slice(&data[0..6]);
    Some(mac)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_builds_and_classifies() {
        let mut skb = SkBuff::alloc(ETH_HLEN, 32).unwrap();
        skb.put(4).unwrap().copy_from_slice(b"data");

        let dst = [0x02, 0, 0, 0, 0, 1];
        let src = [0x02, 0, 0, 0, 0, 2];
        eth_header(&mut skb, &dst, &src, EtherType::Arp).unwrap();

        assert_eq!(skb.len(), ETH_HLEN + 4);
        assert_eq!(eth_type_trans(&skb), EtherType::Arp);
        assert_eq!(eth_dest(&skb), Some(dst));

        skb.pull(ETH_HLEN).unwrap();
        assert_eq!(skb.data(), b"data");
    }

    #[test]
    fn short_frame_is_unknown() {
        let skb = SkBuff::from_frame(&[0u8; 6]).unwrap();
        assert_eq!(eth_type_trans(&skb), EtherType::Unknown(0));
        assert_eq!(eth_dest(&skb), None);
    }
}
