//! Socket buffers
//!
//! An `SkBuff` is a packet container: one contiguous allocation with a
//! movable payload window described by `head <= data <= tail <= end`.
//! Protocol layers grow and shrink the window without copying: `reserve`
//! leaves room for headers to be prepended later, `put` appends payload,
//! `push` prepends a header, `pull` strips one.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use super::device::NetDevice;
use super::ipv4::Ipv4Addr;

/// Default headroom reserved for link + network + transport headers
pub const SKB_TX_HEADROOM: usize = 64;

/// Socket buffer
pub struct SkBuff {
    /// Backing allocation; `head` is index 0, `end` is `buf.len()`
    buf: Vec<u8>,
    /// Payload window start, offset from head
    data: usize,
    /// Payload window end, offset from head
    tail: usize,
    /// True allocation size in bytes
    pub truesize: usize,

    /// Device the packet arrived on / will leave through
    pub dev: Option<Arc<NetDevice>>,
    /// Source IP, filled by the IP layer
    pub saddr: Option<Ipv4Addr>,
    /// Destination IP, filled by the IP layer
    pub daddr: Option<Ipv4Addr>,
    /// IP protocol number, filled by the IP layer on receive
    pub ip_protocol: u8,
}

impl SkBuff {
    /// Allocate a buffer with separate header and payload budgets
    ///
    /// The allocation is `header_size + payload_size` plus one machine word
    /// of padding; `data`/`tail` start at the word-aligned point just past
    /// the header region, so `push` can prepend up to `header_size` bytes
    /// without moving the payload.
    pub fn alloc(header_size: usize, payload_size: usize) -> Option<Box<SkBuff>> {
        let word = core::mem::size_of::<usize>();
        let truesize = header_size + payload_size + word;
        let start = (header_size + word - 1) & !(word - 1);

        Some(Box::new(SkBuff {
            buf: vec![0u8; truesize],
            data: start,
            tail: start,
            truesize,
            dev: None,
            saddr: None,
            daddr: None,
            ip_protocol: 0,
        }))
    }

    /// Allocate a transmit buffer with standard headroom
    pub fn alloc_tx(payload_size: usize) -> Option<Box<SkBuff>> {
        Self::alloc(SKB_TX_HEADROOM, payload_size)
    }

    /// Build a receive buffer holding a complete frame
    pub fn from_frame(frame: &[u8]) -> Option<Box<SkBuff>> {
        let mut skb = Self::alloc(0, frame.len())?;
        skb.put(frame.len())?.copy_from_slice(frame);
        Some(skb)
    }

    /// Payload length (`tail - data`)
    pub fn len(&self) -> usize {
        self.tail - self.data
    }

    pub fn is_empty(&self) -> bool {
        self.tail == self.data
    }

    /// Bytes available for `put` at the tail
    pub fn tailroom(&self) -> usize {
        self.buf.len() - self.tail
    }

    /// Bytes available for `push` at the head
    pub fn headroom(&self) -> usize {
        self.data
    }

    /// Current payload window
    pub fn data(&self) -> &[u8] {
        &self.buf[self.data..self.tail]
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.data..self.tail]
    }

    /// Advance `data` and `tail` together, reserving headroom
    ///
    /// Only valid on an empty buffer (before any payload exists).
    pub fn reserve(&mut self, len: usize) -> Option<()> {
        if !self.is_empty() || self.tail + len > self.buf.len() {
            return None;
        }
        self.data += len;
        self.tail += len;
        Some(())
    }

    /// Append `len` bytes: advance `tail`, return the new region
    pub fn put(&mut self, len: usize) -> Option<&mut [u8]> {
        if self.tail + len > self.buf.len() {
            return None;
        }
        let start = self.tail;
        self.tail += len;
        Some(&mut self.buf[start..self.tail])
    }

    /// Prepend `len` bytes: retreat `data`, return the new region
    pub fn push(&mut self, len: usize) -> Option<&mut [u8]> {
        if len > self.data {
            return None;
        }
        self.data -= len;
        let end = self.data + len;
        Some(&mut self.buf[self.data..end])
    }

    /// Strip `len` bytes from the front: advance `data`
    pub fn pull(&mut self, len: usize) -> Option<()> {
        if len > self.len() {
            return None;
        }
        self.data += len;
        Some(())
    }

    /// Drop `len` bytes from the tail (padding removal)
    pub fn trim(&mut self, len: usize) {
        if len <= self.len() {
            self.tail -= len;
        }
    }
}

impl Clone for SkBuff {
    /// Deep copy: the backing allocation is duplicated and the window
    /// offsets are preserved. Clones never share storage.
    fn clone(&self) -> Self {
        Self {
            buf: self.buf.clone(),
            data: self.data,
            tail: self.tail,
            truesize: self.truesize,
            dev: self.dev.clone(),
            saddr: self.saddr,
            daddr: self.daddr,
            ip_protocol: self.ip_protocol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_invariant_holds_across_ops() {
        let mut skb = SkBuff::alloc(16, 64).unwrap();
        let word = core::mem::size_of::<usize>();

        // data/tail start word-aligned past the header region
        assert_eq!(skb.data % word, 0);
        assert!(skb.headroom() >= 16);
        assert_eq!(skb.len(), 0);

        let payload = skb.put(32).unwrap();
        payload.fill(0xAB);
        assert_eq!(skb.len(), 32);
        assert!(skb.data <= skb.tail && skb.tail <= skb.buf.len());

        let hdr = skb.push(14).unwrap();
        hdr.fill(0xCD);
        assert_eq!(skb.len(), 46);
        assert_eq!(&skb.data()[..14], &[0xCD; 14]);

        skb.pull(14).unwrap();
        assert_eq!(skb.len(), 32);
        assert_eq!(skb.data(), &[0xAB; 32]);

        // over-large ops are refused without touching the window
        let before = (skb.data, skb.tail);
        assert!(skb.push(4096).is_none());
        assert!(skb.put(4096).is_none());
        assert!(skb.pull(4096).is_none());
        assert_eq!((skb.data, skb.tail), before);
    }

    #[test]
    fn put_then_pull_round_trips() {
        let mut skb = SkBuff::alloc_tx(128).unwrap();
        let (d0, t0) = (skb.data, skb.tail);

        skb.put(40).unwrap();
        skb.pull(40).unwrap();
        assert_eq!(skb.tail, t0 + 40);
        assert_eq!(skb.data, d0 + 40);
        assert_eq!(skb.len(), 0);
    }

    #[test]
    fn clone_is_deep_and_preserves_offsets() {
        let mut skb = SkBuff::alloc(8, 32).unwrap();
        skb.put(16).unwrap().fill(0x11);

        let mut copy = skb.clone();
        assert_eq!(copy.data, skb.data);
        assert_eq!(copy.tail, skb.tail);
        assert_eq!(copy.data(), skb.data());

        copy.data_mut().fill(0x22);
        // the original's storage is untouched
        assert_eq!(skb.data(), &[0x11; 16]);
    }
}
