//! Byte-packed flow keys.
//!
//! Key layout (field, width in bytes):
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │ IPv4 (11 bytes)                                      │
//! │   sip: [u8; 4]   dip: [u8; 4]   dport: u16   proto  │
//! ├──────────────────────────────────────────────────────┤
//! │ IPv6 (35 bytes)                                      │
//! │   sip: [u8; 16]  dip: [u8; 16]  dport: u16   proto  │
//! └──────────────────────────────────────────────────────┘
//! ```
//! The port is big-endian; offsets are part of the on-disk contract.
//!
//! An extended key appends an 8-byte big-endian Unix timestamp used by
//! time-grouped queries. Its presence is inferred from the total length
//! (19 or 43 bytes), so the attribute offsets are identical for plain and
//! extended keys.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Width of a plain IPv4 key.
pub const KEY_WIDTH_V4: usize = 11;
/// Width of a plain IPv6 key.
pub const KEY_WIDTH_V6: usize = 35;
/// Width of the appended timestamp of an extended key.
pub const TIMESTAMP_WIDTH: usize = 8;

/// An opaque, immutable flow key. Hashing and equality work on the raw
/// bytes; typed accessors decode individual fields.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(Box<[u8]>);

impl Key {
    /// Wraps raw key bytes. Panics on a length that is neither a plain nor
    /// an extended key width: such bytes cannot come from a well-formed
    /// block and indicate an upstream invariant breach.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        assert!(
            valid_key_len(bytes.len()),
            "invalid key length {} (expected 11, 19, 35 or 43)",
            bytes.len()
        );
        Self(bytes.into_boxed_slice())
    }

    /// Builds a plain IPv4 key from its fields.
    pub fn v4(sip: Ipv4Addr, dip: Ipv4Addr, dport: u16, proto: u8) -> Self {
        let mut b = Vec::with_capacity(KEY_WIDTH_V4);
        b.extend_from_slice(&sip.octets());
        b.extend_from_slice(&dip.octets());
        b.extend_from_slice(&dport.to_be_bytes());
        b.push(proto);
        Self(b.into_boxed_slice())
    }

    /// Builds a plain IPv6 key from its fields.
    pub fn v6(sip: Ipv6Addr, dip: Ipv6Addr, dport: u16, proto: u8) -> Self {
        let mut b = Vec::with_capacity(KEY_WIDTH_V6);
        b.extend_from_slice(&sip.octets());
        b.extend_from_slice(&dip.octets());
        b.extend_from_slice(&dport.to_be_bytes());
        b.push(proto);
        Self(b.into_boxed_slice())
    }

    /// Returns a copy of this key with an 8-byte big-endian timestamp
    /// appended. Panics if the key is already extended.
    pub fn extend(&self, timestamp: i64) -> Self {
        assert!(!self.has_timestamp(), "key is already extended");
        let mut b = Vec::with_capacity(self.0.len() + TIMESTAMP_WIDTH);
        b.extend_from_slice(&self.0);
        b.extend_from_slice(&timestamp.to_be_bytes());
        Self(b.into_boxed_slice())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_v6(&self) -> bool {
        self.base_width() == KEY_WIDTH_V6
    }

    /// Width of the key without the optional timestamp.
    pub fn base_width(&self) -> usize {
        match self.0.len() {
            KEY_WIDTH_V4 => KEY_WIDTH_V4,
            KEY_WIDTH_V6 => KEY_WIDTH_V6,
            l if l == KEY_WIDTH_V4 + TIMESTAMP_WIDTH => KEY_WIDTH_V4,
            l if l == KEY_WIDTH_V6 + TIMESTAMP_WIDTH => KEY_WIDTH_V6,
            l => unreachable!("invalid key length {}", l),
        }
    }

    pub fn has_timestamp(&self) -> bool {
        self.0.len() != self.base_width()
    }

    /// Timestamp of an extended key.
    pub fn timestamp(&self) -> Option<i64> {
        if !self.has_timestamp() {
            return None;
        }
        let start = self.base_width();
        let raw: [u8; TIMESTAMP_WIDTH] = self.0[start..start + TIMESTAMP_WIDTH]
            .try_into()
            .expect("timestamp slice has fixed width");
        Some(i64::from_be_bytes(raw))
    }

    pub fn sip_bytes(&self) -> &[u8] {
        if self.is_v6() { &self.0[0..16] } else { &self.0[0..4] }
    }

    pub fn dip_bytes(&self) -> &[u8] {
        if self.is_v6() { &self.0[16..32] } else { &self.0[4..8] }
    }

    pub fn sip(&self) -> IpAddr {
        ip_from_bytes(self.sip_bytes())
    }

    pub fn dip(&self) -> IpAddr {
        ip_from_bytes(self.dip_bytes())
    }

    pub fn dport(&self) -> u16 {
        let off = if self.is_v6() { 32 } else { 8 };
        u16::from_be_bytes([self.0[off], self.0[off + 1]])
    }

    pub fn proto(&self) -> u8 {
        let off = if self.is_v6() { 34 } else { 10 };
        self.0[off]
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Key({} -> {}, dport={}, proto={}",
            self.sip(),
            self.dip(),
            self.dport(),
            self.proto()
        )?;
        if let Some(ts) = self.timestamp() {
            write!(f, ", ts={}", ts)?;
        }
        write!(f, ")")
    }
}

/// True if `len` is a valid plain or extended key width.
pub fn valid_key_len(len: usize) -> bool {
    matches!(
        len,
        KEY_WIDTH_V4 | KEY_WIDTH_V6 | 19 /* v4 + ts */ | 43 /* v6 + ts */
    )
}

fn ip_from_bytes(b: &[u8]) -> IpAddr {
    match b.len() {
        4 => {
            let o: [u8; 4] = b.try_into().expect("4-byte slice");
            IpAddr::V4(Ipv4Addr::from(o))
        }
        16 => {
            let o: [u8; 16] = b.try_into().expect("16-byte slice");
            IpAddr::V6(Ipv6Addr::from(o))
        }
        l => unreachable!("invalid IP byte width {}", l),
    }
}
