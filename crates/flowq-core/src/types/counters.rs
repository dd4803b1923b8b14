//! Four-lane flow counters.
//!
//! Every flow entry carries bytes and packets in both directions. Lanes are
//! u64 and additions wrap: inputs are bounded by physical traffic, so a wrap
//! can only come from counter deltas that were already corrupt upstream.

use serde::{Deserialize, Serialize};

use crate::query::Direction;

/// Byte and packet counters for one flow, received and sent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub bytes_rcvd: u64,
    pub bytes_sent: u64,
    pub pkts_rcvd: u64,
    pub pkts_sent: u64,
}

impl Counters {
    pub fn new(bytes_rcvd: u64, bytes_sent: u64, pkts_rcvd: u64, pkts_sent: u64) -> Self {
        Self {
            bytes_rcvd,
            bytes_sent,
            pkts_rcvd,
            pkts_sent,
        }
    }

    /// Lane-wise wrapping addition.
    pub fn add(&mut self, other: &Counters) {
        self.bytes_rcvd = self.bytes_rcvd.wrapping_add(other.bytes_rcvd);
        self.bytes_sent = self.bytes_sent.wrapping_add(other.bytes_sent);
        self.pkts_rcvd = self.pkts_rcvd.wrapping_add(other.pkts_rcvd);
        self.pkts_sent = self.pkts_sent.wrapping_add(other.pkts_sent);
    }

    /// Lane-wise wrapping subtraction.
    pub fn sub(&mut self, other: &Counters) {
        self.bytes_rcvd = self.bytes_rcvd.wrapping_sub(other.bytes_rcvd);
        self.bytes_sent = self.bytes_sent.wrapping_sub(other.bytes_sent);
        self.pkts_rcvd = self.pkts_rcvd.wrapping_sub(other.pkts_rcvd);
        self.pkts_sent = self.pkts_sent.wrapping_sub(other.pkts_sent);
    }

    /// Folds the two byte lanes.
    pub fn sum_bytes(&self) -> u64 {
        self.bytes_rcvd.wrapping_add(self.bytes_sent)
    }

    /// Folds the two packet lanes.
    pub fn sum_packets(&self) -> u64 {
        self.pkts_rcvd.wrapping_add(self.pkts_sent)
    }

    /// Byte count relevant for the given query direction.
    pub fn bytes(&self, direction: Direction) -> u64 {
        match direction {
            Direction::In => self.bytes_rcvd,
            Direction::Out => self.bytes_sent,
            Direction::Sum | Direction::Both => self.sum_bytes(),
        }
    }

    /// Packet count relevant for the given query direction.
    pub fn packets(&self, direction: Direction) -> u64 {
        match direction {
            Direction::In => self.pkts_rcvd,
            Direction::Out => self.pkts_sent,
            Direction::Sum | Direction::Both => self.sum_packets(),
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Counters::default()
    }
}

impl std::ops::AddAssign for Counters {
    fn add_assign(&mut self, other: Counters) {
        self.add(&other);
    }
}
