//! A contiguous range on the 64-bit ring.

use serde::{Deserialize, Serialize};

/// A half-open range on the ring, represented inclusively at both ends.
///
/// The ring wraps exactly once: `end` is the last hash this range owns, so
/// for the segment preceding the wrap `end == start_of_next - 1`, and for
/// the final segment `end == u64::MAX`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Range {
    pub start: u64,
    pub end: u64,
}

impl Range {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Whether `hash` falls within this range, accounting for wraparound
    /// (a range can only wrap as the single full-ring segment, where
    /// `start == 0` and `end == u64::MAX`, so a plain inclusive compare is
    /// always correct here -- ranges never wrap individually).
    pub fn contains(&self, hash: u64) -> bool {
        hash >= self.start && hash <= self.end
    }
}
