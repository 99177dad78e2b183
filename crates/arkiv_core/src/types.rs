//! Core type definitions for Arkiv.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global sequence number of an entry.
///
/// Sequence numbers are assigned once per key in strict insertion order,
/// starting at 0. They are never reused and never reassigned on update, so
/// the set of assigned numbers is always exactly `{0, 1, ..., n-1}`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Seq(pub u64);

impl Seq {
    /// Creates a new sequence number.
    #[must_use]
    pub const fn new(seq: u64) -> Self {
        Self(seq)
    }

    /// Returns the raw sequence value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Seq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seq:{}", self.0)
    }
}

/// Identifier of a segment: its creation timestamp in Unix milliseconds.
///
/// Identifiers are strictly monotonic across segments; when two segments
/// would be created within the same millisecond, the later one takes the
/// previous identifier plus one.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SegmentId(pub u64);

impl SegmentId {
    /// Creates a new segment identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment:{}", self.0)
    }
}

/// Where a key's value lives.
///
/// `segment_id` identifies the segment that held the key at insertion time;
/// it stays stable when that segment is later sealed. `created_at` is the
/// insertion timestamp in Unix milliseconds, non-decreasing across
/// insertions because keys arrive in real time order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Global sequence number.
    pub seq: Seq,
    /// Segment the key was inserted into.
    pub segment_id: SegmentId,
    /// Insertion timestamp (Unix millis).
    pub created_at: u64,
}

/// Returns the current wall-clock time in Unix milliseconds.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
