//! Domain identifiers (strongly-typed numbers).
//!
//! Task indices and block numbers are both `u32` on chain. They are wrapped in
//! one generic `Num<T>` with a phantom marker so the two can never be mixed up
//! at a call site, while sharing a single implementation.
//!
//! Operator identities are 32-byte values (hex displayed). Sessions get a ULID
//! so log lines from one aggregation session can be correlated.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for numeric chain identifiers.
pub trait NumMarker: Send + Sync + 'static {
    /// Prefix used by `Display` (e.g. "task-").
    fn prefix() -> &'static str;
}

/// Generic `u32` identifier tagged with a marker type.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Num<T: NumMarker> {
    value: u32,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: NumMarker> Num<T> {
    pub const fn new(value: u32) -> Self {
        Self {
            value,
            _marker: PhantomData,
        }
    }

    pub const fn get(&self) -> u32 {
        self.value
    }
}

impl<T: NumMarker> From<u32> for Num<T> {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl<T: NumMarker> fmt::Display for Num<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.value)
    }
}

// ========================================
// Marker types
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TaskMarker {}

impl NumMarker for TaskMarker {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockMarker {}

impl NumMarker for BlockMarker {
    fn prefix() -> &'static str {
        "block-"
    }
}

/// Index of a task, assigned by the task manager contract in creation order.
pub type TaskIndex = Num<TaskMarker>;

/// Chain height.
pub type BlockNumber = Num<BlockMarker>;

/// Quorum identifier (one byte on chain).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QuorumNum(pub u8);

impl fmt::Display for QuorumNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "quorum-{}", self.0)
    }
}

/// Stake-weighted threshold, in percent (0..=100 is valid).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdPercentage(pub u8);

impl ThresholdPercentage {
    pub fn is_valid(self) -> bool {
        self.0 <= 100
    }
}

/// Operator identity (hash of the operator's registered key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OperatorId(pub [u8; 32]);

impl OperatorId {
    /// Test/demo helper: identity whose last byte is `n`.
    pub fn from_low_byte(n: u8) -> Self {
        let mut bytes = [0u8; 32];
        bytes[31] = n;
        Self(bytes)
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // 先頭 4 バイトだけで十分に識別できる
        write!(f, "OperatorId(0x{}..)", hex::encode(&self.0[..4]))
    }
}

/// Correlation id of one aggregation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Ulid);

impl SessionId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nums_display_with_prefix() {
        assert_eq!(TaskIndex::new(5).to_string(), "task-5");
        assert_eq!(BlockNumber::new(1000).to_string(), "block-1000");
        assert_eq!(QuorumNum(1).to_string(), "quorum-1");
        // let _: TaskIndex = BlockNumber::new(1); // <- does not compile
    }

    #[test]
    fn task_index_serializes_as_plain_number() {
        let s = serde_json::to_string(&TaskIndex::new(42)).unwrap();
        assert_eq!(s, "42");
        let back: TaskIndex = serde_json::from_str(&s).unwrap();
        assert_eq!(back, TaskIndex::new(42));
    }

    #[test]
    fn phantom_data_does_not_consume_memory() {
        use std::mem::size_of;
        assert_eq!(size_of::<TaskIndex>(), size_of::<u32>());
        assert_eq!(size_of::<BlockNumber>(), size_of::<u32>());
    }

    #[test]
    fn operator_id_displays_as_hex() {
        let id = OperatorId::from_low_byte(0xab);
        let s = id.to_string();
        assert!(s.starts_with("0x"));
        assert!(s.ends_with("ab"));
        assert_eq!(s.len(), 2 + 64);
    }

    #[test]
    fn threshold_validity() {
        assert!(ThresholdPercentage(100).is_valid());
        assert!(!ThresholdPercentage(101).is_valid());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(SessionId::generate(), SessionId::generate());
    }
}
