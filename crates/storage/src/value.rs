//! Versioned value model: timestamps, TTL, tombstones, and the total
//! order used for conflict resolution.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Sentinel expiration deadline meaning "this value never expires".
pub const NEVER_EXPIRES: u64 = u64::MAX;

/// One immutable version of a key.
///
/// Stamped once at the originating node; replicas store the stamp
/// verbatim. A tombstone marks a deletion and carries no data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value {
    /// Originator write stamp, millis since epoch.
    pub timestamp_ms: u64,
    /// Absolute expiration deadline in millis, or [`NEVER_EXPIRES`].
    pub expires_at_ms: u64,
    /// Whether this version is a delete marker.
    pub tombstone: bool,
    /// Payload bytes; empty for tombstones.
    pub data: Vec<u8>,
}

impl Value {
    /// A live value.
    pub fn live(data: Vec<u8>, timestamp_ms: u64, expires_at_ms: u64) -> Self {
        Self {
            timestamp_ms,
            expires_at_ms,
            tombstone: false,
            data,
        }
    }

    /// A delete marker.
    pub fn tombstone(timestamp_ms: u64) -> Self {
        Self {
            timestamp_ms,
            expires_at_ms: NEVER_EXPIRES,
            tombstone: true,
            data: Vec::new(),
        }
    }

    /// Whether the value is logically absent at `now_ms`. Expiration is a
    /// read-side filter; the stored bytes stay until compaction.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms != NEVER_EXPIRES && self.expires_at_ms <= now_ms
    }
}

/// Conflict-resolution order: the *smaller* value is the winner.
///
/// Newest timestamp first (last writer wins); at equal timestamps a
/// tombstone beats a live value, then data bytes and the expiration
/// deadline keep the order total, so every node picks the same winner
/// from the same candidate set regardless of arrival order.
impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .timestamp_ms
            .cmp(&self.timestamp_ms)
            .then_with(|| other.tombstone.cmp(&self.tombstone))
            .then_with(|| self.data.cmp(&other.data))
            .then_with(|| self.expires_at_ms.cmp(&other.expires_at_ms))
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Engine-level pair emitted by the low-level cell iterator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub key: Vec<u8>,
    pub value: Value,
}

/// Cells order ascending by key; among equal keys the winning value
/// comes first.
impl Ord for Cell {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.value.cmp(&other.value))
    }
}

impl PartialOrd for Cell {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Client-visible projection of a live, non-expired value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub data: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newer_timestamp_wins() {
        let old = Value::live(b"old".to_vec(), 100, NEVER_EXPIRES);
        let new = Value::live(b"new".to_vec(), 200, NEVER_EXPIRES);
        assert!(new < old, "the newer value must order first");
    }

    #[test]
    fn test_tombstone_wins_timestamp_tie() {
        let live = Value::live(b"v".to_vec(), 100, NEVER_EXPIRES);
        let tomb = Value::tombstone(100);
        assert!(tomb < live);
    }

    #[test]
    fn test_newer_live_beats_older_tombstone() {
        let tomb = Value::tombstone(100);
        let live = Value::live(b"v".to_vec(), 200, NEVER_EXPIRES);
        assert!(live < tomb);
    }

    #[test]
    fn test_order_is_total_and_deterministic() {
        let mut values = vec![
            Value::live(b"b".to_vec(), 100, NEVER_EXPIRES),
            Value::live(b"a".to_vec(), 100, NEVER_EXPIRES),
            Value::live(b"a".to_vec(), 100, 500),
            Value::tombstone(100),
            Value::live(b"z".to_vec(), 300, NEVER_EXPIRES),
        ];
        let mut reversed: Vec<Value> = values.iter().cloned().rev().collect();
        values.sort();
        reversed.sort();
        assert_eq!(values, reversed, "sort order must not depend on input order");
        assert_eq!(values[0].timestamp_ms, 300, "newest stamp sorts first");
    }

    #[test]
    fn test_order_consistent_with_eq() {
        let a = Value::live(b"x".to_vec(), 7, 99);
        let b = Value::live(b"x".to_vec(), 7, 99);
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a, b);
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let v = Value::live(b"v".to_vec(), 1, 1_000);
        assert!(!v.is_expired(999));
        assert!(v.is_expired(1_000), "expires_at <= now means expired");
        assert!(v.is_expired(1_001));
    }

    #[test]
    fn test_never_expires() {
        let v = Value::live(b"v".to_vec(), 1, NEVER_EXPIRES);
        assert!(!v.is_expired(u64::MAX - 1));
    }

    #[test]
    fn test_cell_order_by_key_then_value() {
        let a = Cell {
            key: b"a".to_vec(),
            value: Value::live(b"1".to_vec(), 100, NEVER_EXPIRES),
        };
        let a_newer = Cell {
            key: b"a".to_vec(),
            value: Value::live(b"2".to_vec(), 200, NEVER_EXPIRES),
        };
        let b = Cell {
            key: b"b".to_vec(),
            value: Value::live(b"1".to_vec(), 999, NEVER_EXPIRES),
        };
        let mut cells = vec![b.clone(), a.clone(), a_newer.clone()];
        cells.sort();
        assert_eq!(cells, vec![a_newer, a, b]);
    }

    #[test]
    fn test_serde_roundtrip() {
        let v = Value::live(vec![0, 1, 255], 42, 1_000);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);

        let t = Value::tombstone(43);
        let json = serde_json::to_string(&t).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(t, back);
        assert!(back.tombstone);
        assert!(back.data.is_empty());
    }
}
