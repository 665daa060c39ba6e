//! Storage engine for quorumkv: WAL + ordered in-memory memtable.
//!
//! Every entry is a `(key, Value)` pair where the value carries the
//! originator's timestamp, the expiration deadline, and the tombstone
//! flag. The WAL provides durability; the memtable provides ordered
//! reads and range scans.

pub mod engine;
pub mod memtable;
pub mod value;
pub mod wal;

pub use engine::{StorageError, Store};
pub use value::{Cell, Record, Value, NEVER_EXPIRES};
