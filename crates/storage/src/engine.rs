//! Storage engine: combines WAL + Memtable.
//!
//! All writes go through the WAL first (for durability), then into
//! the in-memory memtable (for fast reads). The engine is synchronous;
//! the async boundary is at the caller (the KV layer), which shares it
//! behind `Arc<RwLock<Store>>`.

use crate::memtable::Memtable;
use crate::value::{Cell, Record, Value};
use crate::wal::{FsyncPolicy, Wal, WalEntry, WalError};
use quorumkv_common::TimestampOracle;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// The local store for one node's namespace.
#[derive(Debug)]
pub struct Store {
    memtable: Memtable,
    wal: Wal,
    wal_path: PathBuf,
    fsync: FsyncPolicy,
    clock: TimestampOracle,
}

impl Store {
    /// Open or create a store at the given directory.
    pub fn open(data_dir: &Path, fsync: FsyncPolicy) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let wal_path = data_dir.join("wal.log");

        // Opening the WAL recovers the surviving entries and truncates
        // any torn tail. Recovery goes through the same merge as live
        // writes, so entry order does not matter.
        let (wal, recovered) = Wal::open(&wal_path, fsync)?;
        let mut memtable = Memtable::new();
        for entry in recovered {
            memtable.put(entry.key, entry.value);
        }

        tracing::info!(
            "store opened: {} keys recovered from WAL at {:?}",
            memtable.len(),
            wal_path
        );

        Ok(Self {
            memtable,
            wal,
            wal_path,
            fsync,
            clock: TimestampOracle::new(),
        })
    }

    /// Newest value for a key, unfiltered: may be a tombstone or expired.
    /// The caller decides what that means.
    pub fn get(&self, key: &[u8]) -> Option<Value> {
        self.memtable.get(key).cloned()
    }

    /// Store exactly the given value for a key: WAL first, then memtable.
    ///
    /// This is the replicated-write entry point — the value carries the
    /// originator's stamp and merges by the `Value` total order.
    pub fn put_value(&mut self, key: &[u8], value: Value) -> Result<(), StorageError> {
        self.wal.append(&WalEntry {
            key: key.to_vec(),
            value: value.clone(),
        })?;
        self.memtable.put(key.to_vec(), value);
        Ok(())
    }

    /// Write a live value with a fresh local stamp.
    pub fn upsert(&mut self, key: &[u8], data: Vec<u8>, expires_at_ms: u64) -> Result<(), StorageError> {
        let value = Value::live(data, self.clock.next(), expires_at_ms);
        self.put_value(key, value)
    }

    /// Write a tombstone with a fresh local stamp.
    pub fn remove(&mut self, key: &[u8]) -> Result<(), StorageError> {
        let value = Value::tombstone(self.clock.next());
        self.put_value(key, value)
    }

    /// Cells ascending by key from `from` inclusive, newest value per key.
    pub fn cells_from<'a>(&'a self, from: &[u8]) -> impl Iterator<Item = Cell> + 'a {
        self.memtable.cells_from(from)
    }

    /// Client-visible records ascending from `from` inclusive to `to`
    /// exclusive. Tombstones and values expired at `now_ms` are filtered
    /// out before emission.
    pub fn records<'a>(
        &'a self,
        from: &[u8],
        to: Option<&'a [u8]>,
        now_ms: u64,
    ) -> impl Iterator<Item = Record> + 'a {
        self.memtable
            .range(from, to)
            .filter(move |(_, value)| !value.tombstone && !value.is_expired(now_ms))
            .map(|(key, value)| Record {
                key: key.to_vec(),
                data: value.data.clone(),
            })
    }

    /// Number of distinct keys (tombstones included).
    pub fn key_count(&self) -> usize {
        self.memtable.len()
    }

    /// Drop entries expired at `now_ms` and rewrite the WAL down to the
    /// surviving state. Reclaims both memory and log space.
    pub fn compact(&mut self, now_ms: u64) -> Result<(), StorageError> {
        let dropped = self.memtable.drop_expired(now_ms);
        let survivors: Vec<WalEntry> = self
            .memtable
            .iter()
            .map(|(key, value)| WalEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect();
        self.wal = Wal::rewrite(&self.wal_path, survivors.into_iter(), self.fsync)?;
        tracing::info!(
            "compaction done: dropped {} expired entries, {} keys remain",
            dropped,
            self.memtable.len()
        );
        Ok(())
    }

    /// Fsync the WAL (for batch fsync mode).
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.wal.sync()?;
        Ok(())
    }

    /// Make every accepted write durable. The store must not be used
    /// afterwards.
    pub fn close(&mut self) -> Result<(), StorageError> {
        self.sync()
    }
}
