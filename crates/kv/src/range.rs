//! Streaming range scans over the local store.
//!
//! Range requests are not replicated: they read this node's store only.
//! The scan pulls a bounded batch of records per read-lock acquisition
//! and resumes after the last emitted key, so a slow consumer never
//! pins the store lock.

use quorumkv_common::now_millis;
use quorumkv_storage::{Record, Store};
use std::sync::Arc;
use tokio::sync::RwLock;

/// A cursor over `[from, end)` of the local store, ascending by key.
/// Tombstones and records expired at the moment of emission are skipped.
#[derive(Debug)]
pub struct RangeScan {
    store: Arc<RwLock<Store>>,
    /// Next from-key (inclusive); `None` once the scan is exhausted.
    cursor: Option<Vec<u8>>,
    end: Option<Vec<u8>>,
    batch: usize,
}

impl RangeScan {
    pub(crate) fn new(
        store: Arc<RwLock<Store>>,
        from: Vec<u8>,
        end: Option<Vec<u8>>,
        batch: usize,
    ) -> Self {
        Self {
            store,
            cursor: Some(from),
            end,
            batch: batch.max(1),
        }
    }

    /// The next batch of records, ascending. An empty batch means the
    /// scan is done.
    pub async fn next_batch(&mut self) -> Vec<Record> {
        let Some(from) = self.cursor.take() else {
            return Vec::new();
        };
        let now = now_millis();

        let store = self.store.read().await;
        let records: Vec<Record> = store
            .records(&from, self.end.as_deref(), now)
            .take(self.batch)
            .collect();
        drop(store);

        if records.len() == self.batch {
            // Resume strictly after the last emitted key.
            if let Some(last) = records.last() {
                let mut next = last.key.clone();
                next.push(0);
                self.cursor = Some(next);
            }
        }
        records
    }
}
