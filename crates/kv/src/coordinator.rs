//! Request coordinator: fans client operations out to the replica set.
//!
//! The coordinator:
//! 1. Maps a key to its `from` primaries (topology)
//! 2. Dispatches to the local store and remote replicas in parallel
//! 3. Waits for `ack` protocol answers (QuorumCollector)
//! 4. Resolves the collected values: last-writer-wins by timestamp,
//!    tombstones dominate older values, expiry filters at read time
//!
//! Proxied requests (marked by the proxy header at the HTTP layer) skip
//! the fan-out and hit the local store directly via the `proxy_*`
//! methods.

use crate::params::ReplicaParams;
use crate::quorum::{InsufficientReplicas, QuorumCollector};
use crate::range::RangeScan;
use crate::replica_client::{ReadOutcome, ReplicaClient, ReplicaError};
use futures::stream::FuturesUnordered;
use quorumkv_cluster::Topology;
use quorumkv_common::{now_millis, TimestampOracle};
use quorumkv_storage::{StorageError, Store, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error(transparent)]
    InsufficientReplicas(#[from] InsufficientReplicas),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Replicated request coordinator.
///
/// Generic over `R: ReplicaClient` for testability — real deployment
/// uses the HTTP client from `quorumkv-net`; unit tests use a mock.
pub struct Coordinator<R: ReplicaClient> {
    topology: Arc<Topology>,
    store: Arc<RwLock<Store>>,
    client: Arc<R>,
    clock: TimestampOracle,
    range_batch: usize,
}

impl<R: ReplicaClient> std::fmt::Debug for Coordinator<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("local", self.topology.local())
            .field("cluster_size", &self.topology.size())
            .finish_non_exhaustive()
    }
}

impl<R: ReplicaClient> Coordinator<R> {
    pub fn new(
        topology: Arc<Topology>,
        store: Arc<RwLock<Store>>,
        client: Arc<R>,
        range_batch: usize,
    ) -> Self {
        Self {
            topology,
            store,
            client,
            clock: TimestampOracle::new(),
            range_batch,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// A fresh originator write stamp.
    pub fn stamp(&self) -> u64 {
        self.clock.next()
    }

    // -----------------------------------------------------------------------
    // Proxy paths: this node is a replica, not the originator
    // -----------------------------------------------------------------------

    /// Local read for a proxied GET. Returns the newest stored value,
    /// tombstones and expired values included — expiry is resolved at
    /// the originator after the merge.
    pub async fn proxy_get(&self, key: &[u8]) -> Option<Value> {
        quorumkv_metrics::metrics().proxied_requests.inc();
        let store = self.store.read().await;
        store.get(key)
    }

    /// Local write for a proxied PUT: stores exactly the originator's
    /// value.
    pub async fn proxy_put(&self, key: &[u8], value: Value) -> Result<(), KvError> {
        quorumkv_metrics::metrics().proxied_requests.inc();
        let mut store = self.store.write().await;
        store.put_value(key, value)?;
        Ok(())
    }

    /// Local write for a proxied DELETE: stores the originator's
    /// tombstone.
    pub async fn proxy_delete(&self, key: &[u8], timestamp_ms: u64) -> Result<(), KvError> {
        quorumkv_metrics::metrics().proxied_requests.inc();
        let mut store = self.store.write().await;
        store.put_value(key, Value::tombstone(timestamp_ms))?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // GET
    // -----------------------------------------------------------------------

    /// Replicated read. Fans out to `from` replicas, waits for `ack`
    /// answers, resolves the winner. `Ok(None)` means the key is absent
    /// (missing, deleted, or expired).
    pub async fn get(
        &self,
        key: &[u8],
        params: ReplicaParams,
    ) -> Result<Option<Vec<u8>>, KvError> {
        let metrics = quorumkv_metrics::metrics();
        metrics.kv_gets.inc();
        let _timer = metrics.kv_timer("get");

        let replicas = self.topology.primaries_for(key, params.from);
        let calls = FuturesUnordered::new();

        for node in replicas {
            if self.topology.is_local(&node) {
                let store = self.store.clone();
                let key = key.to_vec();
                calls.push(tokio::spawn(async move {
                    let store = store.read().await;
                    Ok::<ReadOutcome, ReplicaError>(match store.get(&key) {
                        Some(value) => ReadOutcome::Found(value),
                        None => ReadOutcome::Miss,
                    })
                }));
            } else {
                let client = self.client.clone();
                let key = key.to_vec();
                calls.push(tokio::spawn(async move {
                    client.proxy_get(&node, &key).await
                }));
            }
        }

        let outcomes = QuorumCollector::new(params.ack, params.from)
            .collect(calls)
            .await
            .inspect_err(|_| metrics.quorum_failures.inc())?;

        Ok(resolve_read(outcomes, now_millis()).map(|value| value.data))
    }

    // -----------------------------------------------------------------------
    // PUT
    // -----------------------------------------------------------------------

    /// Replicated write. Stamps the value here (the originating node)
    /// and fans it out; replicas store the stamp verbatim.
    pub async fn put(
        &self,
        key: &[u8],
        data: Vec<u8>,
        expires_at_ms: u64,
        params: ReplicaParams,
    ) -> Result<(), KvError> {
        let metrics = quorumkv_metrics::metrics();
        metrics.kv_puts.inc();
        let _timer = metrics.kv_timer("put");

        let value = Value::live(data, self.clock.next(), expires_at_ms);
        self.fan_out_write(key, value, params).await
    }

    // -----------------------------------------------------------------------
    // DELETE
    // -----------------------------------------------------------------------

    /// Replicated delete: a tombstone write, not a physical removal.
    pub async fn delete(&self, key: &[u8], params: ReplicaParams) -> Result<(), KvError> {
        let metrics = quorumkv_metrics::metrics();
        metrics.kv_deletes.inc();
        let _timer = metrics.kv_timer("delete");

        let value = Value::tombstone(self.clock.next());
        self.fan_out_write(key, value, params).await
    }

    /// Fan a stamped value out to the `from` primaries and wait for
    /// `ack` of them to accept it.
    async fn fan_out_write(
        &self,
        key: &[u8],
        value: Value,
        params: ReplicaParams,
    ) -> Result<(), KvError> {
        let replicas = self.topology.primaries_for(key, params.from);
        let calls = FuturesUnordered::new();

        for node in replicas {
            if self.topology.is_local(&node) {
                let store = self.store.clone();
                let key = key.to_vec();
                let value = value.clone();
                calls.push(tokio::spawn(async move {
                    let mut store = store.write().await;
                    store
                        .put_value(&key, value)
                        .map_err(|e| ReplicaError::Transport(e.to_string()))
                }));
            } else {
                let client = self.client.clone();
                let key = key.to_vec();
                let value = value.clone();
                calls.push(tokio::spawn(async move {
                    if value.tombstone {
                        client.proxy_delete(&node, &key, value.timestamp_ms).await
                    } else {
                        client.proxy_put(&node, &key, &value).await
                    }
                }));
            }
        }

        QuorumCollector::new(params.ack, params.from)
            .collect(calls)
            .await
            .inspect_err(|_| quorumkv_metrics::metrics().quorum_failures.inc())?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Range scans
    // -----------------------------------------------------------------------

    /// A streaming scan of `[from, end)` over the local store only.
    pub fn range(&self, from: Vec<u8>, end: Option<Vec<u8>>) -> RangeScan {
        quorumkv_metrics::metrics().kv_ranges.inc();
        RangeScan::new(self.store.clone(), from, end, self.range_batch)
    }
}

// ---------------------------------------------------------------------------
// Read resolution
// ---------------------------------------------------------------------------

/// Resolve the collected per-replica read outcomes into the winning
/// value, or `None` for "not found".
///
/// Live values are grouped by identity and the largest group wins, with
/// ties broken by the `Value` total order (newest stamp first). A
/// tombstone newer than the chosen live value makes the key absent, and
/// so does an expired deadline on the winner. Pure over its inputs: no
/// state shared across requests.
pub fn resolve_read(outcomes: Vec<ReadOutcome>, now_ms: u64) -> Option<Value> {
    let mut votes: HashMap<Value, usize> = HashMap::new();
    let mut newest_tombstone: Option<Value> = None;

    for outcome in outcomes {
        let ReadOutcome::Found(value) = outcome else {
            continue;
        };
        if value.tombstone {
            if newest_tombstone.as_ref().map_or(true, |t| value < *t) {
                newest_tombstone = Some(value);
            }
        } else {
            *votes.entry(value).or_insert(0) += 1;
        }
    }

    let mut chosen: Option<(Value, usize)> = None;
    for (value, count) in votes {
        chosen = match chosen {
            None => Some((value, count)),
            Some((best, best_count)) => {
                if count > best_count || (count == best_count && value < best) {
                    Some((value, count))
                } else {
                    Some((best, best_count))
                }
            }
        };
    }

    let live = chosen.map(|(value, _)| value)?;
    if let Some(tombstone) = newest_tombstone {
        if tombstone < live {
            return None;
        }
    }
    if live.is_expired(now_ms) {
        return None;
    }
    Some(live)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
