//! "At least K of N" collection over in-flight replica calls.
//!
//! A pure reduction over completion events: resolves as soon as the
//! outcome is decided, never polls, and abandons stragglers to their
//! own spawned tasks.

use crate::replica_client::ReplicaError;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("insufficient replicas: needed {needed}, got {got} of {total}")]
pub struct InsufficientReplicas {
    pub needed: usize,
    pub got: usize,
    pub total: usize,
}

/// Collects successful results from `total` replica calls until either
/// `needed` have arrived or so many have failed that `needed` is out of
/// reach.
#[derive(Debug, Clone, Copy)]
pub struct QuorumCollector {
    needed: usize,
    total: usize,
}

impl QuorumCollector {
    pub fn new(needed: usize, total: usize) -> Self {
        debug_assert!(needed >= 1 && needed <= total);
        Self { needed, total }
    }

    /// Drive the calls to a decision.
    ///
    /// Short-circuits with `Ok` the moment the `needed`-th success
    /// lands, and with `Err` the moment success becomes impossible
    /// (`total - failed < needed`). A panicked task counts as a failure.
    /// Calls still in flight on return are dropped; their spawned tasks
    /// finish on their own and the results are discarded.
    pub async fn collect<T>(
        &self,
        mut calls: FuturesUnordered<JoinHandle<Result<T, ReplicaError>>>,
    ) -> Result<Vec<T>, InsufficientReplicas> {
        let mut results = Vec::with_capacity(self.needed);
        let mut failed = 0usize;

        while let Some(joined) = calls.next().await {
            match joined {
                Ok(Ok(result)) => {
                    results.push(result);
                    if results.len() >= self.needed {
                        return Ok(results);
                    }
                }
                Ok(Err(err)) => {
                    tracing::debug!("replica call failed: {}", err);
                    failed += 1;
                }
                Err(join_err) => {
                    tracing::warn!("replica task died: {}", join_err);
                    failed += 1;
                }
            }
            if self.total - failed < self.needed {
                return Err(InsufficientReplicas {
                    needed: self.needed,
                    got: results.len(),
                    total: self.total,
                });
            }
        }

        // Fewer calls than `total` were handed in and they all finished.
        Err(InsufficientReplicas {
            needed: self.needed,
            got: results.len(),
            total: self.total,
        })
    }
}
