//! Abstraction over replica-to-replica calls.
//!
//! Concrete implementation lives in `quorumkv-net`.

use quorumkv_common::NodeUrl;
use quorumkv_storage::Value;

#[derive(Debug, thiserror::Error)]
pub enum ReplicaError {
    #[error("peer call failed: {0}")]
    Transport(String),
    #[error("peer call timed out")]
    Timeout,
    #[error("unparseable replica response: {0}")]
    Protocol(String),
}

/// What one replica reported for a key during a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The replica answered but holds nothing for the key, or answered
    /// with a status that carries no value.
    Miss,
    /// The replica returned a stored value. It may be a tombstone or
    /// already expired; resolution decides.
    Found(Value),
}

/// Transport for proxied single-replica requests.
///
/// A trait in the domain crate with the HTTP implementation in the net
/// crate, so the coordinator stays testable with a mock.
#[async_trait::async_trait]
pub trait ReplicaClient: Send + Sync + 'static {
    /// Fetch the replica's newest value for a key.
    async fn proxy_get(&self, target: &NodeUrl, key: &[u8]) -> Result<ReadOutcome, ReplicaError>;

    /// Store the originator's value on a replica.
    async fn proxy_put(
        &self,
        target: &NodeUrl,
        key: &[u8],
        value: &Value,
    ) -> Result<(), ReplicaError>;

    /// Store the originator's tombstone on a replica.
    async fn proxy_delete(
        &self,
        target: &NodeUrl,
        key: &[u8],
        timestamp_ms: u64,
    ) -> Result<(), ReplicaError>;
}
