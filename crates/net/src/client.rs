//! HTTP replica client implementing `ReplicaClient`.
//!
//! Holds one persistent hyper client per remote peer, built from the
//! topology at startup. Every call is bounded by the configured proxy
//! timeout; a timeout or transport error surfaces as a failed replica
//! and is absorbed by the quorum collector.

use crate::wire;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use quorumkv_cluster::Topology;
use quorumkv_common::NodeUrl;
use quorumkv_kv::{ReadOutcome, ReplicaClient, ReplicaError};
use quorumkv_storage::{Value, NEVER_EXPIRES};
use std::collections::HashMap;
use std::time::Duration;

type PeerClient = Client<HttpConnector, Full<Bytes>>;

/// HTTP transport for proxied single-replica requests.
pub struct HttpReplicaClient {
    peers: HashMap<NodeUrl, PeerClient>,
    timeout: Duration,
}

impl std::fmt::Debug for HttpReplicaClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpReplicaClient")
            .field("peers", &self.peers.keys().collect::<Vec<_>>())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpReplicaClient {
    /// One client handle per remote member of the topology, kept for
    /// the whole process lifetime. The topology has already rejected
    /// duplicate nodes.
    pub fn new(topology: &Topology, timeout: Duration) -> Self {
        let mut peers = HashMap::new();
        for node in topology.peers() {
            let client = Client::builder(TokioExecutor::new()).build_http();
            peers.insert(node.clone(), client);
        }
        Self { peers, timeout }
    }

    fn peer(&self, target: &NodeUrl) -> Result<&PeerClient, ReplicaError> {
        self.peers
            .get(target)
            .ok_or_else(|| ReplicaError::Transport(format!("unknown peer: {}", target)))
    }

    fn entity_uri(target: &NodeUrl, key: &[u8]) -> String {
        format!(
            "{}/v0/entity?id={}",
            target.as_str(),
            wire::percent_encode(key)
        )
    }

    /// Issue a request and wait for the response headers within the
    /// proxy timeout.
    async fn send(
        &self,
        target: &NodeUrl,
        request: Request<Full<Bytes>>,
    ) -> Result<hyper::Response<hyper::body::Incoming>, ReplicaError> {
        let client = self.peer(target)?;
        match tokio::time::timeout(self.timeout, client.request(request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(err)) => Err(ReplicaError::Transport(err.to_string())),
            Err(_) => Err(ReplicaError::Timeout),
        }
    }
}

#[async_trait::async_trait]
impl ReplicaClient for HttpReplicaClient {
    async fn proxy_get(&self, target: &NodeUrl, key: &[u8]) -> Result<ReadOutcome, ReplicaError> {
        let metrics = quorumkv_metrics::metrics();
        metrics.replica_calls.with_label_values(&["get"]).inc();

        let request = Request::get(Self::entity_uri(target, key))
            .header(wire::PROXY_HEADER, "true")
            .body(Full::new(Bytes::new()))
            .map_err(|err| ReplicaError::Transport(err.to_string()))?;

        let outcome = async {
            let response = self.send(target, request).await?;
            let status = response.status();
            let timestamp = wire::header_u64(response.headers(), wire::TIMESTAMP_HEADER);
            let expires = wire::header_u64(response.headers(), wire::EXPIRES_HEADER);
            let body = tokio::time::timeout(self.timeout, response.into_body().collect())
                .await
                .map_err(|_| ReplicaError::Timeout)?
                .map_err(|err| ReplicaError::Transport(err.to_string()))?
                .to_bytes();
            parse_read_response(status, timestamp, expires, body)
        }
        .await;

        if outcome.is_err() {
            metrics.replica_failures.inc();
        }
        outcome
    }

    async fn proxy_put(
        &self,
        target: &NodeUrl,
        key: &[u8],
        value: &Value,
    ) -> Result<(), ReplicaError> {
        let metrics = quorumkv_metrics::metrics();
        metrics.replica_calls.with_label_values(&["put"]).inc();

        let mut builder = Request::put(Self::entity_uri(target, key))
            .header(wire::PROXY_HEADER, "true")
            .header(wire::TIMESTAMP_HEADER, value.timestamp_ms);
        if value.expires_at_ms != NEVER_EXPIRES {
            builder = builder.header(wire::EXPIRES_HEADER, value.expires_at_ms);
        }
        let request = builder
            .body(Full::new(Bytes::copy_from_slice(&value.data)))
            .map_err(|err| ReplicaError::Transport(err.to_string()))?;

        // Any protocol answer counts as an acknowledgement; only
        // transport failures and timeouts fail the replica.
        let outcome = self.send(target, request).await.map(drop);
        if outcome.is_err() {
            metrics.replica_failures.inc();
        }
        outcome
    }

    async fn proxy_delete(
        &self,
        target: &NodeUrl,
        key: &[u8],
        timestamp_ms: u64,
    ) -> Result<(), ReplicaError> {
        let metrics = quorumkv_metrics::metrics();
        metrics.replica_calls.with_label_values(&["delete"]).inc();

        let request = Request::delete(Self::entity_uri(target, key))
            .header(wire::PROXY_HEADER, "true")
            .header(wire::TIMESTAMP_HEADER, timestamp_ms)
            .body(Full::new(Bytes::new()))
            .map_err(|err| ReplicaError::Transport(err.to_string()))?;

        let outcome = self.send(target, request).await.map(drop);
        if outcome.is_err() {
            metrics.replica_failures.inc();
        }
        outcome
    }
}

/// Interpret a proxy GET answer.
///
/// `404` without a timestamp is a miss, `404` with one is a tombstone,
/// `200` with one is a live value (the deadline rides in the expires
/// header). Any other status is an answered replica that contributes no
/// value. A `200` without a timestamp violates the protocol.
fn parse_read_response(
    status: StatusCode,
    timestamp: Option<u64>,
    expires: Option<u64>,
    body: Bytes,
) -> Result<ReadOutcome, ReplicaError> {
    match (status, timestamp) {
        (StatusCode::OK, Some(timestamp_ms)) => Ok(ReadOutcome::Found(Value::live(
            body.to_vec(),
            timestamp_ms,
            expires.unwrap_or(NEVER_EXPIRES),
        ))),
        (StatusCode::OK, None) => Err(ReplicaError::Protocol(
            "200 replica answer without a timestamp".to_string(),
        )),
        (StatusCode::NOT_FOUND, Some(timestamp_ms)) => {
            Ok(ReadOutcome::Found(Value::tombstone(timestamp_ms)))
        }
        (StatusCode::NOT_FOUND, None) => Ok(ReadOutcome::Miss),
        _ => Ok(ReadOutcome::Miss),
    }
}
