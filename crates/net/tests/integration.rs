//! Integration test: spin up an in-process cluster with real HTTP and
//! exercise the public entity API across nodes.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::{Request, StatusCode};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use quorumkv_cluster::Topology;
use quorumkv_common::{now_millis, NodeUrl};
use quorumkv_kv::Coordinator;
use quorumkv_net::wire::{EXPIRES_HEADER, PROXY_HEADER, TIMESTAMP_HEADER};
use quorumkv_net::{serve, HttpReplicaClient, ServerState};
use quorumkv_storage::wal::FsyncPolicy;
use quorumkv_storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};

struct TestCluster {
    urls: Vec<NodeUrl>,
    http: Client<HttpConnector, Full<Bytes>>,
    _dirs: Vec<TempDir>,
    _shutdowns: Vec<watch::Sender<bool>>,
}

async fn spawn_cluster(n: usize) -> TestCluster {
    spawn_cluster_with_down_nodes(n, 0).await
}

/// Start a cluster of `n` members where the last `down` members are in
/// the topology but never started.
async fn spawn_cluster_with_down_nodes(n: usize, down: usize) -> TestCluster {
    let mut listeners = Vec::new();
    for _ in 0..n {
        listeners.push(TcpListener::bind("127.0.0.1:0").await.unwrap());
    }
    let urls: Vec<NodeUrl> = listeners
        .iter()
        .map(|listener| {
            NodeUrl::new(format!("http://{}", listener.local_addr().unwrap())).unwrap()
        })
        .collect();

    let mut dirs = Vec::new();
    let mut shutdowns = Vec::new();
    for (i, listener) in listeners.into_iter().enumerate() {
        if i >= n - down {
            drop(listener);
            continue;
        }
        let dir = TempDir::new().unwrap();
        let store = Arc::new(RwLock::new(
            Store::open(dir.path(), FsyncPolicy::None).unwrap(),
        ));
        let topology = Arc::new(Topology::new(urls.clone(), urls[i].clone()).unwrap());
        let replica_client = Arc::new(HttpReplicaClient::new(&topology, Duration::from_secs(2)));
        let coordinator = Coordinator::new(topology, store, replica_client, 64);
        let state = Arc::new(ServerState::new(coordinator, 16, 64));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            serve(listener, state, shutdown_rx).await.unwrap();
        });
        dirs.push(dir);
        shutdowns.push(shutdown_tx);
    }

    TestCluster {
        urls,
        http: Client::builder(TokioExecutor::new()).build_http(),
        _dirs: dirs,
        _shutdowns: shutdowns,
    }
}

impl TestCluster {
    fn entity_uri(&self, node: usize, id: &str, replicas: Option<&str>) -> String {
        let mut uri = format!("{}/v0/entity?id={}", self.urls[node], id);
        if let Some(replicas) = replicas {
            uri.push_str("&replicas=");
            uri.push_str(replicas);
        }
        uri
    }

    async fn send(&self, request: Request<Full<Bytes>>) -> (StatusCode, Bytes) {
        let response = self.http.request(request).await.unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    async fn get(&self, node: usize, id: &str, replicas: Option<&str>) -> (StatusCode, Bytes) {
        let request = Request::get(self.entity_uri(node, id, replicas))
            .body(Full::new(Bytes::new()))
            .unwrap();
        self.send(request).await
    }

    async fn put(
        &self,
        node: usize,
        id: &str,
        body: &[u8],
        expires: Option<u64>,
        replicas: Option<&str>,
    ) -> StatusCode {
        let mut builder = Request::put(self.entity_uri(node, id, replicas));
        if let Some(expires) = expires {
            builder = builder.header(EXPIRES_HEADER, expires);
        }
        let request = builder
            .body(Full::new(Bytes::copy_from_slice(body)))
            .unwrap();
        self.send(request).await.0
    }

    async fn delete(&self, node: usize, id: &str, replicas: Option<&str>) -> StatusCode {
        let request = Request::delete(self.entity_uri(node, id, replicas))
            .body(Full::new(Bytes::new()))
            .unwrap();
        self.send(request).await.0
    }
}

// ---------------------------------------------------------------------------
// Status and basic round trips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_status_is_ok() {
    let cluster = spawn_cluster(1).await;
    let request = Request::get(format!("{}/v0/status", cluster.urls[0]))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, _) = cluster.send(request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_metrics_exposition() {
    let cluster = spawn_cluster(1).await;

    let request = Request::get(format!("{}/metrics", cluster.urls[0]))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, body) = cluster.send(request).await;
    assert_eq!(status, StatusCode::OK);

    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("quorumkv_http_requests_total"));
    assert!(text.contains("# TYPE"));
}

#[tokio::test]
async fn test_put_get_across_nodes() {
    let cluster = spawn_cluster(3).await;

    let status = cluster.put(0, "foo", b"bar", None, Some("2/3")).await;
    assert_eq!(status, StatusCode::CREATED);

    // Read from a different node than the one that accepted the write.
    let (status, body) = cluster.get(1, "foo", Some("2/3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"bar");
}

#[tokio::test]
async fn test_get_missing_is_not_found() {
    let cluster = spawn_cluster(3).await;
    let (status, _) = cluster.get(0, "nothing-here", Some("3/3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_delete_dominates_put() {
    let cluster = spawn_cluster(3).await;

    assert_eq!(
        cluster.put(0, "k", b"bar", None, Some("3/3")).await,
        StatusCode::CREATED
    );
    assert_eq!(
        cluster.delete(1, "k", Some("3/3")).await,
        StatusCode::ACCEPTED
    );
    let (status, _) = cluster.get(2, "k", Some("3/3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_put_after_delete_resurrects() {
    let cluster = spawn_cluster(3).await;

    // All three writes originate at the same node, whose oracle hands
    // out strictly increasing stamps.
    cluster.put(0, "k", b"v1", None, Some("3/3")).await;
    cluster.delete(0, "k", Some("3/3")).await;
    cluster.put(0, "k", b"v2", None, Some("3/3")).await;

    let (status, body) = cluster.get(2, "k", Some("3/3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"v2");
}

// ---------------------------------------------------------------------------
// Expiration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_value_expires() {
    let cluster = spawn_cluster(3).await;

    let deadline = now_millis() + 600;
    assert_eq!(
        cluster.put(0, "ttl", b"bar", Some(deadline), Some("3/3")).await,
        StatusCode::CREATED
    );

    let (status, body) = cluster.get(1, "ttl", Some("3/3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"bar");

    tokio::time::sleep(Duration::from_millis(1_200)).await;
    let (status, _) = cluster.get(1, "ttl", Some("3/3")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_overwrite_without_expiry_makes_key_immortal() {
    let cluster = spawn_cluster(3).await;

    let deadline = now_millis() + 500;
    cluster.put(0, "k", b"v1", Some(deadline), Some("3/3")).await;
    cluster.put(0, "k", b"v2", None, Some("3/3")).await;

    tokio::time::sleep(Duration::from_millis(1_000)).await;
    let (status, body) = cluster.get(1, "k", Some("3/3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"v2");
}

#[tokio::test]
async fn test_malformed_expires_means_never() {
    let cluster = spawn_cluster(1).await;

    let request = Request::put(cluster.entity_uri(0, "k", Some("1/1")))
        .header(EXPIRES_HEADER, "not-a-number")
        .body(Full::new(Bytes::from_static(b"v")))
        .unwrap();
    let (status, _) = cluster.send(request).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = cluster.get(0, "k", Some("1/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"v");
}

// ---------------------------------------------------------------------------
// Replica disagreement and proxy framing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_absent_replica_loses_to_value() {
    let cluster = spawn_cluster(3).await;

    // Write directly to two replicas via the proxy protocol, leaving the
    // third without the key.
    let stamp = now_millis();
    for node in 0..2 {
        let request = Request::put(cluster.entity_uri(node, "x-key", None))
            .header(PROXY_HEADER, "true")
            .header(TIMESTAMP_HEADER, stamp)
            .body(Full::new(Bytes::from_static(b"x")))
            .unwrap();
        let (status, _) = cluster.send(request).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    // A full read still resolves to the value: a miss never outvotes it.
    let (status, body) = cluster.get(2, "x-key", Some("3/3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"x");
}

#[tokio::test]
async fn test_proxy_get_framing() {
    let cluster = spawn_cluster(1).await;

    // Missing key: 404 with no timestamp header.
    let request = Request::get(cluster.entity_uri(0, "k", None))
        .header(PROXY_HEADER, "true")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = cluster.http.request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(!response.headers().contains_key(TIMESTAMP_HEADER));

    // Live value: 200 with the stored timestamp.
    cluster.put(0, "k", b"v", None, Some("1/1")).await;
    let request = Request::get(cluster.entity_uri(0, "k", None))
        .header(PROXY_HEADER, "true")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = cluster.http.request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(TIMESTAMP_HEADER));
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.as_ref(), b"v");

    // Tombstone: 404 but with the tombstone's timestamp.
    cluster.delete(0, "k", Some("1/1")).await;
    let request = Request::get(cluster.entity_uri(0, "k", None))
        .header(PROXY_HEADER, "true")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = cluster.http.request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(response.headers().contains_key(TIMESTAMP_HEADER));
}

#[tokio::test]
async fn test_proxy_get_returns_expired_value_raw() {
    let cluster = spawn_cluster(1).await;

    // Already expired at write time; the proxy path must still hand it
    // back so the originator can resolve expiry after the merge.
    let request = Request::put(cluster.entity_uri(0, "k", None))
        .header(PROXY_HEADER, "true")
        .header(TIMESTAMP_HEADER, now_millis())
        .header(EXPIRES_HEADER, 1u64)
        .body(Full::new(Bytes::from_static(b"stale")))
        .unwrap();
    cluster.send(request).await;

    let request = Request::get(cluster.entity_uri(0, "k", None))
        .header(PROXY_HEADER, "true")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = cluster.http.request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(EXPIRES_HEADER));

    // The public read applies the filter.
    let (status, _) = cluster.get(0, "k", Some("1/1")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Quorum failures
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_quorum_failure_when_peers_down() {
    // Three members configured, only one running.
    let cluster = spawn_cluster_with_down_nodes(3, 2).await;

    assert_eq!(
        cluster.put(0, "k", b"v", None, Some("2/3")).await,
        StatusCode::GATEWAY_TIMEOUT
    );
    assert_eq!(
        cluster.put(0, "k", b"v", None, Some("1/3")).await,
        StatusCode::CREATED
    );

    let (status, body) = cluster.get(0, "k", Some("1/3")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"v");

    let (status, _) = cluster.get(0, "k", Some("2/3")).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
}

// ---------------------------------------------------------------------------
// Range scans
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_range_scan_streams_live_records() {
    let cluster = spawn_cluster(1).await;

    for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
        cluster.put(0, key, value.as_bytes(), None, Some("1/1")).await;
    }
    cluster.delete(0, "b", Some("1/1")).await;

    let request = Request::get(format!("{}/v0/entities?start=a&end=d", cluster.urls[0]))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, body) = cluster.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"a\n1c\n3");
}

#[tokio::test]
async fn test_range_scan_unbounded() {
    let cluster = spawn_cluster(1).await;

    cluster.put(0, "k1", b"v1", None, Some("1/1")).await;
    cluster.put(0, "k2", b"v2", None, Some("1/1")).await;

    let request = Request::get(format!("{}/v0/entities?start=k1", cluster.urls[0]))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, body) = cluster.send(request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"k1\nv1k2\nv2");
}

#[tokio::test]
async fn test_range_parameter_validation() {
    let cluster = spawn_cluster(1).await;

    // start is required and must be non-empty
    for uri in [
        format!("{}/v0/entities", cluster.urls[0]),
        format!("{}/v0/entities?start=", cluster.urls[0]),
        format!("{}/v0/entities?start=a&end=", cluster.urls[0]),
    ] {
        let request = Request::get(uri).body(Full::new(Bytes::new())).unwrap();
        let (status, _) = cluster.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

// ---------------------------------------------------------------------------
// Parameter validation and routing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_entity_parameter_validation() {
    let cluster = spawn_cluster(3).await;

    // Missing / empty id
    for uri in [
        format!("{}/v0/entity", cluster.urls[0]),
        format!("{}/v0/entity?id=", cluster.urls[0]),
    ] {
        let request = Request::get(uri).body(Full::new(Bytes::new())).unwrap();
        let (status, _) = cluster.send(request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    // Broken replicas parameters
    for replicas in ["abc", "0/3", "3/2", "2/4"] {
        let (status, _) = cluster.get(0, "k", Some(replicas)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "replicas={}", replicas);
    }
}

#[tokio::test]
async fn test_method_not_allowed() {
    let cluster = spawn_cluster(1).await;

    let request = Request::post(cluster.entity_uri(0, "k", None))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, _) = cluster.send(request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    let request = Request::put(format!("{}/v0/entities?start=a", cluster.urls[0]))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, _) = cluster.send(request).await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_unknown_path_is_bad_request() {
    let cluster = spawn_cluster(1).await;
    let request = Request::get(format!("{}/v0/nope", cluster.urls[0]))
        .body(Full::new(Bytes::new()))
        .unwrap();
    let (status, _) = cluster.send(request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_binary_keys_roundtrip_percent_encoded() {
    let cluster = spawn_cluster(1).await;

    let key = "ключ со пробелами".as_bytes();
    let id = quorumkv_net::wire::percent_encode(key);

    assert_eq!(
        cluster.put(0, &id, b"v", None, Some("1/1")).await,
        StatusCode::CREATED
    );
    let (status, body) = cluster.get(0, &id, Some("1/1")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_ref(), b"v");
}
