//! quorumkv-node: entry point for a replicated KV node.
//!
//! Loads config, opens the local store, wires the topology, the HTTP
//! replica client and the coordinator, then serves the HTTP API with
//! graceful shutdown on ctrl-c.

use quorumkv_cluster::Topology;
use quorumkv_common::NodeUrl;
use quorumkv_kv::Coordinator;
use quorumkv_net::{serve, HttpReplicaClient, ServerState};
use quorumkv_storage::wal::FsyncPolicy;
use quorumkv_storage::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{watch, RwLock};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    quorumkv_metrics::init_tracing();

    // Load config: first CLI arg is the YAML config path
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = quorumkv_config::load_from_file(std::path::Path::new(&config_path))?;

    let local = NodeUrl::new(config.public_url.clone())?;
    let peers = config
        .peers
        .iter()
        .map(NodeUrl::new)
        .collect::<Result<Vec<_>, _>>()?;
    let topology = Arc::new(Topology::new(peers, local.clone())?);
    tracing::info!(
        "node {} joining a cluster of {} (quorum {})",
        local,
        topology.size(),
        topology.quorum_count()
    );

    // Open the local store
    let fsync = FsyncPolicy::from_str_config(&config.storage.fsync);
    let store = Arc::new(RwLock::new(Store::open(&config.storage.data_dir, fsync)?));

    // Wire the coordinator
    let replica_client = Arc::new(HttpReplicaClient::new(
        &topology,
        Duration::from_millis(config.kv.proxy_timeout_ms),
    ));
    let coordinator = Coordinator::new(
        topology.clone(),
        store.clone(),
        replica_client,
        config.kv.range_batch,
    );
    let state = Arc::new(ServerState::new(
        coordinator,
        config.kv.workers,
        config.kv.queue_size,
    ));

    // Serve with graceful shutdown on ctrl-c; the listener also exposes
    // the Prometheus text format at GET /metrics.
    let listener = TcpListener::bind(config.listen).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = tokio::spawn(serve(listener, state, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    tracing::info!("received ctrl-c, shutting down");
    let _ = shutdown_tx.send(true);
    server.await??;

    // Make accepted writes durable before exiting.
    store.write().await.close()?;
    tracing::info!("store closed, bye");
    Ok(())
}
