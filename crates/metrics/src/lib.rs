//! Metrics and tracing setup for quorumkv.
//!
//! One process-wide [`NodeMetrics`] registry backed by the `prometheus`
//! crate. This crate only owns the counters and their text exposition;
//! scraping goes through the node's main HTTP listener (`GET /metrics`
//! in quorumkv-net), not a listener of its own.

use prometheus::core::Collector;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;

/// Install the fmt tracing subscriber, filtered by `RUST_LOG` with an
/// `info` default.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

static METRICS: LazyLock<NodeMetrics> = LazyLock::new(NodeMetrics::new);

/// The process-wide metrics registry.
pub fn metrics() -> &'static NodeMetrics {
    &METRICS
}

/// All Prometheus metrics for a quorumkv node.
pub struct NodeMetrics {
    pub registry: Registry,

    // ── HTTP surface ──
    pub http_requests: IntCounterVec,
    pub rejected_requests: IntCounter,

    // ── KV operation counters ──
    pub kv_gets: IntCounter,
    pub kv_puts: IntCounter,
    pub kv_deletes: IntCounter,
    pub kv_ranges: IntCounter,
    pub proxied_requests: IntCounter,

    // ── KV operation latency ──
    pub kv_latency_secs: HistogramVec,

    // ── Replica fan-out ──
    pub replica_calls: IntCounterVec,
    pub replica_failures: IntCounter,
    pub quorum_failures: IntCounter,
}

/// Latency buckets (seconds) for KV operations.
const LATENCY_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

fn register<C: Collector + Clone + 'static>(registry: &Registry, collector: C) -> C {
    registry
        .register(Box::new(collector.clone()))
        .expect("metric name registered twice");
    collector
}

fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
    register(
        registry,
        IntCounter::with_opts(Opts::new(name, help)).expect("counter opts"),
    )
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    register(
        registry,
        IntCounterVec::new(Opts::new(name, help), labels).expect("counter vec opts"),
    )
}

fn latency_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let opts = HistogramOpts::new(name, help).buckets(LATENCY_BUCKETS.to_vec());
    register(
        registry,
        HistogramVec::new(opts, labels).expect("histogram opts"),
    )
}

impl NodeMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        let http_requests = counter_vec(
            &registry,
            "quorumkv_http_requests_total",
            "HTTP requests, by endpoint",
            &["endpoint", "method"],
        );
        let rejected_requests = counter(
            &registry,
            "quorumkv_rejected_requests_total",
            "Requests refused because the admission queue was full",
        );
        let kv_gets = counter(&registry, "quorumkv_gets_total", "KV GET operations");
        let kv_puts = counter(&registry, "quorumkv_puts_total", "KV PUT operations");
        let kv_deletes = counter(&registry, "quorumkv_deletes_total", "KV DELETE operations");
        let kv_ranges = counter(&registry, "quorumkv_ranges_total", "KV range scans");
        let proxied_requests = counter(
            &registry,
            "quorumkv_proxied_requests_total",
            "Intra-cluster proxy hops served by this node",
        );
        let kv_latency_secs = latency_vec(
            &registry,
            "quorumkv_latency_seconds",
            "KV operation latency in seconds",
            &["op_type"],
        );
        let replica_calls = counter_vec(
            &registry,
            "quorumkv_replica_calls_total",
            "Outbound proxied replica calls, by op",
            &["op_type"],
        );
        let replica_failures = counter(
            &registry,
            "quorumkv_replica_failures_total",
            "Proxied replica calls that failed or timed out",
        );
        let quorum_failures = counter(
            &registry,
            "quorumkv_quorum_failures_total",
            "Operations that could not reach their ack quorum",
        );

        Self {
            registry,
            http_requests,
            rejected_requests,
            kv_gets,
            kv_puts,
            kv_deletes,
            kv_ranges,
            proxied_requests,
            kv_latency_secs,
            replica_calls,
            replica_failures,
            quorum_failures,
        }
    }

    /// Latency timer guard for one KV operation; records on drop.
    pub fn kv_timer(&self, op_type: &str) -> prometheus::HistogramTimer {
        self.kv_latency_secs
            .with_label_values(&[op_type])
            .start_timer()
    }
}

/// Render every registered metric in the Prometheus text format.
pub fn encode_metrics() -> String {
    let families = metrics().registry.gather();
    let mut buf = Vec::new();
    if let Err(err) = TextEncoder::new().encode(&families, &mut buf) {
        tracing::error!("metrics encoding failed: {}", err);
        return String::new();
    }
    String::from_utf8_lossy(&buf).into_owned()
}
