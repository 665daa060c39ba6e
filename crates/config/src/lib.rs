//! Configuration schema and loader for quorumkv nodes.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level node configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This node's listen address.
    pub listen: SocketAddr,

    /// This node's entry in `peers` — how the rest of the cluster
    /// addresses it.
    pub public_url: String,

    /// Every node of the cluster, including this one.
    pub peers: Vec<String>,

    /// KV / coordinator settings.
    #[serde(default)]
    pub kv: KvConfig,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KvConfig {
    /// Per-request timeout for proxied replica calls, in milliseconds.
    #[serde(default = "default_proxy_timeout_ms")]
    pub proxy_timeout_ms: u64,

    /// Concurrent request workers admitted before queueing.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Requests queued beyond `workers` before admission fails fast.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,

    /// Records pulled from the store per range-scan batch.
    #[serde(default = "default_range_batch")]
    pub range_batch: usize,
}

impl Default for KvConfig {
    fn default() -> Self {
        Self {
            proxy_timeout_ms: default_proxy_timeout_ms(),
            workers: default_workers(),
            queue_size: default_queue_size(),
            range_batch: default_range_batch(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for WAL and data files.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Fsync policy: "always", "batch", "none".
    #[serde(default = "default_fsync")]
    pub fsync: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            fsync: default_fsync(),
        }
    }
}

// --- Defaults ---

fn default_proxy_timeout_ms() -> u64 {
    1000
}
fn default_workers() -> usize {
    16
}
fn default_queue_size() -> usize {
    1024
}
fn default_range_batch() -> usize {
    256
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}
fn default_fsync() -> String {
    "batch".to_string()
}

// --- Loading ---

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl NodeConfig {
    /// Validate that configuration values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.peers.is_empty() {
            return Err(ConfigError::Invalid("peers must not be empty".into()));
        }
        let mut seen = HashSet::new();
        for peer in &self.peers {
            if !seen.insert(peer.trim_end_matches('/')) {
                return Err(ConfigError::Invalid(format!("duplicate node: {}", peer)));
            }
        }
        let public = self.public_url.trim_end_matches('/');
        if !self
            .peers
            .iter()
            .any(|peer| peer.trim_end_matches('/') == public)
        {
            return Err(ConfigError::Invalid(format!(
                "public_url ({}) must be listed in peers",
                self.public_url
            )));
        }
        if self.kv.workers == 0 {
            return Err(ConfigError::Invalid("kv.workers must be > 0".into()));
        }
        if self.kv.queue_size == 0 {
            return Err(ConfigError::Invalid("kv.queue_size must be > 0".into()));
        }
        if self.kv.range_batch == 0 {
            return Err(ConfigError::Invalid("kv.range_batch must be > 0".into()));
        }
        Ok(())
    }
}

/// Load a `NodeConfig` from a YAML file path.
pub fn load_from_file(path: &std::path::Path) -> Result<NodeConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: NodeConfig = serde_yaml::from_str(&contents)?;
    config.validate()?;
    Ok(config)
}

/// Load a `NodeConfig` from a YAML string.
pub fn load_from_str(yaml: &str) -> Result<NodeConfig, ConfigError> {
    let config: NodeConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}
