//! quorumkv-common: shared types for the quorumkv project.
//!
//! Provides the `NodeUrl` identity type used by the cluster topology and
//! the monotonic millisecond `TimestampOracle` that stamps every write.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

// ---------------------------------------------------------------------------
// NodeUrl
// ---------------------------------------------------------------------------

/// Identifies one node of the cluster by its HTTP base URL,
/// e.g. `http://10.0.0.1:8080`.
///
/// Equality is plain string equality, so the spelling in every node's
/// configuration must match across the whole cluster. A trailing slash is
/// stripped on construction to keep `http://a:1` and `http://a:1/`
/// identical.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeUrl(String);

impl NodeUrl {
    /// Parse and normalize a node base URL.
    pub fn new(url: impl Into<String>) -> Result<Self, InvalidNodeUrl> {
        let url = url.into();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(InvalidNodeUrl::MissingScheme(url));
        }
        let trimmed = url.trim_end_matches('/');
        if trimmed == "http://" || trimmed == "https://" {
            return Err(InvalidNodeUrl::MissingHost(url));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The normalized base URL, without a trailing slash.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeUrl({})", self.0)
    }
}

impl fmt::Display for NodeUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidNodeUrl {
    #[error("node url must start with http:// or https://: {0:?}")]
    MissingScheme(String),
    #[error("node url has no host: {0:?}")]
    MissingHost(String),
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Hands out millisecond write stamps that never repeat and never go
/// backwards within one process: `max(wall clock, last + 1)`.
///
/// Sequential writes through the same oracle get strictly increasing
/// stamps even when they land in the same millisecond, so last-writer-wins
/// resolution can always tell them apart.
#[derive(Debug, Default)]
pub struct TimestampOracle {
    last: AtomicU64,
}

impl TimestampOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next write stamp.
    pub fn next(&self) -> u64 {
        let now = now_millis();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(std::cmp::max(now, last + 1))
            });
        match prev {
            Ok(last) | Err(last) => std::cmp::max(now, last + 1),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
