//! Cluster topology: maps a key to its replica set via rendezvous
//! (highest-random-weight) hashing.
//!
//! Every node is configured with the same member list, so every node
//! computes the same replica set for any key without coordination.

use quorumkv_common::NodeUrl;
use sha1::{Digest, Sha1};

#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("cluster has no nodes")]
    Empty,
    #[error("duplicate node: {0}")]
    DuplicateNode(NodeUrl),
    #[error("local node {0} is not part of the cluster")]
    UnknownLocalNode(NodeUrl),
}

/// The static member set of the cluster plus this node's identity.
#[derive(Debug, Clone)]
pub struct Topology {
    /// All members, sorted for deterministic iteration.
    nodes: Vec<NodeUrl>,
    local: NodeUrl,
}

impl Topology {
    /// Build a topology from the full member list and the local identity.
    /// Duplicate members and an unknown local node are configuration
    /// errors.
    pub fn new(mut nodes: Vec<NodeUrl>, local: NodeUrl) -> Result<Self, TopologyError> {
        if nodes.is_empty() {
            return Err(TopologyError::Empty);
        }
        nodes.sort();
        if let Some(pair) = nodes.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(TopologyError::DuplicateNode(pair[0].clone()));
        }
        if !nodes.contains(&local) {
            return Err(TopologyError::UnknownLocalNode(local));
        }
        Ok(Self { nodes, local })
    }

    /// Whether the given node is this process.
    pub fn is_local(&self, node: &NodeUrl) -> bool {
        *node == self.local
    }

    pub fn local(&self) -> &NodeUrl {
        &self.local
    }

    /// All members, sorted.
    pub fn all(&self) -> &[NodeUrl] {
        &self.nodes
    }

    /// All members except this process.
    pub fn peers(&self) -> impl Iterator<Item = &NodeUrl> {
        self.nodes.iter().filter(|node| !self.is_local(node))
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    /// Majority quorum: `N/2 + 1`.
    pub fn quorum_count(&self) -> usize {
        self.nodes.len() / 2 + 1
    }

    /// The `count` nodes responsible for `key`, by descending rendezvous
    /// score. Deterministic for a given member set, so every node of the
    /// cluster computes the same replica list in the same order.
    pub fn primaries_for(&self, key: &[u8], count: usize) -> Vec<NodeUrl> {
        let mut scored: Vec<([u8; 20], &NodeUrl)> = self
            .nodes
            .iter()
            .map(|node| (rendezvous_score(node, key), node))
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));
        scored
            .into_iter()
            .take(count.min(self.nodes.len()))
            .map(|(_, node)| node.clone())
            .collect()
    }

    /// The single node primarily responsible for `key`.
    pub fn primary_for(&self, key: &[u8]) -> NodeUrl {
        // nodes is non-empty by construction
        self.primaries_for(key, 1).remove(0)
    }
}

/// Highest-random-weight score of a node for a key.
fn rendezvous_score(node: &NodeUrl, key: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(node.as_str().as_bytes());
    hasher.update(key);
    hasher.finalize().into()
}
