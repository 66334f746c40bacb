//! Consistent hashing for queue partition routing
//!
//! Each node contributes `replicas` virtual points placed by hashing
//! `"{node_id}:{i}"`. A key is owned by the node whose first point is at or
//! after the key's hash, wrapping past the end of the sorted index.
//! Ownership is a pure function of ring state and key, so every node
//! resolves the same owner for a topic.

use quorum_traits::NodeId;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Consistent-hash ring over cluster node ids
#[derive(Debug, Clone)]
pub struct ConsistentHashRing {
    replicas: usize,
    // (point, node_id), sorted by point
    ring: Vec<(u32, NodeId)>,
}

impl ConsistentHashRing {
    pub fn new(replicas: usize) -> Self {
        Self {
            replicas,
            ring: Vec::new(),
        }
    }

    /// Build a ring with the given membership
    pub fn with_nodes<I>(replicas: usize, nodes: I) -> Self
    where
        I: IntoIterator<Item = NodeId>,
    {
        let mut ring = Self::new(replicas);
        for node in nodes {
            ring.add_node(&node);
        }
        ring
    }

    /// Insert `replicas` virtual points for a node
    pub fn add_node(&mut self, node_id: &str) {
        for i in 0..self.replicas {
            let point = hash32(&format!("{node_id}:{i}"));
            let at = self.ring.partition_point(|(p, _)| *p < point);
            self.ring.insert(at, (point, node_id.to_string()));
        }
    }

    /// Delete a node's points and rebuild the sorted index
    pub fn remove_node(&mut self, node_id: &str) {
        self.ring.retain(|(_, n)| n != node_id);
        self.ring.sort_by(|a, b| a.cmp(b));
    }

    /// Resolve the owning node for a key
    pub fn get_node(&self, key: &str) -> Option<&NodeId> {
        if self.ring.is_empty() {
            return None;
        }
        let hash = hash32(key);
        let at = self.ring.partition_point(|(p, _)| *p < hash);
        let at = if at == self.ring.len() { 0 } else { at };
        Some(&self.ring[at].1)
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }
}

/// Fast non-cryptographic 32-bit key hash
fn hash32(key: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish() as u32
}
