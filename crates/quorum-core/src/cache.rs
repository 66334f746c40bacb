//! Coherent distributed cache
//!
//! A fixed-capacity local LRU table with coherence by broadcast
//! invalidation: a local `set` erases the key on every peer, it never ships
//! the new value. The table is one mutual-exclusion domain; invalidation
//! broadcasts go out after the local mutation has committed and are
//! best-effort. Reads between a peer's write and the arrival of its
//! invalidation may be stale.

use crate::metrics::MetricsRegistry;
use crate::rpc::PeerClient;
use lru::LruCache;
use parking_lot::Mutex;
use quorum_traits::NodeId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const INVALIDATE_PATH: &str = "cache/invalidate";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateRequest {
    pub key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidateResponse {
    pub success: bool,
    pub message: String,
}

/// Snapshot of the cache table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStatus {
    pub node_id: NodeId,
    pub size: usize,
    pub capacity: usize,
    pub keys: Vec<String>,
}

/// Local LRU cache with peer invalidation
pub struct CacheNode {
    node_id: NodeId,
    peers: HashMap<NodeId, String>,
    entries: Mutex<LruCache<String, Value>>,
    rpc: Arc<PeerClient>,
    metrics: Arc<MetricsRegistry>,
}

impl CacheNode {
    pub fn new(
        node_id: NodeId,
        peers: HashMap<NodeId, String>,
        capacity: NonZeroUsize,
        rpc: Arc<PeerClient>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        info!("[{node_id}] cache initialized with capacity {capacity}");
        Self {
            node_id,
            peers,
            entries: Mutex::new(LruCache::new(capacity)),
            rpc,
            metrics,
        }
    }

    /// Look a key up, refreshing its recency on a hit
    pub fn get(&self, key: &str) -> Option<Value> {
        let start = Instant::now();
        self.metrics.increment("cache_get_requests");

        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(value) => {
                let value = value.clone();
                drop(entries);
                debug!("[{}] cache HIT for key {key}", self.node_id);
                self.metrics.increment("cache_hits");
                self.metrics.record_latency("cache_get_hit_latency", start);
                Some(value)
            }
            None => {
                drop(entries);
                debug!("[{}] cache MISS for key {key}", self.node_id);
                self.metrics.increment("cache_misses");
                self.metrics.record_latency("cache_get_miss_latency", start);
                None
            }
        }
    }

    /// Insert or overwrite a key locally, then erase it on every peer. The
    /// local mutation is authoritative; the broadcast is best-effort.
    pub async fn set(&self, key: &str, value: Value) -> String {
        let start = Instant::now();
        self.metrics.increment("cache_set_requests");

        {
            let mut entries = self.entries.lock();
            if entries.len() == entries.cap().get() && !entries.contains(key) {
                if let Some((evicted, _)) = entries.pop_lru() {
                    info!("[{}] cache full, evicted key {evicted}", self.node_id);
                    self.metrics.increment("cache_evictions");
                }
            }
            entries.put(key.to_string(), value);
        }

        debug!("[{}] broadcasting invalidation for key {key}", self.node_id);
        let request = InvalidateRequest {
            key: key.to_string(),
        };
        let _: Vec<Option<InvalidateResponse>> = self
            .rpc
            .broadcast(&self.peers, INVALIDATE_PATH, &request)
            .await;

        self.metrics.record_latency("cache_set_latency", start);
        format!("Key '{key}' set and invalidated across peers.")
    }

    /// Drop a key on behalf of a peer. Idempotent.
    pub fn invalidate(&self, key: &str) -> InvalidateResponse {
        let removed = self.entries.lock().pop(key).is_some();
        if removed {
            debug!("[{}] invalidated key {key}", self.node_id);
            self.metrics.increment("cache_invalidations");
            InvalidateResponse {
                success: true,
                message: "Key invalidated".to_string(),
            }
        } else {
            InvalidateResponse {
                success: true,
                message: "Key not in cache".to_string(),
            }
        }
    }

    pub fn status(&self) -> CacheStatus {
        let entries = self.entries.lock();
        CacheStatus {
            node_id: self.node_id.clone(),
            size: entries.len(),
            capacity: entries.cap().get(),
            keys: entries.iter().map(|(key, _)| key.clone()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn cache(capacity: usize) -> CacheNode {
        CacheNode::new(
            "node1".to_string(),
            HashMap::new(),
            NonZeroUsize::new(capacity).unwrap(),
            Arc::new(PeerClient::new(Duration::from_millis(50)).unwrap()),
            Arc::new(MetricsRegistry::new()),
        )
    }

    #[tokio::test]
    async fn test_set_then_get_round_trip() {
        let cache = cache(4);
        cache.set("k", json!("v1")).await;
        assert_eq!(cache.get("k"), Some(json!("v1")));

        cache.set("k", json!({"nested": true})).await;
        assert_eq!(cache.get("k"), Some(json!({"nested": true})));
    }

    #[tokio::test]
    async fn test_miss_and_invalidate() {
        let cache = cache(4);
        assert_eq!(cache.get("absent"), None);

        cache.set("k", json!("v")).await;
        let reply = cache.invalidate("k");
        assert!(reply.success);
        assert_eq!(cache.get("k"), None);

        // Repeat invalidation is a success as well.
        assert!(cache.invalidate("k").success);
    }

    #[tokio::test]
    async fn test_capacity_is_never_exceeded() {
        let cache = cache(3);
        for i in 0..10 {
            cache.set(&format!("k{i}"), json!(i)).await;
            assert!(cache.status().size <= 3);
        }
    }

    #[tokio::test]
    async fn test_lru_victim_selection() {
        let cache = cache(2);
        cache.set("a", json!(1)).await;
        cache.set("b", json!(2)).await;
        // Touch "a" so "b" is the least recently used.
        cache.get("a");
        cache.set("c", json!(3)).await;

        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("a"), Some(json!(1)));
        assert_eq!(cache.get("c"), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_overwrite_does_not_evict() {
        let cache = cache(2);
        cache.set("a", json!(1)).await;
        cache.set("b", json!(2)).await;
        cache.set("a", json!(10)).await;

        let status = cache.status();
        assert_eq!(status.size, 2);
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_hit_and_miss_counters() {
        let metrics = Arc::new(MetricsRegistry::new());
        let cache = CacheNode::new(
            "node1".to_string(),
            HashMap::new(),
            NonZeroUsize::new(2).unwrap(),
            Arc::new(PeerClient::new(Duration::from_millis(50)).unwrap()),
            metrics.clone(),
        );
        cache.set("k", json!("v")).await;
        cache.get("k");
        cache.get("missing");

        assert_eq!(metrics.counter("cache_get_requests"), 2);
        assert_eq!(metrics.counter("cache_hits"), 1);
        assert_eq!(metrics.counter("cache_misses"), 1);
        assert_eq!(metrics.counter("cache_set_requests"), 1);
    }
}
