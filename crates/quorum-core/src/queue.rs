//! Partitioned work queue
//!
//! Each topic is owned by exactly one node, resolved through the consistent
//! hash ring. Requests for a topic owned elsewhere are forwarded over the
//! internal RPC surface and the owner's response is returned verbatim.
//! Delivery is at-least-once: a popped message sits on a per-consumer
//! processing list until acknowledged, and a background monitor returns
//! messages whose visibility timeout expired to the head of their queue.

use crate::metrics::MetricsRegistry;
use crate::ring::ConsistentHashRing;
use crate::rpc::PeerClient;
use crate::store::QueueStore;
use quorum_traits::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, error, info, warn};

pub const INTERNAL_PUSH_PATH: &str = "queue/internal/push";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub topic: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AckRequest {
    pub consumer_id: String,
    pub message_id: String,
}

/// Response of a queue operation. Forwarded responses pass through this
/// shape unchanged; `message` carries the payload on a successful pop and a
/// diagnostic otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueOpResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl QueueOpResponse {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            message_id: None,
        }
    }

    fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            message_id: None,
        }
    }

    fn popped(message: String) -> Self {
        Self {
            success: true,
            message_id: Some(message.clone()),
            message,
        }
    }
}

fn queue_key(topic: &str) -> String {
    format!("queue:{topic}")
}

fn processing_key(topic: &str, consumer_id: &str) -> String {
    format!("processing:{topic}:{consumer_id}")
}

fn timestamps_key(topic: &str, consumer_id: &str) -> String {
    format!("timestamps:{topic}:{consumer_id}")
}

fn parse_processing_key(key: &str) -> Option<(&str, &str)> {
    let mut parts = key.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("processing"), Some(topic), Some(consumer)) => Some((topic, consumer)),
        _ => None,
    }
}

fn epoch_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Partitioned queue node
pub struct QueueNode {
    node_id: NodeId,
    peers: HashMap<NodeId, String>,
    ring: ConsistentHashRing,
    store: Arc<dyn QueueStore>,
    rpc: Arc<PeerClient>,
    metrics: Arc<MetricsRegistry>,
    processing_timeout: Duration,
    monitor_interval: Duration,
    running: AtomicBool,
}

impl QueueNode {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        node_id: NodeId,
        peers: HashMap<NodeId, String>,
        ring: ConsistentHashRing,
        store: Arc<dyn QueueStore>,
        rpc: Arc<PeerClient>,
        metrics: Arc<MetricsRegistry>,
        processing_timeout: Duration,
        monitor_interval: Duration,
    ) -> Self {
        info!("[{node_id}] queue node initialized");
        Self {
            node_id,
            peers,
            ring,
            store,
            rpc,
            metrics,
            processing_timeout,
            monitor_interval,
            running: AtomicBool::new(true),
        }
    }

    fn owner_of(&self, topic: &str) -> Option<NodeId> {
        self.ring.get_node(topic).cloned()
    }

    fn peer_url(&self, owner: &str) -> Option<&String> {
        self.peers.get(owner)
    }

    /// Route a push to the owning partition
    pub async fn push(&self, topic: &str, message: &str) -> QueueOpResponse {
        let start = Instant::now();
        self.metrics.increment("queue_push_requests");

        let Some(owner) = self.owner_of(topic) else {
            return QueueOpResponse::failure("No queue partitions available");
        };

        let response = if owner == self.node_id {
            self.local_push(topic, message).await
        } else {
            let Some(url) = self.peer_url(&owner) else {
                return QueueOpResponse::failure(format!("Peer {owner} not found"));
            };
            debug!("[{}] forwarding push for topic {topic} to {owner}", self.node_id);
            let request = PushRequest {
                topic: topic.to_string(),
                message: message.to_string(),
            };
            match self.rpc.call(url, INTERNAL_PUSH_PATH, &request).await {
                Some(forwarded) => forwarded,
                None => QueueOpResponse::failure(format!("Peer {owner} unreachable")),
            }
        };

        self.metrics.record_latency("queue_push_latency", start);
        response
    }

    /// Route a pop to the owning partition
    pub async fn pop(&self, topic: &str, consumer_id: &str) -> QueueOpResponse {
        let start = Instant::now();
        self.metrics.increment("queue_pop_requests");

        let Some(owner) = self.owner_of(topic) else {
            return QueueOpResponse::failure("No queue partitions available");
        };

        let response = if owner == self.node_id {
            self.local_pop(topic, consumer_id).await
        } else {
            let Some(url) = self.peer_url(&owner) else {
                return QueueOpResponse::failure(format!("Peer {owner} not found"));
            };
            debug!("[{}] forwarding pop for topic {topic} to {owner}", self.node_id);
            let path = format!("queue/internal/pop/{topic}/{consumer_id}");
            match self.rpc.call(url, &path, &serde_json::json!({})).await {
                Some(forwarded) => forwarded,
                None => QueueOpResponse::failure(format!("Peer {owner} unreachable")),
            }
        };

        self.metrics.record_latency("queue_pop_latency", start);
        response
    }

    /// Route an ack to the owning partition
    pub async fn ack(&self, topic: &str, consumer_id: &str, message_id: &str) -> QueueOpResponse {
        let start = Instant::now();
        self.metrics.increment("queue_ack_requests");

        let Some(owner) = self.owner_of(topic) else {
            return QueueOpResponse::failure("No queue partitions available");
        };

        let response = if owner == self.node_id {
            self.local_ack(topic, consumer_id, message_id).await
        } else {
            let Some(url) = self.peer_url(&owner) else {
                return QueueOpResponse::failure(format!("Peer {owner} not found"));
            };
            let path = format!("queue/internal/ack/{topic}");
            let request = AckRequest {
                consumer_id: consumer_id.to_string(),
                message_id: message_id.to_string(),
            };
            match self.rpc.call(url, &path, &request).await {
                Some(forwarded) => forwarded,
                None => QueueOpResponse::failure(format!("Peer {owner} unreachable")),
            }
        };

        self.metrics.record_latency("queue_ack_latency", start);
        response
    }

    /// Append a message to this node's partition
    pub async fn local_push(&self, topic: &str, message: &str) -> QueueOpResponse {
        match self.store.push_back(&queue_key(topic), message).await {
            Ok(()) => {
                debug!("[{}] pushed message to local queue {topic}", self.node_id);
                QueueOpResponse::ok("Message queued locally")
            }
            Err(e) => {
                error!("[{}] store push error: {e}", self.node_id);
                QueueOpResponse::failure(e.to_string())
            }
        }
    }

    /// Move the head message to the consumer's processing list and stamp it
    pub async fn local_pop(&self, topic: &str, consumer_id: &str) -> QueueOpResponse {
        let moved = self
            .store
            .move_head_to_tail(&queue_key(topic), &processing_key(topic, consumer_id))
            .await;
        let message = match moved {
            Ok(Some(message)) => message,
            Ok(None) => return QueueOpResponse::failure("Queue empty"),
            Err(e) => {
                error!("[{}] store pop error: {e}", self.node_id);
                return QueueOpResponse::failure(e.to_string());
            }
        };

        if let Err(e) = self
            .store
            .set_timestamp(&timestamps_key(topic, consumer_id), &message, epoch_secs())
            .await
        {
            // The message is already in flight; the monitor treats a missing
            // timestamp as not-yet-expired, so delivery still completes.
            warn!("[{}] failed to stamp in-flight message: {e}", self.node_id);
        }

        debug!(
            "[{}] moved message from {topic} to processing for {consumer_id}",
            self.node_id
        );
        QueueOpResponse::popped(message)
    }

    /// Remove one in-flight copy of the message and its timestamp
    pub async fn local_ack(
        &self,
        topic: &str,
        consumer_id: &str,
        message_id: &str,
    ) -> QueueOpResponse {
        let removed = match self
            .store
            .remove_one(&processing_key(topic, consumer_id), message_id)
            .await
        {
            Ok(removed) => removed,
            Err(e) => {
                error!("[{}] store ack error: {e}", self.node_id);
                return QueueOpResponse::failure(e.to_string());
            }
        };
        if let Err(e) = self
            .store
            .delete_timestamp(&timestamps_key(topic, consumer_id), message_id)
            .await
        {
            warn!("[{}] failed to drop ack timestamp: {e}", self.node_id);
        }

        if removed > 0 {
            debug!(
                "[{}] ack removed {message_id} for {consumer_id} on {topic}",
                self.node_id
            );
            QueueOpResponse::ok("Message acknowledged")
        } else {
            QueueOpResponse::failure("Message not found or already acknowledged")
        }
    }

    /// Drive the redelivery monitor until shutdown
    pub fn spawn_monitor(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let queue = Arc::clone(self);
        info!("[{}] starting queue processing monitor", queue.node_id);
        tokio::spawn(async move {
            while queue.running.load(Ordering::Relaxed) {
                tokio::time::sleep(queue.monitor_interval).await;
                if let Err(e) = queue.sweep_expired().await {
                    error!("[{}] error in processing monitor: {e}", queue.node_id);
                }
            }
        })
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// One monitor pass: return every owned, expired in-flight message to
    /// the head of its queue. Races with concurrent acks are benign: whoever
    /// removes the processing entry first wins, and both sides drop the
    /// timestamp.
    pub async fn sweep_expired(&self) -> quorum_traits::Result<()> {
        let now = epoch_secs();
        let timeout = self.processing_timeout.as_secs_f64();

        for key in self.store.processing_keys().await? {
            let Some((topic, consumer_id)) = parse_processing_key(&key) else {
                continue;
            };
            if self.owner_of(topic).as_deref() != Some(self.node_id.as_str()) {
                continue;
            }

            let ts_key = timestamps_key(topic, consumer_id);
            let stamps = self.store.timestamps(&ts_key).await?;
            for message in self.store.list(&key).await? {
                let Some(&stamped_at) = stamps.get(&message) else {
                    continue;
                };
                if now - stamped_at <= timeout {
                    continue;
                }

                warn!(
                    "[{}] message '{message}' timed out for consumer {consumer_id} on {topic}, re-queuing",
                    self.node_id
                );
                if self.store.remove_one(&key, &message).await? > 0 {
                    self.store.push_front(&queue_key(topic), &message).await?;
                    self.metrics.increment("queue_redeliveries");
                }
                self.store.delete_timestamp(&ts_key, &message).await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryQueueStore;

    fn local_queue() -> (Arc<QueueNode>, Arc<MemoryQueueStore>) {
        let store = Arc::new(MemoryQueueStore::new());
        let ring = ConsistentHashRing::with_nodes(3, ["node1".to_string()]);
        let queue = Arc::new(QueueNode::new(
            "node1".to_string(),
            HashMap::new(),
            ring,
            store.clone(),
            Arc::new(PeerClient::new(Duration::from_millis(50)).unwrap()),
            Arc::new(MetricsRegistry::new()),
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));
        (queue, store)
    }

    #[tokio::test]
    async fn test_push_pop_ack_leaves_no_state() {
        let (queue, store) = local_queue();

        assert!(queue.push("t", "m1").await.success);
        let popped = queue.pop("t", "c1").await;
        assert!(popped.success);
        assert_eq!(popped.message, "m1");
        assert_eq!(popped.message_id.as_deref(), Some("m1"));

        let acked = queue.ack("t", "c1", "m1").await;
        assert!(acked.success);

        assert!(store.list("queue:t").await.unwrap().is_empty());
        assert!(store.list("processing:t:c1").await.unwrap().is_empty());
        assert!(store.timestamps("timestamps:t:c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pop_preserves_fifo() {
        let (queue, _) = local_queue();
        queue.push("t", "m1").await;
        queue.push("t", "m2").await;
        assert_eq!(queue.pop("t", "c1").await.message, "m1");
        assert_eq!(queue.pop("t", "c1").await.message, "m2");
    }

    #[tokio::test]
    async fn test_pop_empty_queue() {
        let (queue, _) = local_queue();
        let response = queue.pop("t", "c1").await;
        assert!(!response.success);
        assert_eq!(response.message, "Queue empty");
        assert!(response.message_id.is_none());
    }

    #[tokio::test]
    async fn test_repeat_ack_fails() {
        let (queue, _) = local_queue();
        queue.push("t", "m1").await;
        queue.pop("t", "c1").await;

        assert!(queue.ack("t", "c1", "m1").await.success);
        let again = queue.ack("t", "c1", "m1").await;
        assert!(!again.success);
        assert_eq!(again.message, "Message not found or already acknowledged");
    }

    #[tokio::test]
    async fn test_ack_removes_one_duplicate_only() {
        let (queue, store) = local_queue();
        queue.push("t", "m").await;
        queue.push("t", "m").await;
        queue.pop("t", "c1").await;
        queue.pop("t", "c1").await;

        assert!(queue.ack("t", "c1", "m").await.success);
        assert_eq!(store.list("processing:t:c1").await.unwrap(), vec!["m"]);
    }

    #[tokio::test]
    async fn test_expired_message_redelivered_to_head() {
        let (queue, store) = local_queue();
        queue.push("t", "m1").await;
        queue.push("t", "m2").await;
        queue.pop("t", "c1").await; // m1 in flight

        // Backdate the in-flight stamp past the visibility timeout.
        store
            .set_timestamp("timestamps:t:c1", "m1", epoch_secs() - 31.0)
            .await
            .unwrap();
        queue.sweep_expired().await.unwrap();

        assert_eq!(store.list("queue:t").await.unwrap(), vec!["m1", "m2"]);
        assert!(store.list("processing:t:c1").await.unwrap().is_empty());
        assert!(store.timestamps("timestamps:t:c1").await.unwrap().is_empty());

        // The redelivered message pops again.
        assert_eq!(queue.pop("t", "c1").await.message, "m1");
    }

    #[tokio::test]
    async fn test_fresh_messages_survive_sweep() {
        let (queue, store) = local_queue();
        queue.push("t", "m1").await;
        queue.pop("t", "c1").await;

        queue.sweep_expired().await.unwrap();
        assert_eq!(store.list("processing:t:c1").await.unwrap(), vec!["m1"]);
        assert!(store.list("queue:t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sweep_skips_unowned_topics() {
        let store = Arc::new(MemoryQueueStore::new());
        let ring = ConsistentHashRing::with_nodes(
            3,
            ["node1".to_string(), "node2".to_string()],
        );
        // Find a topic owned by node2.
        let foreign_topic = (0..1000)
            .map(|i| format!("topic-{i}"))
            .find(|t| ring.get_node(t).unwrap() == "node2")
            .unwrap();

        let queue = Arc::new(QueueNode::new(
            "node1".to_string(),
            HashMap::new(),
            ring,
            store.clone(),
            Arc::new(PeerClient::new(Duration::from_millis(50)).unwrap()),
            Arc::new(MetricsRegistry::new()),
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));

        let processing = processing_key(&foreign_topic, "c1");
        store.push_back(&processing, "m").await.unwrap();
        store
            .set_timestamp(&timestamps_key(&foreign_topic, "c1"), "m", 0.0)
            .await
            .unwrap();

        queue.sweep_expired().await.unwrap();
        // Expired, but owned by node2: untouched.
        assert_eq!(store.list(&processing).await.unwrap(), vec!["m"]);
    }

    #[tokio::test]
    async fn test_forward_to_unknown_peer_fails() {
        let store = Arc::new(MemoryQueueStore::new());
        let ring = ConsistentHashRing::with_nodes(
            3,
            ["node1".to_string(), "node2".to_string()],
        );
        let foreign_topic = (0..1000)
            .map(|i| format!("topic-{i}"))
            .find(|t| ring.get_node(t).unwrap() == "node2")
            .unwrap();

        // node2 owns the topic but is missing from the peer map.
        let queue = Arc::new(QueueNode::new(
            "node1".to_string(),
            HashMap::new(),
            ring,
            store,
            Arc::new(PeerClient::new(Duration::from_millis(50)).unwrap()),
            Arc::new(MetricsRegistry::new()),
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));

        let response = queue.push(&foreign_topic, "m").await;
        assert!(!response.success);
        assert_eq!(response.message, "Peer node2 not found");
    }

    #[test]
    fn test_parse_processing_key() {
        assert_eq!(
            parse_processing_key("processing:orders:c1"),
            Some(("orders", "c1"))
        );
        assert_eq!(parse_processing_key("queue:orders"), None);
        assert_eq!(parse_processing_key("processing:orders"), None);
    }
}
