//! Quorum coordination core
//!
//! The four cooperating engines of a coordination node:
//! - leader-based consensus replicating a lock-command log
//! - the lock state machine with wait-for-graph deadlock detection
//! - a coherent LRU cache with broadcast invalidation
//! - a partitioned work queue with visibility-timeout redelivery
//!
//! plus the shared plumbing they ride on (peer RPC client, consistent-hash
//! ring, failure detector, metrics registry, queue store backends).

pub mod cache;
pub mod consensus;
pub mod detector;
pub mod locks;
pub mod metrics;
pub mod queue;
pub mod ring;
pub mod rpc;
pub mod store;

pub use cache::{CacheNode, CacheStatus, InvalidateRequest, InvalidateResponse};
pub use consensus::{
    AppendEntriesRequest, AppendEntriesResponse, ConsensusEngine, ConsensusStatus, LogEntry,
    NodeState, RequestVoteRequest, RequestVoteResponse,
};
pub use detector::{FailureDetector, HealthRequest, HealthResponse, PeerStatus};
pub use locks::{ApplyOutcome, AuditRecord, AuditSink, LockManager, LocksStatus};
pub use metrics::MetricsRegistry;
pub use queue::{AckRequest, PushRequest, QueueNode, QueueOpResponse};
pub use ring::ConsistentHashRing;
pub use rpc::PeerClient;
pub use store::{MemoryQueueStore, QueueStore, RedisQueueStore};

use parking_lot::Mutex;
use quorum_config::NodeConfig;
use quorum_traits::{CoordinationError, LockCommand, NodeId, Result};
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// `/status` document of one node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: NodeId,
    pub state: NodeState,
    pub term: u64,
    pub leader: Option<NodeId>,
    pub log_length: usize,
    pub commit_index: i64,
    pub locks: LocksStatus,
}

/// One coordination node: every engine wired together over a shared RPC
/// client and metrics registry. Constructed once at startup and handed to
/// request handlers by reference.
pub struct Node {
    config: NodeConfig,
    metrics: Arc<MetricsRegistry>,
    locks: Arc<LockManager>,
    consensus: Arc<ConsensusEngine>,
    cache: Arc<CacheNode>,
    queue: Arc<QueueNode>,
    detector: Arc<FailureDetector>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Node {
    pub fn new(config: NodeConfig, store: Arc<dyn QueueStore>) -> Result<Self> {
        config
            .validate()
            .map_err(|e| CoordinationError::config_error(e))?;

        let rpc = Arc::new(PeerClient::new(config.rpc_timeout())?);
        let metrics = Arc::new(MetricsRegistry::new());
        let locks = Arc::new(LockManager::new());

        let consensus = Arc::new(ConsensusEngine::new(
            config.node_id.clone(),
            config.peers.clone(),
            (
                config.election_timeout_min_secs,
                config.election_timeout_max_secs,
            ),
            config.heartbeat_interval(),
            Arc::clone(&rpc),
            Arc::clone(&locks),
        ));

        let capacity = NonZeroUsize::new(config.cache_capacity)
            .ok_or_else(|| CoordinationError::config_error("cache capacity must be non-zero"))?;
        let cache = Arc::new(CacheNode::new(
            config.node_id.clone(),
            config.peers.clone(),
            capacity,
            Arc::clone(&rpc),
            Arc::clone(&metrics),
        ));

        let ring = ConsistentHashRing::with_nodes(config.ring_replicas, config.all_node_ids());
        let queue = Arc::new(QueueNode::new(
            config.node_id.clone(),
            config.peers.clone(),
            ring,
            store,
            Arc::clone(&rpc),
            Arc::clone(&metrics),
            config.processing_timeout(),
            config.monitor_interval(),
        ));

        let detector = Arc::new(FailureDetector::new(
            config.node_id.clone(),
            config.peers.clone(),
            Arc::clone(&rpc),
            config.health_check_interval(),
            config.failure_timeout(),
        ));

        Ok(Self {
            config,
            metrics,
            locks,
            consensus,
            cache,
            queue,
            detector,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawn the background tasks: consensus role loop, queue redelivery
    /// monitor, failure detector.
    pub fn start(&self) {
        let mut tasks = self.tasks.lock();
        tasks.push(self.consensus.spawn());
        tasks.push(self.queue.spawn_monitor());
        tasks.push(self.detector.spawn());
        info!("[{}] background services started", self.config.node_id);
    }

    /// Submit a lock command through consensus
    pub async fn submit_lock_command(&self, command: LockCommand) -> Result<ApplyOutcome> {
        self.consensus.submit(command).await
    }

    /// Aggregate the `/status` document
    pub async fn status(&self) -> NodeStatus {
        let consensus = self.consensus.status().await;
        NodeStatus {
            node_id: consensus.node_id,
            state: consensus.state,
            term: consensus.term,
            leader: consensus.leader,
            log_length: consensus.log_length,
            commit_index: consensus.commit_index,
            locks: self.locks.status(),
        }
    }

    pub fn shutdown(&self) {
        self.consensus.shutdown();
        self.queue.shutdown();
        self.detector.shutdown();
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        info!("[{}] background services stopped", self.config.node_id);
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn consensus(&self) -> Arc<ConsensusEngine> {
        Arc::clone(&self.consensus)
    }

    pub fn locks(&self) -> Arc<LockManager> {
        Arc::clone(&self.locks)
    }

    pub fn cache(&self) -> Arc<CacheNode> {
        Arc::clone(&self.cache)
    }

    pub fn queue(&self) -> Arc<QueueNode> {
        Arc::clone(&self.queue)
    }

    pub fn detector(&self) -> Arc<FailureDetector> {
        Arc::clone(&self.detector)
    }

    pub fn metrics(&self) -> Arc<MetricsRegistry> {
        Arc::clone(&self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_traits::LockMode;

    fn test_config() -> NodeConfig {
        NodeConfig {
            node_id: "node1".to_string(),
            peers: std::collections::HashMap::new(),
            ..NodeConfig::default()
        }
    }

    fn test_node() -> Node {
        Node::new(test_config(), Arc::new(MemoryQueueStore::new())).unwrap()
    }

    #[tokio::test]
    async fn test_node_starts_as_follower() {
        let node = test_node();
        let status = node.status().await;
        assert_eq!(status.node_id, "node1");
        assert_eq!(status.state, NodeState::Follower);
        assert_eq!(status.term, 0);
        assert_eq!(status.log_length, 0);
        assert_eq!(status.commit_index, -1);
        assert!(status.locks.active_locks.is_empty());
    }

    #[tokio::test]
    async fn test_single_node_cluster_elects_itself() {
        let node = test_node();
        node.start();

        // Election timeout is 1.5-3.0s; the single node needs one round.
        for _ in 0..40 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            if node.status().await.state == NodeState::Leader {
                break;
            }
        }
        let status = node.status().await;
        assert_eq!(status.state, NodeState::Leader);
        assert_eq!(status.leader.as_deref(), Some("node1"));

        // A committed command shows up in the status document.
        let outcome = node
            .submit_lock_command(LockCommand::Acquire {
                resource_id: "res".to_string(),
                client_id: "client_a".to_string(),
                mode: LockMode::Exclusive,
            })
            .await
            .unwrap();
        assert!(outcome.success());

        let status = node.status().await;
        assert_eq!(status.log_length, 1);
        assert_eq!(status.commit_index, 0);
        assert_eq!(status.locks.active_locks["res"].owners, vec!["client_a"]);

        node.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = test_config();
        config.cache_capacity = 0;
        let result = Node::new(config, Arc::new(MemoryQueueStore::new()));
        assert!(result.is_err());
    }
}
