//! Node configuration
//!
//! Configuration is read from environment variables with defaults that
//! match a local three-node cluster. The peer map is static for the
//! lifetime of the process; membership change is not supported.

use quorum_traits::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Identity of this node within the cluster
    pub node_id: NodeId,
    /// Bind host for the HTTP surface
    pub host: String,
    /// Bind port for the HTTP surface
    pub port: u16,
    /// Queue store host
    pub redis_host: String,
    /// Queue store port
    pub redis_port: u16,
    /// Peer map, excluding this node: node_id -> base URL
    pub peers: HashMap<NodeId, String>,
    /// Election timeout range in seconds (randomized per reset)
    pub election_timeout_min_secs: f64,
    pub election_timeout_max_secs: f64,
    /// Leader heartbeat interval in seconds
    pub heartbeat_interval_secs: f64,
    /// Per-request timeout for inter-node RPCs in seconds
    pub rpc_timeout_secs: f64,
    /// Failure detector probe interval in seconds
    pub health_check_interval_secs: f64,
    /// Age of last successful reply after which a peer is marked down
    pub failure_timeout_secs: f64,
    /// Visibility timeout for popped-but-unacked queue messages in seconds
    pub processing_timeout_secs: f64,
    /// Cadence of the queue redelivery monitor in seconds
    pub monitor_interval_secs: f64,
    /// Cache capacity in entries
    pub cache_capacity: usize,
    /// Virtual points per node on the consistent-hash ring
    pub ring_replicas: usize,
    /// Log level for telemetry setup
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let node_id = env::var("NODE_ID").unwrap_or_else(|_| "node1".to_string());
        Self {
            peers: peers_from_env(&node_id),
            node_id,
            host: env::var("NODE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("HTTP_PORT")
                .unwrap_or_else(|_| "5001".to_string())
                .parse()
                .unwrap_or(5001),
            redis_host: env::var("REDIS_HOST").unwrap_or_else(|_| "redis".to_string()),
            redis_port: env::var("REDIS_PORT")
                .unwrap_or_else(|_| "6379".to_string())
                .parse()
                .unwrap_or(6379),
            election_timeout_min_secs: 1.5,
            election_timeout_max_secs: 3.0,
            heartbeat_interval_secs: 0.5,
            rpc_timeout_secs: 1.0,
            health_check_interval_secs: 2.0,
            failure_timeout_secs: 5.0,
            processing_timeout_secs: 30.0,
            monitor_interval_secs: 10.0,
            cache_capacity: 100,
            ring_replicas: 3,
            log_level: env::var("QUORUM_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        }
    }
}

/// Build the peer map from the `PEERS` environment variable
/// (`node1=http://node1:5001,node2=http://node2:5002,...`), falling back
/// to the static three-node development cluster. This node's own entry is
/// removed.
fn peers_from_env(node_id: &str) -> HashMap<NodeId, String> {
    let mut peers: HashMap<NodeId, String> = match env::var("PEERS") {
        Ok(raw) => raw
            .split(',')
            .filter_map(|pair| {
                let (id, url) = pair.split_once('=')?;
                Some((id.trim().to_string(), url.trim().to_string()))
            })
            .collect(),
        Err(_) => [
            ("node1", "http://node1:5001"),
            ("node2", "http://node2:5002"),
            ("node3", "http://node3:5003"),
        ]
        .into_iter()
        .map(|(id, url)| (id.to_string(), url.to_string()))
        .collect(),
    };
    peers.remove(node_id);
    peers
}

impl NodeConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.node_id.is_empty() {
            return Err("Node id cannot be empty".to_string());
        }
        if self.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.peers.contains_key(&self.node_id) {
            return Err("Peer map must not contain this node".to_string());
        }
        if self.election_timeout_min_secs >= self.election_timeout_max_secs {
            return Err("Election timeout range must be non-empty".to_string());
        }
        if self.heartbeat_interval_secs >= self.election_timeout_min_secs {
            return Err("Heartbeat interval must be below the election timeout".to_string());
        }
        if self.cache_capacity == 0 {
            return Err("Cache capacity must be greater than 0".to_string());
        }
        if self.ring_replicas == 0 {
            return Err("Ring replica count must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Cluster size including this node
    pub fn cluster_size(&self) -> usize {
        self.peers.len() + 1
    }

    /// All node ids in the cluster, this node included
    pub fn all_node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.keys().cloned().collect();
        ids.push(self.node_id.clone());
        ids
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs_f64(self.heartbeat_interval_secs)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.rpc_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs_f64(self.health_check_interval_secs)
    }

    pub fn failure_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.failure_timeout_secs)
    }

    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.processing_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs_f64(self.monitor_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> NodeConfig {
        NodeConfig {
            node_id: "node1".to_string(),
            host: "127.0.0.1".to_string(),
            port: 5001,
            redis_host: "127.0.0.1".to_string(),
            redis_port: 6379,
            peers: [
                ("node2".to_string(), "http://node2:5002".to_string()),
                ("node3".to_string(), "http://node3:5003".to_string()),
            ]
            .into_iter()
            .collect(),
            election_timeout_min_secs: 1.5,
            election_timeout_max_secs: 3.0,
            heartbeat_interval_secs: 0.5,
            rpc_timeout_secs: 1.0,
            health_check_interval_secs: 2.0,
            failure_timeout_secs: 5.0,
            processing_timeout_secs: 30.0,
            monitor_interval_secs: 10.0,
            cache_capacity: 100,
            ring_replicas: 3,
            log_level: "info".to_string(),
        }
    }

    #[test]
    fn test_validation() {
        let mut config = test_config();
        assert!(config.validate().is_ok());

        config.port = 0;
        assert!(config.validate().is_err());

        config = test_config();
        config
            .peers
            .insert("node1".to_string(), "http://node1:5001".to_string());
        assert!(config.validate().is_err());

        config = test_config();
        config.heartbeat_interval_secs = 2.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_cluster_size_includes_self() {
        let config = test_config();
        assert_eq!(config.cluster_size(), 3);
        assert_eq!(config.all_node_ids().len(), 3);
    }

    #[test]
    fn test_durations() {
        let config = test_config();
        assert_eq!(config.heartbeat_interval(), Duration::from_millis(500));
        assert_eq!(config.processing_timeout(), Duration::from_secs(30));
    }
}
