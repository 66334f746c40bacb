//! Heartbeat-based failure detector
//!
//! Each node actively probes its peers with a `health` RPC. A peer whose
//! last successful reply is older than the failure timeout is marked DOWN
//! and returns to UP on the next success. The detector is advisory only:
//! consensus and queue routing never gate on it.

use crate::rpc::PeerClient;
use futures::future::join_all;
use parking_lot::RwLock;
use quorum_traits::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const HEALTH_PATH: &str = "health";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRequest {
    pub from: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

/// Advisory liveness state of a peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PeerStatus {
    Up,
    Down,
}

#[derive(Debug, Clone)]
struct PeerHealth {
    status: PeerStatus,
    last_ack: Instant,
}

/// Pull-model failure detector
pub struct FailureDetector {
    node_id: NodeId,
    peers: HashMap<NodeId, String>,
    rpc: Arc<PeerClient>,
    check_interval: Duration,
    failure_timeout: Duration,
    state: RwLock<HashMap<NodeId, PeerHealth>>,
    running: AtomicBool,
}

impl FailureDetector {
    pub fn new(
        node_id: NodeId,
        peers: HashMap<NodeId, String>,
        rpc: Arc<PeerClient>,
        check_interval: Duration,
        failure_timeout: Duration,
    ) -> Self {
        let state = peers
            .keys()
            .map(|peer| {
                (
                    peer.clone(),
                    PeerHealth {
                        status: PeerStatus::Up,
                        last_ack: Instant::now(),
                    },
                )
            })
            .collect();
        Self {
            node_id,
            peers,
            rpc,
            check_interval,
            failure_timeout,
            state: RwLock::new(state),
            running: AtomicBool::new(true),
        }
    }

    /// Probe peers until shutdown
    pub fn spawn(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let detector = Arc::clone(self);
        info!("[{}] failure detector started", detector.node_id);
        tokio::spawn(async move {
            while detector.running.load(Ordering::Relaxed) {
                detector.probe_peers().await;
                detector.evaluate();
                tokio::time::sleep(detector.check_interval).await;
            }
        })
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    async fn probe_peers(&self) {
        let request = HealthRequest {
            from: self.node_id.clone(),
        };
        let probes = self.peers.iter().map(|(peer, url)| {
            let request = request.clone();
            async move {
                let reply: Option<HealthResponse> =
                    self.rpc.call(url, HEALTH_PATH, &request).await;
                (peer.clone(), reply)
            }
        });

        for (peer, reply) in join_all(probes).await {
            if reply.map(|r| r.status == "ok").unwrap_or(false) {
                self.record_success(&peer);
            }
        }
    }

    /// Note a successful reply from a peer
    fn record_success(&self, peer: &str) {
        if let Some(health) = self.state.write().get_mut(peer) {
            health.last_ack = Instant::now();
        }
    }

    /// Apply the failure-timeout transitions
    fn evaluate(&self) {
        let mut state = self.state.write();
        for (peer, health) in state.iter_mut() {
            let stale = health.last_ack.elapsed() > self.failure_timeout;
            match (health.status, stale) {
                (PeerStatus::Up, true) => {
                    health.status = PeerStatus::Down;
                    warn!("[{}] peer {peer} detected as DOWN", self.node_id);
                }
                (PeerStatus::Down, false) => {
                    health.status = PeerStatus::Up;
                    info!("[{}] peer {peer} is back UP", self.node_id);
                }
                _ => {}
            }
        }
    }

    /// Peers currently considered UP
    pub fn alive_peers(&self) -> Vec<NodeId> {
        self.state
            .read()
            .iter()
            .filter(|(_, health)| health.status == PeerStatus::Up)
            .map(|(peer, _)| peer.clone())
            .collect()
    }

    /// Stable per-peer status view for operators
    pub fn snapshot(&self) -> BTreeMap<NodeId, PeerStatus> {
        self.state
            .read()
            .iter()
            .map(|(peer, health)| (peer.clone(), health.status))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector(failure_timeout: Duration) -> FailureDetector {
        let peers = [
            ("node2".to_string(), "http://node2:5002".to_string()),
            ("node3".to_string(), "http://node3:5003".to_string()),
        ]
        .into_iter()
        .collect();
        FailureDetector::new(
            "node1".to_string(),
            peers,
            Arc::new(PeerClient::new(Duration::from_millis(50)).unwrap()),
            Duration::from_secs(2),
            failure_timeout,
        )
    }

    #[test]
    fn test_peers_start_up() {
        let detector = detector(Duration::from_secs(5));
        assert_eq!(detector.alive_peers().len(), 2);
    }

    #[test]
    fn test_stale_peer_goes_down_and_recovers() {
        let detector = detector(Duration::from_millis(50));

        std::thread::sleep(Duration::from_millis(120));
        detector.evaluate();
        assert!(detector.alive_peers().is_empty());
        assert_eq!(detector.snapshot()["node2"], PeerStatus::Down);

        // Any successful reply brings the peer back.
        detector.record_success("node2");
        detector.evaluate();
        assert_eq!(detector.snapshot()["node2"], PeerStatus::Up);
        assert_eq!(detector.snapshot()["node3"], PeerStatus::Down);
        assert_eq!(detector.alive_peers(), vec!["node2".to_string()]);
    }

    #[test]
    fn test_snapshot_is_ordered() {
        let detector = detector(Duration::from_secs(5));
        let keys: Vec<_> = detector.snapshot().into_keys().collect();
        assert_eq!(keys, vec!["node2".to_string(), "node3".to_string()]);
    }
}
