//! Inter-node RPC client
//!
//! A thin wrapper over a shared `reqwest` client with a 1-second total
//! timeout per request. Transport failures (connect errors, timeouts,
//! non-2xx statuses, undecodable bodies) are reported as `None`; callers
//! treat a missing reply as a non-acknowledgement. There are no retries:
//! consensus rounds and cache invalidations are single-shot by contract.

use futures::future::join_all;
use quorum_traits::{CoordinationError, NodeId, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Peer-to-peer RPC client
#[derive(Debug, Clone)]
pub struct PeerClient {
    client: reqwest::Client,
}

impl PeerClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoordinationError::rpc_error(e.to_string()))?;
        Ok(Self { client })
    }

    /// POST a JSON body to `{base_url}/{path}` and decode the JSON reply.
    /// Every failure mode collapses to `None`.
    pub async fn call<Req, Resp>(&self, base_url: &str, path: &str, body: &Req) -> Option<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let url = join_url(base_url, path);
        let response = match self.client.post(&url).json(body).send().await {
            Ok(response) => response,
            Err(_) => {
                // Expected during elections and peer outages; not an error.
                debug!("RPC to {url} failed at transport");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!("RPC to {} returned status {}", url, response.status());
            return None;
        }

        match response.json::<Resp>().await {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!("RPC to {url} returned undecodable body: {e}");
                None
            }
        }
    }

    /// Fan a request out to every peer concurrently; the reply vector is in
    /// arbitrary peer order and carries `None` for each unreachable peer.
    pub async fn broadcast<Req, Resp>(
        &self,
        peers: &HashMap<NodeId, String>,
        path: &str,
        body: &Req,
    ) -> Vec<Option<Resp>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let calls = peers
            .values()
            .map(|base_url| self.call::<Req, Resp>(base_url, path, body));
        join_all(calls).await
    }
}

fn join_url(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_url_normalizes_slashes() {
        assert_eq!(
            join_url("http://node2:5002/", "/append_entries"),
            "http://node2:5002/append_entries"
        );
        assert_eq!(
            join_url("http://node2:5002", "health"),
            "http://node2:5002/health"
        );
    }

    #[tokio::test]
    async fn test_unreachable_peer_is_silent() {
        let client = PeerClient::new(Duration::from_millis(50)).unwrap();
        let reply: Option<serde_json::Value> = client
            .call("http://127.0.0.1:1", "health", &serde_json::json!({}))
            .await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_reports_one_slot_per_peer() {
        let client = PeerClient::new(Duration::from_millis(50)).unwrap();
        let peers: HashMap<NodeId, String> = [
            ("node2".to_string(), "http://127.0.0.1:1".to_string()),
            ("node3".to_string(), "http://127.0.0.1:1".to_string()),
        ]
        .into_iter()
        .collect();
        let replies: Vec<Option<serde_json::Value>> = client
            .broadcast(&peers, "health", &serde_json::json!({}))
            .await;
        assert_eq!(replies.len(), 2);
        assert!(replies.iter().all(Option::is_none));
    }
}
