//! Main server implementation

use crate::error::{ServerError, ServerResult};
use crate::routes::create_router;
use crate::telemetry::setup_telemetry;
use axum::Router;
use quorum_config::NodeConfig;
use quorum_core::{Node, QueueStore, RedisQueueStore};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// One coordination node behind its HTTP surface
pub struct CoordinationServer {
    config: NodeConfig,
    node: Arc<Node>,
    router: Router,
}

impl CoordinationServer {
    /// Create a server over the Redis-backed queue store
    pub fn new(config: NodeConfig) -> ServerResult<Self> {
        let store: Arc<dyn QueueStore> = Arc::new(
            RedisQueueStore::new(&config.redis_host, config.redis_port)
                .map_err(|e| ServerError::ConfigError(e.to_string()))?,
        );
        Self::with_store(config, store)
    }

    /// Create a server over an explicit queue store backend
    pub fn with_store(config: NodeConfig, store: Arc<dyn QueueStore>) -> ServerResult<Self> {
        setup_telemetry(&config.log_level)?;

        let node = Arc::new(Node::new(config.clone(), store)?);
        let router = create_router(Arc::clone(&node));

        info!("[{}] coordination server initialized", config.node_id);
        Ok(Self {
            config,
            node,
            router,
        })
    }

    /// Start the background services and serve until the listener closes
    pub async fn start(self) -> ServerResult<()> {
        self.node.start();

        let listener = TcpListener::bind((self.config.host.as_str(), self.config.port))
            .await
            .map_err(|e| ServerError::BindError(e.to_string()))?;

        info!(
            "[{}] listening on {}:{}",
            self.config.node_id, self.config.host, self.config.port
        );
        axum::serve(listener, self.router)
            .await
            .map_err(|e| ServerError::Internal(e.to_string()))?;

        Ok(())
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn node(&self) -> Arc<Node> {
        Arc::clone(&self.node)
    }

    /// Graceful shutdown of the background services
    pub fn shutdown(&self) {
        info!("[{}] shutting down", self.config.node_id);
        self.node.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::MemoryQueueStore;
    use std::collections::HashMap;

    fn test_config() -> NodeConfig {
        NodeConfig {
            node_id: "node1".to_string(),
            peers: HashMap::new(),
            ..NodeConfig::default()
        }
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server =
            CoordinationServer::with_store(test_config(), Arc::new(MemoryQueueStore::new()));
        assert!(server.is_ok());
    }

    #[tokio::test]
    async fn test_server_config_accessor() {
        let server =
            CoordinationServer::with_store(test_config(), Arc::new(MemoryQueueStore::new()))
                .unwrap();
        assert_eq!(server.config().node_id, "node1");
    }
}
