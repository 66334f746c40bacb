//! Error types for quorum

use thiserror::Error;

/// Main error type for coordination operations
#[derive(Error, Debug)]
pub enum CoordinationError {
    #[error("Not a leader")]
    NotLeader { leader: Option<String> },

    #[error("Failed to achieve consensus for the command")]
    ConsensusFailed(String),

    #[error("Deadlock detected! Request aborted")]
    Deadlock(String),

    #[error("You do not hold this lock")]
    NotOwner(String),

    #[error("Cache miss")]
    CacheMiss(String),

    #[error("Peer {0} not found")]
    UnknownPeer(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Generic error: {0}")]
    Other(#[from] anyhow::Error),
}

/// Result type alias for coordination operations
pub type Result<T> = std::result::Result<T, CoordinationError>;

impl CoordinationError {
    pub fn not_leader(leader: Option<impl Into<String>>) -> Self {
        Self::NotLeader {
            leader: leader.map(Into::into),
        }
    }

    pub fn consensus_failed(msg: impl Into<String>) -> Self {
        Self::ConsensusFailed(msg.into())
    }

    pub fn deadlock(client: impl Into<String>) -> Self {
        Self::Deadlock(client.into())
    }

    pub fn not_owner(client: impl Into<String>) -> Self {
        Self::NotOwner(client.into())
    }

    pub fn cache_miss(key: impl Into<String>) -> Self {
        Self::CacheMiss(key.into())
    }

    pub fn unknown_peer(peer: impl Into<String>) -> Self {
        Self::UnknownPeer(peer.into())
    }

    pub fn store_error(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn rpc_error(msg: impl Into<String>) -> Self {
        Self::Rpc(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_leader_carries_hint() {
        let err = CoordinationError::not_leader(Some("node2"));
        match err {
            CoordinationError::NotLeader { leader } => {
                assert_eq!(leader.as_deref(), Some("node2"))
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            CoordinationError::deadlock("client_a").to_string(),
            "Deadlock detected! Request aborted"
        );
        assert_eq!(
            CoordinationError::not_owner("client_a").to_string(),
            "You do not hold this lock"
        );
        assert_eq!(
            CoordinationError::unknown_peer("node9").to_string(),
            "Peer node9 not found"
        );
    }
}
