//! Core domain types shared across crates

use serde::{Deserialize, Serialize};

/// Node identifier within the cluster ("node1", "node2", ...)
pub type NodeId = String;

/// Lock compatibility mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl std::fmt::Display for LockMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LockMode::Shared => write!(f, "shared"),
            LockMode::Exclusive => write!(f, "exclusive"),
        }
    }
}

/// Command replicated through the consensus log and applied to the lock
/// state machine. One tagged record per message type; unknown fields on the
/// wire are ignored by serde.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum LockCommand {
    Acquire {
        resource_id: String,
        client_id: String,
        #[serde(rename = "lock_type", default = "default_mode")]
        mode: LockMode,
    },
    Release {
        resource_id: String,
        client_id: String,
    },
}

fn default_mode() -> LockMode {
    LockMode::Exclusive
}

impl LockCommand {
    pub fn resource_id(&self) -> &str {
        match self {
            LockCommand::Acquire { resource_id, .. } => resource_id,
            LockCommand::Release { resource_id, .. } => resource_id,
        }
    }

    pub fn client_id(&self) -> &str {
        match self {
            LockCommand::Acquire { client_id, .. } => client_id,
            LockCommand::Release { client_id, .. } => client_id,
        }
    }
}
