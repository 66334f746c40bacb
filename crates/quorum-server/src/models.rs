//! API request and response models

use quorum_traits::{LockMode, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Minimum response shape shared by every endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    /// Leader hint, set when a lock command reaches a non-leader
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<NodeId>,
}

impl ApiResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            leader: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            leader: None,
        }
    }

    pub fn not_leader(leader: Option<NodeId>) -> Self {
        Self {
            success: false,
            message: "Not a leader".to_string(),
            leader,
        }
    }
}

/// Body of `POST /lock/acquire`
#[derive(Debug, Clone, Deserialize)]
pub struct AcquireLockRequest {
    pub resource_id: String,
    pub client_id: String,
    #[serde(default)]
    pub lock_type: Option<LockMode>,
}

/// Body of `POST /lock/release`
#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseLockRequest {
    pub resource_id: String,
    pub client_id: String,
}

/// Body of `POST /cache/set`
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSetRequest {
    pub key: String,
    pub value: Value,
}

/// Response of `GET /cache/{key}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheGetResponse {
    pub success: bool,
    pub key: String,
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leader_hint_omitted_when_absent() {
        let body = serde_json::to_value(ApiResponse::ok("done")).unwrap();
        assert!(body.get("leader").is_none());

        let body =
            serde_json::to_value(ApiResponse::not_leader(Some("node2".to_string()))).unwrap();
        assert_eq!(body["leader"], "node2");
        assert_eq!(body["message"], "Not a leader");
    }

    #[test]
    fn test_acquire_request_lock_type_optional() {
        let request: AcquireLockRequest =
            serde_json::from_str(r#"{"resource_id":"r","client_id":"c"}"#).unwrap();
        assert!(request.lock_type.is_none());

        let request: AcquireLockRequest = serde_json::from_str(
            r#"{"resource_id":"r","client_id":"c","lock_type":"shared"}"#,
        )
        .unwrap();
        assert_eq!(request.lock_type, Some(LockMode::Shared));
    }
}
