//! Lock service routes
//!
//! Lock commands are committed through consensus: the handler builds the
//! command, hands it to the engine, and reports the apply outcome. A
//! non-leader answers with a leader hint instead of proxying.

use crate::models::{AcquireLockRequest, ApiResponse, ReleaseLockRequest};
use axum::{extract::Extension, response::Json};
use quorum_core::Node;
use quorum_traits::{CoordinationError, LockCommand, LockMode};
use std::sync::Arc;

pub async fn acquire_lock(
    Extension(node): Extension<Arc<Node>>,
    Json(request): Json<AcquireLockRequest>,
) -> Json<ApiResponse> {
    let command = LockCommand::Acquire {
        resource_id: request.resource_id,
        client_id: request.client_id,
        mode: request.lock_type.unwrap_or(LockMode::Exclusive),
    };
    Json(submit(&node, command).await)
}

pub async fn release_lock(
    Extension(node): Extension<Arc<Node>>,
    Json(request): Json<ReleaseLockRequest>,
) -> Json<ApiResponse> {
    let command = LockCommand::Release {
        resource_id: request.resource_id,
        client_id: request.client_id,
    };
    Json(submit(&node, command).await)
}

async fn submit(node: &Node, command: LockCommand) -> ApiResponse {
    match node.submit_lock_command(command).await {
        Ok(outcome) => ApiResponse {
            success: outcome.success(),
            message: outcome.message().to_string(),
            leader: None,
        },
        Err(CoordinationError::NotLeader { leader }) => ApiResponse::not_leader(leader),
        Err(other) => ApiResponse::failure(other.to_string()),
    }
}
