//! Internal peer-to-peer routes: consensus RPCs and health

use axum::{extract::Extension, response::Json};
use quorum_core::{
    AppendEntriesRequest, AppendEntriesResponse, HealthRequest, HealthResponse, Node,
    RequestVoteRequest, RequestVoteResponse,
};
use std::sync::Arc;
use tracing::trace;

pub async fn request_vote(
    Extension(node): Extension<Arc<Node>>,
    Json(request): Json<RequestVoteRequest>,
) -> Json<RequestVoteResponse> {
    Json(node.consensus().handle_request_vote(request).await)
}

pub async fn append_entries(
    Extension(node): Extension<Arc<Node>>,
    Json(request): Json<AppendEntriesRequest>,
) -> Json<AppendEntriesResponse> {
    Json(node.consensus().handle_append_entries(request).await)
}

pub async fn health(
    Extension(_node): Extension<Arc<Node>>,
    Json(request): Json<HealthRequest>,
) -> Json<HealthResponse> {
    trace!("health probe from {}", request.from);
    Json(HealthResponse::ok())
}
