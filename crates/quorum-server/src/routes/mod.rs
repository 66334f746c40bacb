//! HTTP routes for the coordination node
//!
//! External surface: lock acquire/release (through consensus), cache
//! get/set, queue push/pop/ack, status and metrics. Internal peer surface:
//! consensus RPCs, cache invalidation, forwarded queue operations, health.

pub mod cache;
pub mod lock;
pub mod queue;
pub mod raft;
pub mod status;

use axum::{
    routing::{get, post},
    Extension, Router,
};
use quorum_core::Node;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Create the router with all routes and shared state
pub fn create_router(node: Arc<Node>) -> Router {
    Router::new()
        // Lock service (external, committed through consensus)
        .route("/lock/acquire", post(lock::acquire_lock))
        .route("/lock/release", post(lock::release_lock))
        // Cache service
        .route("/cache/set", post(cache::set_cache))
        .route("/cache/invalidate", post(cache::invalidate_cache))
        .route("/cache/:key", get(cache::get_cache))
        // Queue service
        .route("/queue/push", post(queue::push))
        .route("/queue/pop/:topic/:consumer_id", get(queue::pop))
        .route("/queue/ack/:topic", post(queue::ack))
        .route("/queue/internal/push", post(queue::internal_push))
        .route(
            "/queue/internal/pop/:topic/:consumer_id",
            post(queue::internal_pop),
        )
        .route("/queue/internal/ack/:topic", post(queue::internal_ack))
        // Consensus RPCs (internal, peer-to-peer)
        .route("/request_vote", post(raft::request_vote))
        .route("/append_entries", post(raft::append_entries))
        .route("/health", post(raft::health))
        // Status and monitoring
        .route("/status", get(status::get_status))
        .route("/metrics", get(status::get_metrics))
        .layer(Extension(node))
        .layer(TraceLayer::new_for_http())
}
