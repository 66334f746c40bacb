//! Queue service routes
//!
//! The external endpoints route by ring ownership and may forward to the
//! owning peer; the internal endpoints always act on the local partition.

use axum::{
    extract::{Extension, Path},
    response::Json,
};
use quorum_core::{AckRequest, Node, PushRequest, QueueOpResponse};
use std::sync::Arc;

pub async fn push(
    Extension(node): Extension<Arc<Node>>,
    Json(request): Json<PushRequest>,
) -> Json<QueueOpResponse> {
    Json(node.queue().push(&request.topic, &request.message).await)
}

pub async fn pop(
    Extension(node): Extension<Arc<Node>>,
    Path((topic, consumer_id)): Path<(String, String)>,
) -> Json<QueueOpResponse> {
    Json(node.queue().pop(&topic, &consumer_id).await)
}

pub async fn ack(
    Extension(node): Extension<Arc<Node>>,
    Path(topic): Path<String>,
    Json(request): Json<AckRequest>,
) -> Json<QueueOpResponse> {
    Json(
        node.queue()
            .ack(&topic, &request.consumer_id, &request.message_id)
            .await,
    )
}

pub async fn internal_push(
    Extension(node): Extension<Arc<Node>>,
    Json(request): Json<PushRequest>,
) -> Json<QueueOpResponse> {
    Json(
        node.queue()
            .local_push(&request.topic, &request.message)
            .await,
    )
}

pub async fn internal_pop(
    Extension(node): Extension<Arc<Node>>,
    Path((topic, consumer_id)): Path<(String, String)>,
) -> Json<QueueOpResponse> {
    Json(node.queue().local_pop(&topic, &consumer_id).await)
}

pub async fn internal_ack(
    Extension(node): Extension<Arc<Node>>,
    Path(topic): Path<String>,
    Json(request): Json<AckRequest>,
) -> Json<QueueOpResponse> {
    Json(
        node.queue()
            .local_ack(&topic, &request.consumer_id, &request.message_id)
            .await,
    )
}
