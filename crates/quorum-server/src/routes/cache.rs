//! Cache service routes

use crate::error::{ServerError, ServerResult};
use crate::models::{ApiResponse, CacheGetResponse, CacheSetRequest};
use axum::{
    extract::{Extension, Path},
    response::Json,
};
use quorum_core::{InvalidateRequest, InvalidateResponse, Node};
use std::sync::Arc;

pub async fn get_cache(
    Extension(node): Extension<Arc<Node>>,
    Path(key): Path<String>,
) -> ServerResult<Json<CacheGetResponse>> {
    match node.cache().get(&key) {
        Some(value) => Ok(Json(CacheGetResponse {
            success: true,
            key,
            value,
        })),
        None => Err(ServerError::CacheMiss),
    }
}

pub async fn set_cache(
    Extension(node): Extension<Arc<Node>>,
    Json(request): Json<CacheSetRequest>,
) -> Json<ApiResponse> {
    let message = node.cache().set(&request.key, request.value).await;
    Json(ApiResponse::ok(message))
}

/// Internal endpoint: a peer committed a write and erases our copy
pub async fn invalidate_cache(
    Extension(node): Extension<Arc<Node>>,
    Json(request): Json<InvalidateRequest>,
) -> Json<InvalidateResponse> {
    Json(node.cache().invalidate(&request.key))
}
