//! Error handling for the HTTP surface

use crate::models::ApiResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use quorum_traits::CoordinationError;
use thiserror::Error;

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Cache miss")]
    CacheMiss,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Server binding failed: {0}")]
    BindError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Telemetry setup failed: {0}")]
    TelemetryError(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

/// Server result type
pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        ServerError::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        ServerError::Internal(msg.into())
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ServerError::CacheMiss => (StatusCode::NOT_FOUND, "Cache miss".to_string()),
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ServerError::BindError(msg)
            | ServerError::ConfigError(msg)
            | ServerError::TelemetryError(msg)
            | ServerError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(ApiResponse::failure(message))).into_response()
    }
}

impl From<CoordinationError> for ServerError {
    fn from(err: CoordinationError) -> Self {
        match err {
            CoordinationError::CacheMiss(_) => ServerError::CacheMiss,
            CoordinationError::Config(msg) => ServerError::ConfigError(msg),
            other => ServerError::Internal(other.to_string()),
        }
    }
}
