//! HTTP surface for the quorum coordination node
//!
//! Thin glue over `quorum-core`: axum routes, request/response DTOs and the
//! server wrapper that binds the listener and starts the node's background
//! services.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;
pub mod telemetry;

pub use error::{ServerError, ServerResult};
pub use routes::create_router;
pub use server::CoordinationServer;
