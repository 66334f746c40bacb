//! Status and metrics routes

use axum::{extract::Extension, response::Json};
use quorum_core::{Node, NodeStatus};
use serde_json::Value;
use std::sync::Arc;

pub async fn get_status(Extension(node): Extension<Arc<Node>>) -> Json<NodeStatus> {
    Json(node.status().await)
}

pub async fn get_metrics(Extension(node): Extension<Arc<Node>>) -> Json<Value> {
    let mut report = node.metrics().report();
    if let Value::Object(map) = &mut report {
        let detector = node.detector();
        map.insert(
            "peers_up".to_string(),
            Value::from(detector.alive_peers().len()),
        );
        map.insert(
            "peer_status".to_string(),
            serde_json::to_value(detector.snapshot()).unwrap_or(Value::Null),
        );
    }
    Json(report)
}
