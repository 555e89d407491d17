//! Observability HTTP Routes
//!
//! Health check and catalog counters.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use serde_json::Value;

use super::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub layers: usize,
}

pub fn observability_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        layers: state.catalog.layer_ids().len(),
    })
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.catalog.metrics().to_json())
}
