//! Health and readiness endpoints

use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub module: String,
    pub version: String,
    /// Actors with a loaded store
    pub actors: Vec<String>,
}

/// GET /health
pub async fn health_check(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        module: "earbug-server".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        actors: state.service.loaded_actors(),
    })
}

/// GET /-/ready
pub async fn ready() -> &'static str {
    "ok"
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/-/ready", get(ready))
}
