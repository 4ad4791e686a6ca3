//! earbug-server library
//!
//! HTTP surface over the [`Earbug`] service: on-demand update and export,
//! the OAuth authorize/callback pair, JSON reports and health probes.

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use earbug_common::Earbug;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod api;
pub mod error;

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<Earbug>,
    /// Actor used when a request names none
    pub default_actor: String,
}

impl AppState {
    pub fn new(service: Arc<Earbug>, default_actor: impl Into<String>) -> Self {
        Self {
            service,
            default_actor: default_actor.into(),
        }
    }

    /// Requested actor, or the default when absent or empty
    pub fn actor_or_default(&self, requested: Option<&str>) -> String {
        match requested {
            Some(actor) if !actor.is_empty() => actor.to_string(),
            _ => self.default_actor.clone(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST]);

    let api = Router::new()
        .route("/api/update", post(api::update))
        .route("/api/export", post(api::export))
        .route("/api/auth", get(api::authorize))
        .route("/api/playbacks", get(api::playbacks))
        .route("/api/artists", get(api::artists))
        .route("/api/tracks", get(api::tracks))
        .layer(cors);

    Router::new()
        .merge(api)
        .route("/auth/callback", get(api::callback))
        .merge(api::health_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
