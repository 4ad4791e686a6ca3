//! HTTP API handlers for earbug-server

pub mod auth;
pub mod export;
pub mod health;
pub mod report;
pub mod update;

pub use auth::{authorize, callback, ACTOR_COOKIE};
pub use export::export;
pub use health::health_routes;
pub use report::{artists, playbacks, tracks};
pub use update::update;

use serde::Deserialize;

/// `?actor=` query parameter
#[derive(Debug, Default, Deserialize)]
pub struct ActorQuery {
    pub actor: Option<String>,
}
