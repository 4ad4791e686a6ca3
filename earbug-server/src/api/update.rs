//! On-demand update

use axum::extract::{Query, State};
use axum::Json;
use earbug_common::model::IngestStats;
use serde::Serialize;
use tracing::info;

use super::ActorQuery;
use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct UpdateResponse {
    pub actor: String,
    #[serde(flatten)]
    pub stats: IngestStats,
}

/// POST /api/update?actor=
///
/// Concurrent requests for the same actor share one fetch.
pub async fn update(
    State(state): State<AppState>,
    Query(query): Query<ActorQuery>,
) -> ApiResult<Json<UpdateResponse>> {
    let actor = state.actor_or_default(query.actor.as_deref());
    info!(actor = %actor, "Manual update requested");
    let stats = state.service.update(&actor).await?;
    Ok(Json(UpdateResponse { actor, stats }))
}
