//! Snapshot export

use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::AppState;

/// Media type of a compressed snapshot
pub const SNAPSHOT_CONTENT_TYPE: &str = "application/zstd";

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    pub actor: Option<String>,
    /// Destination blob key; when absent the snapshot is only returned
    pub key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ExportResponse {
    pub actor: String,
    pub key: String,
    pub bytes: usize,
}

/// POST /api/export?actor=&key=
pub async fn export(
    State(state): State<AppState>,
    Query(query): Query<ExportQuery>,
) -> ApiResult<Response> {
    let actor = state.actor_or_default(query.actor.as_deref());
    let key = query.key.filter(|k| !k.is_empty());
    let bytes = state.service.export(&actor, key.as_deref()).await?;

    let response = match key {
        Some(key) => Json(ExportResponse {
            actor,
            key,
            bytes: bytes.len(),
        })
        .into_response(),
        None => (
            [
                (header::CONTENT_TYPE, SNAPSHOT_CONTENT_TYPE.to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{}.json.zst\"", actor),
                ),
            ],
            bytes,
        )
            .into_response(),
    };
    Ok(response)
}
