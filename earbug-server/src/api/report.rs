//! Report endpoints
//!
//! All three share the same query parameters. Without `from` the window
//! starts 30 days ago.

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use earbug_common::report::{ArtistSummary, PlaybackFilter, PlaybackView, SortMetric, TrackSummary};
use earbug_common::time::{now, parse_key};
use serde::Deserialize;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Window used when the request gives no lower bound
pub const DEFAULT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Default, Deserialize)]
pub struct ReportQuery {
    pub actor: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    #[serde(default)]
    pub artist: String,
    #[serde(default)]
    pub track: String,
    #[serde(default)]
    pub sort: String,
}

fn parse_bound(name: &str, value: Option<&str>) -> ApiResult<Option<DateTime<Utc>>> {
    match value.filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => parse_key(v)
            .map(Some)
            .map_err(|_| ApiError::BadRequest(format!("{} must be an RFC 3339 timestamp", name))),
    }
}

impl ReportQuery {
    /// Build the playback filter, defaulting `from` relative to `now`
    pub fn filter(&self, now: DateTime<Utc>) -> ApiResult<PlaybackFilter> {
        let from = parse_bound("from", self.from.as_deref())?
            .unwrap_or(now - ChronoDuration::days(DEFAULT_WINDOW_DAYS));
        let to = parse_bound("to", self.to.as_deref())?;
        Ok(PlaybackFilter {
            from: Some(from),
            to,
            artist: self.artist.clone(),
            track: self.track.clone(),
        })
    }
}

/// GET /api/playbacks
pub async fn playbacks(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Vec<PlaybackView>>> {
    let actor = state.actor_or_default(query.actor.as_deref());
    let filter = query.filter(now())?;
    Ok(Json(state.service.report(&actor, &filter).await?))
}

/// GET /api/artists?sort=plays|time|tracks
pub async fn artists(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Vec<ArtistSummary>>> {
    let actor = state.actor_or_default(query.actor.as_deref());
    let filter = query.filter(now())?;
    let metric = SortMetric::parse(&query.sort);
    Ok(Json(state.service.artists(&actor, &filter, metric).await?))
}

/// GET /api/tracks?sort=plays|time
pub async fn tracks(
    State(state): State<AppState>,
    Query(query): Query<ReportQuery>,
) -> ApiResult<Json<Vec<TrackSummary>>> {
    let actor = state.actor_or_default(query.actor.as_deref());
    let filter = query.filter(now())?;
    let metric = SortMetric::parse(&query.sort);
    Ok(Json(state.service.tracks(&actor, &filter, metric).await?))
}
