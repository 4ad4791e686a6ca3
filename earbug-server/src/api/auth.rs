//! OAuth authorize/callback handlers
//!
//! `GET /api/auth` starts an authorization and redirects to the provider.
//! The actor is remembered in a cookie so the provider's redirect back to
//! `/auth/callback` (which carries only `state` and `code`) lands on the
//! right actor.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Redirect};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Cookie carrying the actor between authorize and callback
pub const ACTOR_COOKIE: &str = "earbug_actor";

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub actor: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    pub state: Option<String>,
    pub code: Option<String>,
    pub actor: Option<String>,
    /// Set by the provider when the user denies access
    pub error: Option<String>,
}

/// GET /api/auth?actor=&client_id=&client_secret=
pub async fn authorize(
    State(state): State<AppState>,
    Query(query): Query<AuthorizeQuery>,
) -> ApiResult<impl IntoResponse> {
    let actor = state.actor_or_default(query.actor.as_deref());
    let url = state
        .service
        .authorize(&actor, query.client_id.as_deref(), query.client_secret.as_deref())
        .await?;

    let cookie = format!("{}={}; Path=/; HttpOnly; SameSite=Lax", ACTOR_COOKIE, actor);
    Ok(([(header::SET_COOKIE, cookie)], Redirect::temporary(&url)))
}

/// GET /auth/callback?state=&code=[&actor=]
pub async fn callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> ApiResult<&'static str> {
    if let Some(error) = query.error.filter(|e| !e.is_empty()) {
        warn!(error = %error, "Authorization denied by provider");
        return Err(earbug_common::Error::Auth(format!("authorization denied: {}", error)).into());
    }

    let presented = query
        .state
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing state".to_string()))?;
    let code = query
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing code".to_string()))?;

    let from_cookie = cookie_value(&headers, ACTOR_COOKIE);
    let actor = state.actor_or_default(query.actor.as_deref().or(from_cookie.as_deref()));

    state.service.callback(&actor, &presented, &code).await?;
    info!(actor = %actor, "Authorization callback handled");
    Ok("success")
}

/// Value of cookie `name` from the request's Cookie headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}
