//! Spotify Web API collaborators
//!
//! - [`SpotifyAuthorizer`]: authorization-code flow against the accounts
//!   service (client credentials sent in the basic-auth header).
//! - [`SpotifyClient`]: `GET /v1/me/player/recently-played`, refreshing an
//!   expired access token with the refresh token when one is available.
//!
//! # API Reference
//! - Authorization guide: https://developer.spotify.com/documentation/web-api/tutorials/code-flow
//! - Recently played: https://developer.spotify.com/documentation/web-api/reference/get-recently-played

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::auth::{Authorizer, ClientCredentials, OAuthToken};
use crate::source::{PlaybackSource, RawArtist, RawPlayback, RawTrack, MAX_FETCH_LIMIT};
use crate::{Error, Result};

/// Default timeout for Spotify requests
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Scope required to read listening history
pub const SCOPE_RECENTLY_PLAYED: &str = "user-read-recently-played";

/// User-Agent header
const USER_AGENT: &str = concat!("earbug/", env!("CARGO_PKG_VERSION"));

/// Base URLs, overridable for tests
#[derive(Debug, Clone)]
pub struct SpotifyEndpoints {
    pub api_base: String,
    pub authorize_url: String,
    pub token_url: String,
}

impl Default for SpotifyEndpoints {
    fn default() -> Self {
        Self {
            api_base: "https://api.spotify.com/v1".to_string(),
            authorize_url: "https://accounts.spotify.com/authorize".to_string(),
            token_url: "https://accounts.spotify.com/api/token".to_string(),
        }
    }
}

/// Build the shared HTTP client
pub fn http_client() -> Result<Client> {
    Client::builder()
        .timeout(DEFAULT_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn into_token(self, now: DateTime<Utc>, previous_refresh: Option<String>) -> OAuthToken {
        OAuthToken {
            access_token: self.access_token,
            token_type: self.token_type.unwrap_or_else(|| "Bearer".to_string()),
            refresh_token: self.refresh_token.or(previous_refresh),
            expiry: self.expires_in.map(|secs| now + ChronoDuration::seconds(secs)),
        }
    }
}

async fn request_token(
    http: &Client,
    token_url: &str,
    client: &ClientCredentials,
    form: &[(&str, &str)],
) -> Result<TokenResponse> {
    let response = http
        .post(token_url)
        .basic_auth(&client.client_id, Some(&client.client_secret))
        .form(form)
        .send()
        .await
        .map_err(|e| Error::TransientSource(format!("token request failed: {}", e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            return Err(Error::Auth(format!("token endpoint returned {}: {}", status, body)));
        }
        return Err(Error::TransientSource(format!(
            "token endpoint returned {}: {}",
            status, body
        )));
    }

    response
        .json()
        .await
        .map_err(|e| Error::Serialization(format!("decode token response: {}", e)))
}

/// Authorization-code flow against the Spotify accounts service
pub struct SpotifyAuthorizer {
    http: Client,
    redirect_url: String,
    endpoints: SpotifyEndpoints,
}

impl SpotifyAuthorizer {
    pub fn new(redirect_url: impl Into<String>) -> Result<Self> {
        Self::with_endpoints(redirect_url, SpotifyEndpoints::default())
    }

    pub fn with_endpoints(redirect_url: impl Into<String>, endpoints: SpotifyEndpoints) -> Result<Self> {
        Ok(Self {
            http: http_client()?,
            redirect_url: redirect_url.into(),
            endpoints,
        })
    }
}

#[async_trait]
impl Authorizer for SpotifyAuthorizer {
    fn auth_url(&self, client: &ClientCredentials, state: &str) -> String {
        let params = [
            ("client_id", client.client_id.as_str()),
            ("response_type", "code"),
            ("redirect_uri", self.redirect_url.as_str()),
            ("scope", SCOPE_RECENTLY_PLAYED),
            ("state", state),
        ];
        match Url::parse_with_params(&self.endpoints.authorize_url, &params) {
            Ok(url) => url.to_string(),
            // Endpoint is static configuration; fall back to the bare URL
            Err(_) => self.endpoints.authorize_url.clone(),
        }
    }

    async fn exchange(&self, client: &ClientCredentials, code: &str) -> Result<OAuthToken> {
        debug!("Exchanging authorization code");
        let response = request_token(
            &self.http,
            &self.endpoints.token_url,
            client,
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.redirect_url.as_str()),
            ],
        )
        .await?;
        Ok(response.into_token(Utc::now(), None))
    }

    fn authenticated_source(
        &self,
        client: &ClientCredentials,
        token: OAuthToken,
    ) -> Arc<dyn PlaybackSource> {
        Arc::new(SpotifyClient {
            http: self.http.clone(),
            client: client.clone(),
            token: Mutex::new(token),
            endpoints: self.endpoints.clone(),
        })
    }
}

/// Recently-played client bound to one credential
pub struct SpotifyClient {
    http: Client,
    client: ClientCredentials,
    token: Mutex<OAuthToken>,
    endpoints: SpotifyEndpoints,
}

impl SpotifyClient {
    /// Current access token, refreshed first if it has expired
    async fn access_token(&self) -> Result<String> {
        let mut token = self.token.lock().await;
        if token.is_expired(Utc::now()) {
            let refresh = token.refresh_token.clone().ok_or_else(|| {
                Error::Auth("access token expired and no refresh token is available".to_string())
            })?;
            let response = request_token(
                &self.http,
                &self.endpoints.token_url,
                &self.client,
                &[("grant_type", "refresh_token"), ("refresh_token", refresh.as_str())],
            )
            .await?;
            *token = response.into_token(Utc::now(), Some(refresh));
            info!("Refreshed Spotify access token");
        }
        Ok(token.access_token.clone())
    }
}

#[derive(Debug, Deserialize)]
struct RecentlyPlayedPage {
    #[serde(default)]
    items: Vec<PlayHistoryItem>,
}

#[derive(Debug, Deserialize)]
struct PlayHistoryItem {
    track: ApiTrack,
    played_at: DateTime<Utc>,
    #[serde(default)]
    context: Option<ApiContext>,
}

#[derive(Debug, Deserialize)]
struct ApiTrack {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    uri: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    duration_ms: u64,
    #[serde(default)]
    artists: Vec<ApiArtist>,
}

#[derive(Debug, Deserialize)]
struct ApiArtist {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    uri: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ApiContext {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    uri: String,
}

impl From<PlayHistoryItem> for RawPlayback {
    fn from(item: PlayHistoryItem) -> Self {
        let context = item.context.unwrap_or(ApiContext {
            kind: String::new(),
            uri: String::new(),
        });
        RawPlayback {
            played_at: item.played_at,
            track: RawTrack {
                // Local files have no id; their URI is unique instead
                id: item.track.id.unwrap_or_else(|| item.track.uri.clone()),
                uri: item.track.uri,
                kind: item.track.kind,
                name: item.track.name,
                duration_ms: item.track.duration_ms,
                artists: item
                    .track
                    .artists
                    .into_iter()
                    .map(|a| RawArtist {
                        id: a.id.unwrap_or_else(|| a.uri.clone()),
                        uri: a.uri,
                        name: a.name,
                    })
                    .collect(),
            },
            context_type: context.kind,
            context_uri: context.uri,
        }
    }
}

#[async_trait]
impl PlaybackSource for SpotifyClient {
    async fn fetch_recent(&self, limit: u32) -> Result<Vec<RawPlayback>> {
        let access_token = self.access_token().await?;
        let limit = limit.clamp(1, MAX_FETCH_LIMIT).to_string();
        let url = format!("{}/me/player/recently-played", self.endpoints.api_base);

        let response = self
            .http
            .get(&url)
            .bearer_auth(access_token)
            .query(&[("limit", limit.as_str())])
            .send()
            .await
            .map_err(|e| Error::TransientSource(format!("recently played request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Auth("Spotify rejected the access token".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TransientSource(format!(
                "recently played returned {}: {}",
                status, body
            )));
        }

        let page: RecentlyPlayedPage = response
            .json()
            .await
            .map_err(|e| Error::TransientSource(format!("decode recently played: {}", e)))?;

        debug!(items = page.items.len(), "Fetched recently played");
        Ok(page.items.into_iter().map(RawPlayback::from).collect())
    }
}
