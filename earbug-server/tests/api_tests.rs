//! Integration tests for earbug-server API endpoints
//!
//! Tests cover:
//! - Health and readiness probes
//! - Authorize redirect, actor cookie and callback
//! - Update, export and report endpoints
//! - Error mapping to HTTP status codes

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration as ChronoDuration, Utc};
use earbug_common::auth::{Authorizer, ClientCredentials, OAuthToken};
use earbug_common::blob::{BlobStore, MemoryBlobStore};
use earbug_common::codec;
use earbug_common::source::{PlaybackSource, RawArtist, RawPlayback, RawTrack};
use earbug_common::{Earbug, Error, Result, ServiceConfig};
use earbug_server::{build_router, AppState};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot` method

/// Source returning three plays from the last hour
struct RecentSource {
    calls: AtomicUsize,
    delay: Duration,
}

#[async_trait]
impl PlaybackSource for RecentSource {
    async fn fetch_recent(&self, _limit: u32) -> Result<Vec<RawPlayback>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        let eno = RawArtist {
            id: "eno".to_string(),
            uri: "spotify:artist:eno".to_string(),
            name: "Brian Eno".to_string(),
        };
        let song = |id: &str, name: &str| RawTrack {
            id: id.to_string(),
            uri: format!("spotify:track:{}", id),
            kind: "track".to_string(),
            name: name.to_string(),
            duration_ms: 200_000,
            artists: vec![eno.clone()],
        };
        let start = Utc::now() - ChronoDuration::hours(1);
        Ok(vec![
            RawPlayback {
                played_at: start,
                track: song("t1", "Baby's on Fire"),
                context_type: String::new(),
                context_uri: String::new(),
            },
            RawPlayback {
                played_at: start + ChronoDuration::seconds(150),
                track: song("t1", "Baby's on Fire"),
                context_type: String::new(),
                context_uri: String::new(),
            },
            RawPlayback {
                played_at: start + ChronoDuration::seconds(450),
                track: song("t2", "Here Come the Warm Jets"),
                context_type: String::new(),
                context_uri: String::new(),
            },
        ])
    }
}

struct TestAuthorizer {
    source: Arc<RecentSource>,
}

#[async_trait]
impl Authorizer for TestAuthorizer {
    fn auth_url(&self, client: &ClientCredentials, state: &str) -> String {
        format!("https://auth.test/authorize?client_id={}&state={}", client.client_id, state)
    }

    async fn exchange(&self, _client: &ClientCredentials, code: &str) -> Result<OAuthToken> {
        if code == "bad" {
            return Err(Error::Auth("invalid_grant".to_string()));
        }
        Ok(OAuthToken {
            access_token: "token".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: None,
            expiry: None,
        })
    }

    fn authenticated_source(&self, _client: &ClientCredentials, _token: OAuthToken) -> Arc<dyn PlaybackSource> {
        self.source.clone()
    }
}

struct TestApp {
    router: Router,
    blob: Arc<MemoryBlobStore>,
    source: Arc<RecentSource>,
}

/// Test helper: Create app backed by in-memory collaborators
fn setup_app_with_delay(delay: Duration) -> TestApp {
    let blob = Arc::new(MemoryBlobStore::new());
    let source = Arc::new(RecentSource {
        calls: AtomicUsize::new(0),
        delay,
    });
    let authorizer = Arc::new(TestAuthorizer {
        source: source.clone(),
    });
    let service = Arc::new(Earbug::new(blob.clone(), authorizer, ServiceConfig::default()));
    TestApp {
        router: build_router(AppState::new(service, "alice")),
        blob,
        source,
    }
}

fn setup_app() -> TestApp {
    setup_app_with_delay(Duration::ZERO)
}

fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

async fn extract_text(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    String::from_utf8(bytes.to_vec()).expect("Should be UTF-8")
}

/// Test helper: Run authorize + callback for `actor`
async fn authorize(app: &Router, actor: &str) {
    let response = app
        .clone()
        .oneshot(test_request(
            "GET",
            &format!("/api/auth?actor={}&client_id=id&client_secret=secret", actor),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
    let state = location.split("state=").nth(1).unwrap().to_string();

    let response = app
        .clone()
        .oneshot(test_request(
            "GET",
            &format!("/auth/callback?state={}&code=good&actor={}", state, actor),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

// =============================================================================
// Health
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let app = setup_app();

    let response = app.router.oneshot(test_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "earbug-server");
    assert!(body["version"].is_string());
    assert!(body["actors"].is_array());
}

#[tokio::test]
async fn test_ready_endpoint() {
    let app = setup_app();

    let response = app.router.oneshot(test_request("GET", "/-/ready")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(extract_text(response.into_body()).await, "ok");
}

// =============================================================================
// Authorization
// =============================================================================

#[tokio::test]
async fn test_authorize_redirects_and_sets_cookie() {
    let app = setup_app();

    let response = app
        .router
        .oneshot(test_request("GET", "/api/auth?actor=bob&client_id=id&client_secret=secret"))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    assert!(location.starts_with("https://auth.test/authorize?client_id=id&state="));
    let cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    assert!(cookie.starts_with("earbug_actor=bob;"));
}

#[tokio::test]
async fn test_authorize_without_credentials_is_unauthorized() {
    let app = setup_app();

    let response = app.router.oneshot(test_request("GET", "/api/auth")).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
    assert!(body["error"]["message"].as_str().unwrap().contains("client id/secret"));
}

#[tokio::test]
async fn test_callback_uses_actor_cookie() {
    let app = setup_app();

    let response = app
        .router
        .clone()
        .oneshot(test_request("GET", "/api/auth?actor=bob&client_id=id&client_secret=secret"))
        .await
        .unwrap();
    let location = response.headers()[header::LOCATION].to_str().unwrap().to_string();
    let state = location.split("state=").nth(1).unwrap().to_string();

    let request = Request::builder()
        .method("GET")
        .uri(format!("/auth/callback?state={}&code=good", state))
        .header(header::COOKIE, "earbug_actor=bob")
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(extract_text(response.into_body()).await, "success");

    // bob is now authorized; the default actor was never created
    let response = app
        .router
        .clone()
        .oneshot(test_request("POST", "/api/update?actor=bob"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = app
        .router
        .oneshot(test_request("POST", "/api/update"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_authorize_rejects_actor_with_cookie_attributes() {
    let app = setup_app();

    let response = app
        .router
        .oneshot(test_request(
            "GET",
            "/api/auth?actor=x%3B%20Domain%3Devil&client_id=id&client_secret=secret",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(response.headers().get(header::SET_COOKIE).is_none());
}

#[tokio::test]
async fn test_callback_with_stale_state_is_unauthorized() {
    let app = setup_app();

    app.router
        .clone()
        .oneshot(test_request("GET", "/api/auth?client_id=id&client_secret=secret"))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(test_request("GET", "/auth/callback?state=forged&code=good"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_callback_missing_parameters_is_bad_request() {
    let app = setup_app();

    let response = app
        .router
        .oneshot(test_request("GET", "/auth/callback?code=good"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_callback_denied_by_provider() {
    let app = setup_app();

    let response = app
        .router
        .oneshot(test_request("GET", "/auth/callback?error=access_denied&state=x"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

// =============================================================================
// Update and reports
// =============================================================================

#[tokio::test]
async fn test_update_then_playbacks() {
    let app = setup_app();
    authorize(&app.router, "alice").await;

    let response = app
        .router
        .clone()
        .oneshot(test_request("POST", "/api/update"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["actor"], "alice");
    assert_eq!(body["added_playbacks"], 3);
    assert_eq!(body["added_tracks"], 2);

    let response = app
        .router
        .oneshot(test_request("GET", "/api/playbacks"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    let plays = body.as_array().unwrap();
    assert_eq!(plays.len(), 3);
    // Newest first; the oldest play is clipped to the 150s gap
    assert_eq!(plays[0]["playback_time_ms"], 200_000);
    assert_eq!(plays[1]["playback_time_ms"], 200_000);
    assert_eq!(plays[2]["playback_time_ms"], 150_000);
}

#[tokio::test]
async fn test_concurrent_update_requests_share_one_fetch() {
    let app = setup_app_with_delay(Duration::from_millis(100));
    authorize(&app.router, "alice").await;

    let requests = (0..5).map(|_| {
        let router = app.router.clone();
        async move { router.oneshot(test_request("POST", "/api/update")).await.unwrap() }
    });
    let responses = futures::future::join_all(requests).await;

    assert!(responses.iter().all(|r| r.status() == StatusCode::OK));
    assert_eq!(app.source.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_artists_and_tracks_reports() {
    let app = setup_app();
    authorize(&app.router, "alice").await;
    app.router
        .clone()
        .oneshot(test_request("POST", "/api/update"))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(test_request("GET", "/api/artists?sort=tracks&artist=ENO"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body[0]["name"], "Brian Eno");
    assert_eq!(body[0]["plays"], 3);
    assert_eq!(body[0]["tracks"].as_array().unwrap().len(), 2);

    let response = app
        .router
        .oneshot(test_request("GET", "/api/tracks?sort=plays"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body[0]["id"], "t1");
    assert_eq!(body[0]["plays"], 2);
    assert_eq!(body[0]["time_ms"], 350_000);
}

#[tokio::test]
async fn test_report_window_excludes_old_plays() {
    let app = setup_app();
    authorize(&app.router, "alice").await;
    app.router
        .clone()
        .oneshot(test_request("POST", "/api/update"))
        .await
        .unwrap();

    let to = (Utc::now() - ChronoDuration::days(2)).to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    let response = app
        .router
        .oneshot(test_request("GET", &format!("/api/playbacks?to={}", to)))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_report_for_unknown_actor_is_not_found() {
    let app = setup_app();

    let response = app
        .router
        .oneshot(test_request("GET", "/api/playbacks?actor=nobody"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    assert!(app.blob.keys().await.is_empty());
}

#[tokio::test]
async fn test_report_bad_timestamp_is_bad_request() {
    let app = setup_app();

    let response = app
        .router
        .oneshot(test_request("GET", "/api/playbacks?from=last-week"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

// =============================================================================
// Export
// =============================================================================

#[tokio::test]
async fn test_export_returns_snapshot_bytes() {
    let app = setup_app();
    authorize(&app.router, "alice").await;
    app.router
        .clone()
        .oneshot(test_request("POST", "/api/update"))
        .await
        .unwrap();

    let response = app
        .router
        .oneshot(test_request("POST", "/api/export"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "application/zstd");

    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let store = codec::import(&bytes).unwrap();
    assert_eq!(store.playbacks.len(), 3);
}

#[tokio::test]
async fn test_export_to_key_publishes() {
    let app = setup_app();
    authorize(&app.router, "alice").await;

    let response = app
        .router
        .oneshot(test_request("POST", "/api/export?key=backup.json.zst"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["key"], "backup.json.zst");

    let published = app.blob.read("backup.json.zst").await.unwrap();
    assert_eq!(body["bytes"], published.len());
}

#[tokio::test]
async fn test_export_escaping_key_is_bad_request() {
    let app = setup_app();

    let response = app
        .router
        .oneshot(test_request("POST", "/api/export?key=../outside"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
