//! Test helpers for earbug-common integration tests
//!
//! - ScriptedSource: playback source returning a fixed batch, counting calls
//! - FakeAuthorizer: authorizer that accepts any code and hands out ScriptedSources
//! - SlowBlobStore: in-memory blob store whose next write can be held back
//! - Builders for raw playback events

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use earbug_common::auth::{Authorizer, ClientCredentials, OAuthToken};
use earbug_common::blob::{BlobStore, MemoryBlobStore};
use earbug_common::source::{PlaybackSource, RawArtist, RawPlayback, RawTrack};
use earbug_common::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fixed instant all test timestamps are offset from
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
}

pub fn artist(id: &str, name: &str) -> RawArtist {
    RawArtist {
        id: id.to_string(),
        uri: format!("spotify:artist:{}", id),
        name: name.to_string(),
    }
}

pub fn track(id: &str, name: &str, duration_secs: u64, artists: Vec<RawArtist>) -> RawTrack {
    RawTrack {
        id: id.to_string(),
        uri: format!("spotify:track:{}", id),
        kind: "track".to_string(),
        name: name.to_string(),
        duration_ms: duration_secs * 1000,
        artists,
    }
}

/// Playback `offset_secs` after [`base_time`]
pub fn play_at(offset_secs: i64, track: RawTrack) -> RawPlayback {
    RawPlayback {
        played_at: base_time() + chrono::Duration::seconds(offset_secs),
        track,
        context_type: "album".to_string(),
        context_uri: "spotify:album:1".to_string(),
    }
}

/// A small listening history: two Eno tracks and one Bowie track
pub fn sample_history() -> Vec<RawPlayback> {
    let eno = artist("eno", "Brian Eno");
    let bowie = artist("bowie", "David Bowie");
    vec![
        play_at(0, track("t1", "Baby's on Fire", 200, vec![eno.clone()])),
        play_at(150, track("t2", "Heroes", 370, vec![bowie, eno.clone()])),
        play_at(450, track("t3", "Needles in the Camel's Eye", 190, vec![eno])),
    ]
}

/// Playback source returning a scripted batch
pub struct ScriptedSource {
    batch: Mutex<Result<Vec<RawPlayback>>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(batch: Vec<RawPlayback>) -> Arc<Self> {
        Self::with_delay(batch, Duration::ZERO)
    }

    pub fn with_delay(batch: Vec<RawPlayback>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            batch: Mutex::new(Ok(batch)),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing(error: Error, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            batch: Mutex::new(Err(error)),
            delay,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn set_batch(&self, batch: Vec<RawPlayback>) {
        *self.batch.lock().unwrap() = Ok(batch);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlaybackSource for ScriptedSource {
    async fn fetch_recent(&self, limit: u32) -> Result<Vec<RawPlayback>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.batch
            .lock()
            .unwrap()
            .clone()
            .map(|batch| batch.into_iter().take(limit as usize).collect())
    }
}

/// Authorizer accepting every code; sources it builds share one ScriptedSource
pub struct FakeAuthorizer {
    pub source: Arc<ScriptedSource>,
    pub exchanges: AtomicUsize,
    exchange_delay: Duration,
}

impl FakeAuthorizer {
    pub fn new(source: Arc<ScriptedSource>) -> Arc<Self> {
        Self::with_exchange_delay(source, Duration::ZERO)
    }

    /// Code exchanges take `delay` before returning a token
    pub fn with_exchange_delay(source: Arc<ScriptedSource>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            source,
            exchanges: AtomicUsize::new(0),
            exchange_delay: delay,
        })
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authorizer for FakeAuthorizer {
    fn auth_url(&self, client: &ClientCredentials, state: &str) -> String {
        format!(
            "https://auth.test/authorize?client_id={}&state={}",
            client.client_id, state
        )
    }

    async fn exchange(&self, _client: &ClientCredentials, code: &str) -> Result<OAuthToken> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if !self.exchange_delay.is_zero() {
            tokio::time::sleep(self.exchange_delay).await;
        }
        Ok(OAuthToken {
            access_token: format!("access-{}", code),
            token_type: "Bearer".to_string(),
            refresh_token: Some("refresh".to_string()),
            expiry: None,
        })
    }

    fn authenticated_source(
        &self,
        _client: &ClientCredentials,
        _token: OAuthToken,
    ) -> Arc<dyn PlaybackSource> {
        self.source.clone()
    }
}

/// Extract the `state` query value from a FakeAuthorizer URL
pub fn state_from_url(url: &str) -> String {
    url.split("state=").nth(1).unwrap_or_default().to_string()
}

/// Memory blob store that can stall its next write
#[derive(Default)]
pub struct SlowBlobStore {
    pub inner: MemoryBlobStore,
    next_write_delay: Mutex<Option<Duration>>,
    writes: AtomicUsize,
}

impl SlowBlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next write sleeps for `delay` before storing its bytes
    pub fn delay_next_write(&self, delay: Duration) {
        *self.next_write_delay.lock().unwrap() = Some(delay);
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlobStore for SlowBlobStore {
    async fn read(&self, key: &str) -> Result<Vec<u8>> {
        self.inner.read(key).await
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let delay = self.next_write_delay.lock().unwrap().take();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.write(key, bytes).await
    }
}
