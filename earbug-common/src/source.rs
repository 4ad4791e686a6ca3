//! Playback source collaborator
//!
//! The source returns the most recent listening events for the authenticated
//! account. Implementations must not retry internally beyond a single request;
//! failures surface as [`Error::TransientSource`](crate::Error::TransientSource)
//! and the next scheduled update tries again.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{Artist, Track};
use crate::time::millis_to_duration;
use crate::Result;

/// Largest page the recently-played endpoint returns
pub const MAX_FETCH_LIMIT: u32 = 50;

/// Artist as reported by the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawArtist {
    pub id: String,
    pub uri: String,
    pub name: String,
}

/// Track as reported by the source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTrack {
    pub id: String,
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub artists: Vec<RawArtist>,
}

impl RawTrack {
    /// Convert into the stored track record
    pub fn to_track(&self) -> Track {
        Track {
            id: self.id.clone(),
            uri: self.uri.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            duration: millis_to_duration(self.duration_ms),
            artists: self
                .artists
                .iter()
                .map(|a| Artist {
                    id: a.id.clone(),
                    uri: a.uri.clone(),
                    name: a.name.clone(),
                })
                .collect(),
        }
    }
}

/// One recently-played item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPlayback {
    pub played_at: DateTime<Utc>,
    pub track: RawTrack,
    pub context_type: String,
    pub context_uri: String,
}

/// Source of recent listening events
#[async_trait]
pub trait PlaybackSource: Send + Sync {
    /// Fetch up to `limit` most recent events, newest first
    async fn fetch_recent(&self, limit: u32) -> Result<Vec<RawPlayback>>;
}
