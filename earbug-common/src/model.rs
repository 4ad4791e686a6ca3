//! Listening-history records
//!
//! The [`Store`] is the whole persisted state of one actor: every playback
//! ever observed (keyed by start timestamp), the metadata of every track those
//! playbacks reference, and the OAuth client/credential record.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::source::RawPlayback;
use crate::time::format_key;

/// Artist credited on a track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artist {
    pub id: String,
    pub uri: String,
    pub name: String,
}

/// Track metadata, immutable once observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    pub uri: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    /// Nominal playtime
    #[serde(rename = "duration_ms", with = "duration_millis")]
    pub duration: Duration,
    /// Credited artists in source order
    #[serde(default)]
    pub artists: Vec<Artist>,
}

/// One listening event; the start timestamp is the map key in [`Store`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playback {
    pub track_id: String,
    pub track_uri: String,
    #[serde(default)]
    pub context_type: String,
    #[serde(default)]
    pub context_uri: String,
}

/// OAuth client registration plus the serialized credential
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    /// Opaque credential bytes (JSON-encoded [`crate::auth::OAuthToken`])
    #[serde(default, with = "base64_bytes")]
    pub token: Vec<u8>,
}

/// Counts reported by one merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestStats {
    pub added_playbacks: usize,
    pub added_tracks: usize,
    pub total_playbacks: usize,
    pub total_tracks: usize,
}

/// Keyed record set for one actor
///
/// Grows monotonically: entries are inserted by [`Store::ingest`] and never
/// updated or removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Store {
    /// RFC 3339 start timestamp -> playback
    pub playbacks: HashMap<String, Playback>,
    /// Track id -> track
    pub tracks: HashMap<String, Track>,
    pub auth: Auth,
}

impl Store {
    /// Create an empty, initialized store
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch of raw events
    ///
    /// First write wins for both maps, so replaying the same batch is a no-op.
    /// Callers hold the actor lock for the whole call; readers never see a
    /// half-merged batch.
    pub fn ingest(&mut self, events: &[RawPlayback]) -> IngestStats {
        let mut stats = IngestStats::default();

        for event in events {
            let key = format_key(&event.played_at);
            if !self.playbacks.contains_key(&key) {
                self.playbacks.insert(
                    key,
                    Playback {
                        track_id: event.track.id.clone(),
                        track_uri: event.track.uri.clone(),
                        context_type: event.context_type.clone(),
                        context_uri: event.context_uri.clone(),
                    },
                );
                stats.added_playbacks += 1;
            }

            if !self.tracks.contains_key(&event.track.id) {
                self.tracks.insert(event.track.id.clone(), event.track.to_track());
                stats.added_tracks += 1;
            }
        }

        stats.total_playbacks = self.playbacks.len();
        stats.total_tracks = self.tracks.len();
        stats
    }
}

/// Serialize a `Duration` as integer milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Serialize opaque bytes as a standard base64 string
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
