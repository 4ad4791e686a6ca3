//! Report derivation
//!
//! Turns the raw playback map into an ordered, filtered list of
//! [`PlaybackView`]s and groups those into per-artist and per-track summaries.
//!
//! # Playback time
//!
//! The source only reports when a track started, not how long it played.
//! After sorting newest first, each playback is credited with the track's
//! nominal duration, clipped to the gap before the next (chronologically
//! later) playback. The newest playback has no successor in the window and
//! keeps the full duration. Skipped tracks therefore do not count their whole
//! length.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

use crate::model::{duration_millis, Artist, Store, Track};
use crate::time::parse_key;

/// Playback selection criteria
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackFilter {
    /// Drop playbacks that started strictly before this instant
    #[serde(default)]
    pub from: Option<DateTime<Utc>>,
    /// Drop playbacks that started strictly after this instant
    #[serde(default)]
    pub to: Option<DateTime<Utc>>,
    /// Case-insensitive substring of any credited artist name
    #[serde(default)]
    pub artist: String,
    /// Case-insensitive substring of the track name
    #[serde(default)]
    pub track: String,
}

impl PlaybackFilter {
    /// Filter with only a lower time bound
    pub fn since(from: DateTime<Utc>) -> Self {
        Self {
            from: Some(from),
            ..Self::default()
        }
    }

    fn in_range(&self, start: &DateTime<Utc>) -> bool {
        if let Some(from) = &self.from {
            if start < from {
                return false;
            }
        }
        if let Some(to) = &self.to {
            if start > to {
                return false;
            }
        }
        true
    }

    fn matches_track(&self, track: &Track) -> bool {
        let track_match = self.track.is_empty() || contains_ignore_case(&track.name, &self.track);
        let artist_match = self.artist.is_empty()
            || track
                .artists
                .iter()
                .any(|a| contains_ignore_case(&a.name, &self.artist));
        track_match && artist_match
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// One resolved playback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlaybackView {
    pub start_time: DateTime<Utc>,
    /// Estimated listening time
    #[serde(rename = "playback_time_ms", with = "duration_millis")]
    pub playback_time: Duration,
    pub track: Track,
}

/// Ordering key for aggregate reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMetric {
    /// Number of playbacks
    #[default]
    Plays,
    /// Accumulated playback time
    Time,
    /// Distinct tracks (artist view only)
    Tracks,
}

impl SortMetric {
    /// Parse a query value; anything unrecognized sorts by plays
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "time" => SortMetric::Time,
            "tracks" | "track" => SortMetric::Tracks,
            _ => SortMetric::Plays,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SortMetric::Plays => "plays",
            SortMetric::Time => "time",
            SortMetric::Tracks => "tracks",
        }
    }
}

/// Per-track totals
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrackSummary {
    pub id: String,
    pub name: String,
    pub plays: usize,
    #[serde(rename = "time_ms", with = "duration_millis")]
    pub time: Duration,
    pub artists: Vec<Artist>,
}

/// Per-artist totals with a per-track breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtistSummary {
    pub id: String,
    pub name: String,
    pub plays: usize,
    #[serde(rename = "time_ms", with = "duration_millis")]
    pub time: Duration,
    pub tracks: Vec<TrackSummary>,
}

/// Select, order and time the playbacks matching `filter`
///
/// Must be called with the actor lock held so the playback and track maps
/// are read from the same state.
pub fn playbacks(store: &Store, filter: &PlaybackFilter) -> Vec<PlaybackView> {
    let mut plays = Vec::new();

    for (key, play) in &store.playbacks {
        let start_time = match parse_key(key) {
            Ok(ts) => ts,
            Err(e) => {
                warn!(key = %key, "Skipping playback with unparseable timestamp: {}", e);
                continue;
            }
        };
        if !filter.in_range(&start_time) {
            continue;
        }

        let Some(track) = store.tracks.get(&play.track_id) else {
            debug!(key = %key, track_id = %play.track_id, "Skipping playback with unknown track");
            continue;
        };
        if !filter.matches_track(track) {
            continue;
        }

        plays.push(PlaybackView {
            start_time,
            playback_time: track.duration,
            track: track.clone(),
        });
    }

    plays.sort_by(|a, b| {
        b.start_time
            .cmp(&a.start_time)
            .then_with(|| a.track.id.cmp(&b.track.id))
    });
    clip_playback_times(&mut plays);
    plays
}

/// Clip each playback to the gap before its successor; `plays` is newest first
pub fn clip_playback_times(plays: &mut [PlaybackView]) {
    for i in 1..plays.len() {
        let gap = (plays[i - 1].start_time - plays[i].start_time)
            .to_std()
            .unwrap_or(Duration::ZERO);
        let nominal = plays[i].track.duration;
        plays[i].playback_time = nominal.min(gap);
    }
    if let Some(newest) = plays.first_mut() {
        newest.playback_time = newest.track.duration;
    }
}

fn compare_tracks(a: &TrackSummary, b: &TrackSummary, metric: SortMetric) -> Ordering {
    let primary = match metric {
        SortMetric::Time => b.time.cmp(&a.time),
        SortMetric::Plays | SortMetric::Tracks => b.plays.cmp(&a.plays),
    };
    primary
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
}

fn compare_artists(a: &ArtistSummary, b: &ArtistSummary, metric: SortMetric) -> Ordering {
    let primary = match metric {
        SortMetric::Plays => b.plays.cmp(&a.plays),
        SortMetric::Time => b.time.cmp(&a.time),
        SortMetric::Tracks => b.tracks.len().cmp(&a.tracks.len()),
    };
    primary
        .then_with(|| a.name.cmp(&b.name))
        .then_with(|| a.id.cmp(&b.id))
}

/// Group playbacks by track id
pub fn track_report(plays: &[PlaybackView], metric: SortMetric) -> Vec<TrackSummary> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut tracks: Vec<TrackSummary> = Vec::new();

    for play in plays {
        let idx = *index.entry(play.track.id.as_str()).or_insert_with(|| {
            tracks.push(TrackSummary {
                id: play.track.id.clone(),
                name: play.track.name.clone(),
                plays: 0,
                time: Duration::ZERO,
                artists: play.track.artists.clone(),
            });
            tracks.len() - 1
        });
        tracks[idx].plays += 1;
        tracks[idx].time += play.playback_time;
    }

    tracks.sort_by(|a, b| compare_tracks(a, b, metric));
    tracks
}

/// Group playbacks by credited artist; a playback counts once for each artist
pub fn artist_report(plays: &[PlaybackView], metric: SortMetric) -> Vec<ArtistSummary> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut artists: Vec<ArtistSummary> = Vec::new();

    for play in plays {
        for artist in &play.track.artists {
            let idx = *index.entry(artist.id.as_str()).or_insert_with(|| {
                artists.push(ArtistSummary {
                    id: artist.id.clone(),
                    name: artist.name.clone(),
                    plays: 0,
                    time: Duration::ZERO,
                    tracks: Vec::new(),
                });
                artists.len() - 1
            });

            let summary = &mut artists[idx];
            summary.plays += 1;
            summary.time += play.playback_time;

            match summary.tracks.iter_mut().find(|t| t.id == play.track.id) {
                Some(track) => {
                    track.plays += 1;
                    track.time += play.playback_time;
                }
                None => summary.tracks.push(TrackSummary {
                    id: play.track.id.clone(),
                    name: play.track.name.clone(),
                    plays: 1,
                    time: play.playback_time,
                    artists: play.track.artists.clone(),
                }),
            }
        }
    }

    for artist in &mut artists {
        artist.tracks.sort_by(|a, b| compare_tracks(a, b, metric));
    }
    artists.sort_by(|a, b| compare_artists(a, b, metric));
    artists
}
