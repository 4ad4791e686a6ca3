//! # Earbug Common Library
//!
//! Core of the earbug listening-history service:
//! - Record store and idempotent merge of recently-played events
//! - Snapshot codec and blob durability
//! - Per-actor operation coalescing
//! - Report derivation (playback time clipping, artist/track aggregates)
//! - OAuth authorization flow and the Spotify collaborators
//! - Configuration loading and periodic task scheduling

pub mod auth;
pub mod blob;
pub mod codec;
pub mod coalesce;
pub mod config;
pub mod error;
pub mod model;
pub mod report;
pub mod schedule;
pub mod service;
pub mod source;
pub mod spotify;
pub mod store;
pub mod time;

pub use error::{Error, Result};
pub use service::{Earbug, ServiceConfig};
