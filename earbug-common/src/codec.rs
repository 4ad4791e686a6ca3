//! Snapshot codec
//!
//! A snapshot is the JSON document of a [`Store`] compressed with zstd. Map
//! entries are written in key order so identical stores produce identical
//! bytes.
//!
//! # Legacy layout
//!
//! Older snapshots kept the serialized credential in a top-level `token`
//! field instead of `auth.token`. On import the structured field wins; the
//! flat field is only used when `auth.token` is empty, and a warning is
//! logged. Exports never write the flat field.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use tracing::{info, warn};

use crate::blob::BlobStore;
use crate::model::{Auth, Playback, Store, Track};
use crate::{Error, Result};

/// zstd level used for snapshots
const COMPRESSION_LEVEL: i32 = 3;

/// Borrowed view used for encoding
#[derive(Serialize)]
struct SnapshotRef<'a> {
    playbacks: BTreeMap<&'a String, &'a Playback>,
    tracks: BTreeMap<&'a String, &'a Track>,
    auth: &'a Auth,
}

/// Owned document used for decoding
#[derive(Deserialize)]
struct SnapshotDoc {
    #[serde(default)]
    playbacks: HashMap<String, Playback>,
    #[serde(default)]
    tracks: HashMap<String, Track>,
    #[serde(default)]
    auth: Option<Auth>,
    /// Deprecated flat credential (base64), superseded by `auth.token`
    #[serde(default)]
    token: Option<String>,
}

/// Encode a store into uncompressed snapshot JSON
///
/// Runs under the actor lock; compression happens afterwards in [`compress`].
pub fn encode(store: &Store) -> Result<Vec<u8>> {
    let doc = SnapshotRef {
        playbacks: store.playbacks.iter().collect(),
        tracks: store.tracks.iter().collect(),
        auth: &store.auth,
    };
    serde_json::to_vec(&doc).map_err(|e| Error::Serialization(format!("encode store: {}", e)))
}

/// Compress encoded snapshot bytes with a streaming zstd encoder
pub fn compress(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = zstd::stream::Encoder::new(Vec::new(), COMPRESSION_LEVEL)
        .map_err(|e| Error::Serialization(format!("create zstd encoder: {}", e)))?;
    encoder
        .write_all(raw)
        .map_err(|e| Error::Serialization(format!("compress snapshot: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Serialization(format!("finish zstd stream: {}", e)))
}

/// Serialize and compress a store
pub fn export(store: &Store) -> Result<Vec<u8>> {
    compress(&encode(store)?)
}

/// Decompress and deserialize a snapshot
pub fn import(bytes: &[u8]) -> Result<Store> {
    let mut decoder = zstd::stream::Decoder::new(bytes)
        .map_err(|e| Error::Serialization(format!("create zstd decoder: {}", e)))?;
    let mut raw = Vec::new();
    decoder
        .read_to_end(&mut raw)
        .map_err(|e| Error::Serialization(format!("decompress snapshot: {}", e)))?;

    let doc: SnapshotDoc = serde_json::from_slice(&raw)
        .map_err(|e| Error::Serialization(format!("decode store: {}", e)))?;

    let mut auth = doc.auth.unwrap_or_default();
    auth.token = resolve_token(auth.token, doc.token.as_deref())?;

    Ok(Store {
        playbacks: doc.playbacks,
        tracks: doc.tracks,
        auth,
    })
}

/// Pick the credential: structured field first, deprecated flat field second
fn resolve_token(structured: Vec<u8>, legacy: Option<&str>) -> Result<Vec<u8>> {
    if !structured.is_empty() {
        return Ok(structured);
    }
    match legacy {
        Some(encoded) if !encoded.is_empty() => {
            warn!("Falling back to deprecated top-level token field");
            STANDARD
                .decode(encoded.as_bytes())
                .map_err(|e| Error::Serialization(format!("decode legacy token: {}", e)))
        }
        _ => Ok(structured),
    }
}

/// Read a snapshot if one exists
///
/// A missing key is `Ok(None)`. Any other failure, including garbled content,
/// is returned.
pub async fn read_snapshot(blob: &dyn BlobStore, key: &str) -> Result<Option<Store>> {
    match blob.read(key).await {
        Ok(bytes) => {
            let store = import(&bytes)?;
            info!(
                key = %key,
                playbacks = store.playbacks.len(),
                tracks = store.tracks.len(),
                "Loaded snapshot"
            );
            Ok(Some(store))
        }
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Load a store from the blob collaborator
///
/// A missing key is a cold start and yields an empty store.
pub async fn load(blob: &dyn BlobStore, key: &str) -> Result<Store> {
    match read_snapshot(blob, key).await? {
        Some(store) => Ok(store),
        None => {
            warn!(key = %key, "No snapshot found, starting with an empty store");
            Ok(Store::new())
        }
    }
}
