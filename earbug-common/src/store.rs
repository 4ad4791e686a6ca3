//! Per-actor shared state
//!
//! # Lock boundary
//!
//! Each [`Actor`] owns exactly one exclusive lock around [`ActorState`]: the
//! record store, the pending authorization and the live playback source.
//! Every store mutation (ingest, auth changes) and every multi-map read
//! (reports, snapshot encoding) happens inside a single acquisition of that
//! lock. Network calls never run while it is held.
//!
//! Publishing a snapshot goes through a second, per-actor publish lock. The
//! snapshot is taken after that lock is acquired, so writes never overlap and
//! a later write always carries at least the state of an earlier one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::auth::PendingAuthorization;
use crate::blob::BlobStore;
use crate::codec;
use crate::model::{IngestStats, Store};
use crate::report::{self, PlaybackFilter, PlaybackView};
use crate::source::{PlaybackSource, RawPlayback};
use crate::{Error, Result};

/// Everything guarded by the actor lock
pub struct ActorState {
    pub store: Store,
    pub pending: Option<PendingAuthorization>,
    /// Authenticated source; `None` until the actor is authorized
    pub source: Option<Arc<dyn PlaybackSource>>,
}

/// One tracked account
pub struct Actor {
    name: String,
    snapshot_key: String,
    state: Mutex<ActorState>,
    publish: Mutex<()>,
    /// Whether the store exists under `snapshot_key`
    persisted: AtomicBool,
}

impl Actor {
    pub fn new(
        name: impl Into<String>,
        snapshot_key: impl Into<String>,
        store: Store,
        source: Option<Arc<dyn PlaybackSource>>,
    ) -> Self {
        Self {
            name: name.into(),
            snapshot_key: snapshot_key.into(),
            state: Mutex::new(ActorState {
                store,
                pending: None,
                source,
            }),
            publish: Mutex::new(()),
            persisted: AtomicBool::new(false),
        }
    }

    /// Record that a snapshot for this actor already exists
    pub fn mark_persisted(&self) {
        self.persisted.store(true, Ordering::SeqCst);
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted.load(Ordering::SeqCst)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Blob key this actor's snapshots are published under
    pub fn snapshot_key(&self) -> &str {
        &self.snapshot_key
    }

    /// Acquire the actor lock
    pub async fn lock(&self) -> MutexGuard<'_, ActorState> {
        self.state.lock().await
    }

    /// Merge a fetched batch in one lock acquisition
    pub async fn ingest(&self, events: &[RawPlayback]) -> IngestStats {
        self.lock().await.store.ingest(events)
    }

    /// Current authenticated source
    pub async fn source(&self) -> Result<Arc<dyn PlaybackSource>> {
        self.lock()
            .await
            .source
            .clone()
            .ok_or_else(|| Error::Auth(format!("actor {} is not authorized", self.name)))
    }

    /// Compressed snapshot of the current store
    ///
    /// The store is encoded under the lock; compression runs after release.
    pub async fn snapshot(&self) -> Result<Vec<u8>> {
        let raw = {
            let state = self.lock().await;
            codec::encode(&state.store)?
        };
        codec::compress(&raw)
    }

    /// Snapshot the store and write it to `key`, one publish at a time
    pub async fn publish(&self, blob: &dyn BlobStore, key: &str) -> Result<Vec<u8>> {
        let _publishing = self.publish.lock().await;
        let bytes = self.snapshot().await?;
        blob.write(key, &bytes).await?;
        if key == self.snapshot_key {
            self.mark_persisted();
        }
        debug!(actor = %self.name, key = %key, bytes = bytes.len(), "Snapshot published");
        Ok(bytes)
    }

    /// Whether the store holds no history and no credential
    pub async fn is_empty(&self) -> bool {
        let state = self.lock().await;
        state.store.playbacks.is_empty() && state.store.auth.token.is_empty()
    }

    /// Filtered, ordered playbacks with derived playback time
    pub async fn playbacks(&self, filter: &PlaybackFilter) -> Vec<PlaybackView> {
        let state = self.lock().await;
        report::playbacks(&state.store, filter)
    }

    /// Playback and track counts
    pub async fn counts(&self) -> (usize, usize) {
        let state = self.lock().await;
        (state.store.playbacks.len(), state.store.tracks.len())
    }
}
