//! Earbug service
//!
//! [`Earbug`] owns the actor registry and wires the store, codec, coalescers,
//! report engine and auth manager into the operations exposed to the server.
//!
//! Actors are loaded lazily: the first operation naming an actor reads its
//! snapshot (`<actor>.json.zst`) from the blob store and restores its playback
//! source from the stored credential. A failed load is not cached; the next
//! call retries. Only authorization (and the server's default actor) may
//! create an actor that has no snapshot yet; every other operation on an
//! unknown actor fails with [`Error::NotFound`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthTokenManager, Authorizer};
use crate::blob::{validate_key, BlobStore};
use crate::codec;
use crate::coalesce::Coalescer;
use crate::model::{IngestStats, Store};
use crate::report::{self, ArtistSummary, PlaybackFilter, PlaybackView, SortMetric, TrackSummary};
use crate::source::MAX_FETCH_LIMIT;
use crate::store::Actor;
use crate::{Error, Result};

/// Suffix appended to the actor name to form its snapshot key
pub const SNAPSHOT_SUFFIX: &str = ".json.zst";

/// Runtime knobs for [`Earbug`]
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Bound on each fetch and blob write
    pub operation_timeout: Duration,
    /// Recent plays requested per update
    pub fetch_limit: u32,
    /// Publish a snapshot after every successful update
    pub persist_on_update: bool,
    /// Client id applied to actors whose store has none
    pub seed_client_id: String,
    /// Client secret applied to actors whose store has none
    pub seed_client_secret: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(30),
            fetch_limit: MAX_FETCH_LIMIT,
            persist_on_update: false,
            seed_client_id: String::new(),
            seed_client_secret: String::new(),
        }
    }
}

type ActorSlot = Arc<OnceCell<Arc<Actor>>>;

/// Blob key holding `actor`'s snapshot
pub fn snapshot_key(actor: &str) -> String {
    format!("{}{}", actor, SNAPSHOT_SUFFIX)
}

/// Actor names are limited to ASCII letters, digits, `_` and `-`
fn validate_actor(actor: &str) -> Result<()> {
    if actor.is_empty() {
        return Err(Error::InvalidInput("actor must not be empty".to_string()));
    }
    if !actor
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(Error::InvalidInput(format!("invalid actor name: {:?}", actor)));
    }
    validate_key(&snapshot_key(actor))
}

async fn bounded<T, F>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| Error::Timeout(format!("{} timed out after {:?}", what, limit)))?
}

/// Listening history service
pub struct Earbug {
    blob: Arc<dyn BlobStore>,
    auth: AuthTokenManager,
    actors: Mutex<HashMap<String, ActorSlot>>,
    updates: Coalescer<IngestStats>,
    exports: Coalescer<Vec<u8>>,
    config: ServiceConfig,
}

impl Earbug {
    pub fn new(blob: Arc<dyn BlobStore>, authorizer: Arc<dyn Authorizer>, config: ServiceConfig) -> Self {
        Self {
            blob,
            auth: AuthTokenManager::new(authorizer),
            actors: Mutex::new(HashMap::new()),
            updates: Coalescer::new(),
            exports: Coalescer::new(),
            config,
        }
    }

    fn slot(&self, name: &str) -> ActorSlot {
        let mut actors = self.actors.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(actors.entry(name.to_string()).or_default())
    }

    fn loaded(&self, name: &str) -> Option<Arc<Actor>> {
        let actors = self.actors.lock().unwrap_or_else(PoisonError::into_inner);
        actors.get(name).and_then(|slot| slot.get()).map(Arc::clone)
    }

    async fn read_snapshot(&self, name: &str) -> Result<Option<Store>> {
        bounded(
            self.config.operation_timeout,
            "snapshot load",
            codec::read_snapshot(self.blob.as_ref(), &snapshot_key(name)),
        )
        .await
    }

    /// Get an actor, creating an empty one when no snapshot exists
    pub async fn actor(&self, name: &str) -> Result<Arc<Actor>> {
        validate_actor(name)?;

        self.slot(name)
            .get_or_try_init(|| async {
                let found = self.read_snapshot(name).await?;
                Ok(self.build_actor(name, found))
            })
            .await
            .map(Arc::clone)
    }

    /// Get an actor that is loaded or has a snapshot; never creates one
    pub async fn existing_actor(&self, name: &str) -> Result<Arc<Actor>> {
        validate_actor(name)?;
        if let Some(actor) = self.loaded(name) {
            return Ok(actor);
        }

        let store = self
            .read_snapshot(name)
            .await?
            .ok_or_else(|| Error::NotFound(format!("unknown actor: {}", name)))?;

        // A concurrent load may have won; its actor is kept and `store` dropped
        self.slot(name)
            .get_or_try_init(|| async move { Ok(self.build_actor(name, Some(store))) })
            .await
            .map(Arc::clone)
    }

    fn build_actor(&self, name: &str, found: Option<Store>) -> Arc<Actor> {
        let persisted = found.is_some();
        let mut store = found.unwrap_or_else(|| {
            debug!(actor = %name, "No snapshot found, starting with an empty store");
            Store::new()
        });

        if store.auth.client_id.is_empty() && !self.config.seed_client_id.is_empty() {
            store.auth.client_id = self.config.seed_client_id.clone();
        }
        if store.auth.client_secret.is_empty() && !self.config.seed_client_secret.is_empty() {
            store.auth.client_secret = self.config.seed_client_secret.clone();
        }

        let source = match self.auth.restore(name, &store) {
            Ok(source) => source,
            Err(e) => {
                // The history is still usable; the actor just needs re-authorization
                warn!(actor = %name, error = %e, "Stored credential unusable");
                None
            }
        };

        info!(actor = %name, persisted, "Actor loaded");
        let actor = Actor::new(name, snapshot_key(name), store, source);
        if persisted {
            actor.mark_persisted();
        }
        Arc::new(actor)
    }

    /// Names of actors loaded so far
    pub fn loaded_actors(&self) -> Vec<String> {
        let actors = self.actors.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = actors
            .iter()
            .filter(|(_, slot)| slot.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Fetch recent plays and merge them into the actor's store
    ///
    /// Concurrent updates for the same actor share one fetch.
    pub async fn update(&self, actor: &str) -> Result<IngestStats> {
        let actor = self.existing_actor(actor).await?;
        let blob = Arc::clone(&self.blob);
        let limit = self.config.fetch_limit;
        let timeout = self.config.operation_timeout;
        let persist = self.config.persist_on_update;
        let key = actor.name().to_string();

        self.updates
            .run(&key, move || async move {
                let source = actor.source().await?;
                let events = bounded(timeout, "fetch", source.fetch_recent(limit)).await?;
                let stats = actor.ingest(&events).await;
                info!(
                    actor = %actor.name(),
                    fetched = events.len(),
                    added_playbacks = stats.added_playbacks,
                    added_tracks = stats.added_tracks,
                    total_playbacks = stats.total_playbacks,
                    total_tracks = stats.total_tracks,
                    "Update complete"
                );

                if persist {
                    bounded(
                        timeout,
                        "snapshot write",
                        actor.publish(blob.as_ref(), actor.snapshot_key()),
                    )
                    .await?;
                }
                Ok(stats)
            })
            .await
    }

    /// Produce a snapshot, publishing it under `destination` when given
    ///
    /// Returns the compressed snapshot bytes either way.
    pub async fn export(&self, actor: &str, destination: Option<&str>) -> Result<Vec<u8>> {
        if let Some(dest) = destination {
            validate_key(dest)?;
        }
        let actor = self.existing_actor(actor).await?;
        let blob = Arc::clone(&self.blob);
        let timeout = self.config.operation_timeout;
        let destination = destination.map(str::to_string);
        let key = match &destination {
            Some(dest) => format!("{}\u{0}{}", actor.name(), dest),
            None => actor.name().to_string(),
        };

        self.exports
            .run(&key, move || async move {
                let Some(dest) = destination else {
                    return actor.snapshot().await;
                };
                let bytes = bounded(timeout, "snapshot write", actor.publish(blob.as_ref(), &dest)).await?;
                info!(actor = %actor.name(), key = %dest, bytes = bytes.len(), "Snapshot exported");
                Ok(bytes)
            })
            .await
    }

    /// Publish the actor's snapshot under its own key
    pub async fn persist(&self, actor: &str) -> Result<Vec<u8>> {
        self.export(actor, Some(&snapshot_key(actor))).await
    }

    /// Persist every loaded actor; failures are logged and counted
    ///
    /// Actors that hold nothing and were never persisted are skipped.
    pub async fn export_all(&self) -> usize {
        let mut failures = 0;
        for name in self.loaded_actors() {
            let Some(actor) = self.loaded(&name) else {
                continue;
            };
            if !actor.is_persisted() && actor.is_empty().await {
                debug!(actor = %name, "Nothing to export");
                continue;
            }
            if let Err(e) = self.persist(&name).await {
                error!(actor = %name, error = %e, "Export failed");
                failures += 1;
            }
        }
        failures
    }

    /// Ordered, filtered playbacks with derived playback time
    pub async fn report(&self, actor: &str, filter: &PlaybackFilter) -> Result<Vec<PlaybackView>> {
        let actor = self.existing_actor(actor).await?;
        Ok(actor.playbacks(filter).await)
    }

    pub async fn artists(
        &self,
        actor: &str,
        filter: &PlaybackFilter,
        metric: SortMetric,
    ) -> Result<Vec<ArtistSummary>> {
        let plays = self.report(actor, filter).await?;
        Ok(report::artist_report(&plays, metric))
    }

    pub async fn tracks(
        &self,
        actor: &str,
        filter: &PlaybackFilter,
        metric: SortMetric,
    ) -> Result<Vec<TrackSummary>> {
        let plays = self.report(actor, filter).await?;
        Ok(report::track_report(&plays, metric))
    }

    /// Start an authorization; returns the URL to redirect the user to
    pub async fn authorize(
        &self,
        actor: &str,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Result<String> {
        let actor = self.actor(actor).await?;
        self.auth
            .authorize(&actor, client_id.unwrap_or_default(), client_secret.unwrap_or_default())
            .await
    }

    /// Complete an authorization and persist the new credential
    pub async fn callback(&self, actor: &str, state: &str, code: &str) -> Result<()> {
        let handle = self.existing_actor(actor).await.map_err(|e| match e {
            Error::NotFound(_) => Error::Auth(format!("no authorization pending for {}", actor)),
            e => e,
        })?;
        self.auth.callback(&handle, state, code).await?;

        if let Err(e) = self.persist(actor).await {
            // The credential is live in memory; the next export retries
            warn!(actor = %actor, error = %e, "Failed to persist new credential");
        }
        Ok(())
    }
}
