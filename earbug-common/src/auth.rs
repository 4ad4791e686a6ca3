//! OAuth authorization flow
//!
//! The client registration and the serialized credential live in the actor's
//! [`Auth`](crate::model::Auth) record, so they are persisted with every
//! snapshot. The pending authorization (the `state` value handed to the
//! authorization server) lives next to the store under the same lock and is
//! never persisted: a restart invalidates unfinished authorizations.
//!
//! Only the most recent [`AuthTokenManager::authorize`] call can be completed.
//! A callback presenting the state of a superseded attempt is rejected.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::model::Store;
use crate::source::PlaybackSource;
use crate::store::Actor;
use crate::{Error, Result};

/// Random bytes in a state token
const STATE_BYTES: usize = 32;

/// Access tokens this close to expiry are treated as expired
const EXPIRY_LEEWAY_SECS: i64 = 30;

/// OAuth client registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

/// OAuth credential as stored in `Auth.token`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl OAuthToken {
    /// Whether the access token must be refreshed before use
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expiry {
            Some(expiry) => now + ChronoDuration::seconds(EXPIRY_LEEWAY_SECS) >= expiry,
            None => false,
        }
    }

    /// Serialize into the opaque bytes kept in the store
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| Error::Serialization(format!("encode token: {}", e)))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Serialization(format!("decode token: {}", e)))
    }
}

/// Authorization server collaborator
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// URL the user visits to grant access; `state` is echoed to the callback
    fn auth_url(&self, client: &ClientCredentials, state: &str) -> String;

    /// Exchange an authorization code for a credential
    async fn exchange(&self, client: &ClientCredentials, code: &str) -> Result<OAuthToken>;

    /// Build a playback source authenticated with `token`
    fn authenticated_source(
        &self,
        client: &ClientCredentials,
        token: OAuthToken,
    ) -> Arc<dyn PlaybackSource>;
}

/// An authorization started but not yet completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAuthorization {
    pub state: String,
    pub client: ClientCredentials,
}

/// Generate an opaque, URL-safe random state token
pub fn generate_state() -> String {
    let mut buf = [0u8; STATE_BYTES];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Drives the authorize/callback exchange for actors
#[derive(Clone)]
pub struct AuthTokenManager {
    authorizer: Arc<dyn Authorizer>,
}

impl AuthTokenManager {
    pub fn new(authorizer: Arc<dyn Authorizer>) -> Self {
        Self { authorizer }
    }

    /// Start an authorization and return the URL to send the user to
    ///
    /// Empty candidates keep the stored client id/secret; non-empty ones
    /// replace it. Fails if either is still empty afterwards.
    pub async fn authorize(
        &self,
        actor: &Actor,
        client_id: &str,
        client_secret: &str,
    ) -> Result<String> {
        let mut state = actor.lock().await;

        if !client_id.is_empty() {
            state.store.auth.client_id = client_id.to_string();
        }
        if !client_secret.is_empty() {
            state.store.auth.client_secret = client_secret.to_string();
        }

        let auth = &state.store.auth;
        if auth.client_id.is_empty() || auth.client_secret.is_empty() {
            return Err(Error::Auth("missing client id/secret".to_string()));
        }

        let client = ClientCredentials {
            client_id: auth.client_id.clone(),
            client_secret: auth.client_secret.clone(),
        };
        let pending = PendingAuthorization {
            state: generate_state(),
            client,
        };
        let url = self.authorizer.auth_url(&pending.client, &pending.state);

        if state.pending.replace(pending).is_some() {
            info!(actor = %actor.name(), "Superseding unfinished authorization");
        }
        info!(actor = %actor.name(), "Authorization started");
        Ok(url)
    }

    /// Complete the authorization started by the latest [`authorize`](Self::authorize)
    ///
    /// The token and the live playback source are swapped in one lock
    /// acquisition. If another authorization started while the code was being
    /// exchanged, the result is discarded and the newer attempt stays pending.
    pub async fn callback(&self, actor: &Actor, presented_state: &str, code: &str) -> Result<()> {
        let pending = {
            let mut state = actor.lock().await;
            match state.pending.take() {
                Some(p) if p.state == presented_state => p,
                Some(p) => {
                    // A mismatched callback must not cancel the real attempt
                    state.pending = Some(p);
                    warn!(actor = %actor.name(), "Rejected callback with stale or unknown state");
                    return Err(Error::Auth(
                        "authorization state mismatch, start a new authorization".to_string(),
                    ));
                }
                None => {
                    return Err(Error::Auth(
                        "no authorization pending, start a new authorization".to_string(),
                    ))
                }
            }
        };

        if code.is_empty() {
            return Err(Error::Auth("missing authorization code".to_string()));
        }

        let token = self.authorizer.exchange(&pending.client, code).await?;
        let token_bytes = token.to_bytes()?;
        let source = self.authorizer.authenticated_source(&pending.client, token);

        let mut state = actor.lock().await;
        if state.pending.is_some() {
            // Another authorize ran during the exchange; only its callback may install a token
            warn!(actor = %actor.name(), "Discarding token from superseded authorization");
            return Err(Error::Auth(
                "authorization superseded by a newer one, complete that one instead".to_string(),
            ));
        }
        state.store.auth.token = token_bytes;
        state.source = Some(source);
        info!(actor = %actor.name(), "Authorization completed");
        Ok(())
    }

    /// Rebuild the playback source from a loaded store's credential
    ///
    /// An empty credential is not an error; the actor simply cannot update
    /// until it is authorized.
    pub fn restore(&self, actor_name: &str, store: &Store) -> Result<Option<Arc<dyn PlaybackSource>>> {
        if store.auth.token.is_empty() {
            warn!(actor = %actor_name, "No auth token found");
            return Ok(None);
        }
        let token = OAuthToken::from_bytes(&store.auth.token)?;
        let client = ClientCredentials {
            client_id: store.auth.client_id.clone(),
            client_secret: store.auth.client_secret.clone(),
        };
        Ok(Some(self.authorizer.authenticated_source(&client, token)))
    }
}
