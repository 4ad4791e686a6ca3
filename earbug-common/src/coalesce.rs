//! Per-key execution gate
//!
//! [`Coalescer::run`] collapses concurrent calls that share a key into one
//! execution. The first caller starts the operation; callers arriving while it
//! is still running wait on the same execution and receive a clone of its
//! result, success or failure. Once it finishes the key is released, so the
//! next call starts a fresh execution.
//!
//! The operation runs on its own task. A caller that stops waiting does not
//! cancel the side effect for the others.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::{Error, Result};

type SharedResult<T> = Shared<BoxFuture<'static, Result<T>>>;
type InFlight<T> = Arc<Mutex<HashMap<String, SharedResult<T>>>>;

/// Coalesces concurrent operations per key; `T` is the typed result of one
/// call site (e.g. ingest stats, snapshot bytes)
pub struct Coalescer<T> {
    in_flight: InFlight<T>,
}

impl<T> Default for Coalescer<T> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

fn lock<T>(map: &Mutex<T>) -> MutexGuard<'_, T> {
    // The map only holds handles; a panic while holding it leaves it usable
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Releases the key when the operation task finishes, panics, or is dropped
struct Release<T> {
    in_flight: InFlight<T>,
    key: String,
}

impl<T> Drop for Release<T> {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.key);
    }
}

impl<T> Coalescer<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `operation` for `key`, or join the execution already in flight
    pub async fn run<F, Fut>(&self, key: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let execution = {
            let mut in_flight = lock(&self.in_flight);
            match in_flight.get(key) {
                Some(existing) => {
                    debug!(key = %key, "Joining in-flight operation");
                    existing.clone()
                }
                None => {
                    let release = Release {
                        in_flight: Arc::clone(&self.in_flight),
                        key: key.to_string(),
                    };
                    let fut = operation();
                    // The map lock is held until the entry is inserted, so the
                    // release below can never run before the insert
                    let handle = tokio::spawn(async move {
                        let _release = release;
                        fut.await
                    });
                    let execution = async move {
                        handle.await.unwrap_or_else(|e| {
                            Err(Error::Internal(format!("coalesced operation failed: {}", e)))
                        })
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(key.to_string(), execution.clone());
                    execution
                }
            }
        };

        execution.await
    }

    /// Whether an execution for `key` is currently running
    pub fn in_flight(&self, key: &str) -> bool {
        lock(&self.in_flight).contains_key(key)
    }
}
