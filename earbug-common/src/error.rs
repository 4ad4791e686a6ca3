//! Common error types for earbug
//!
//! Every variant carries a rendered message so the error is `Clone`: a
//! coalesced operation hands the same failure to each of its waiters.

use thiserror::Error;

/// Common result type for earbug operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds surfaced by the store, codec, coalescer and collaborators
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Fetch failure against the playback API; safe to retry later
    #[error("Playback source error: {0}")]
    TransientSource(String),

    /// Corrupt or incompatible snapshot / credential bytes
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Blob read or write failure (other than a missing key)
    #[error("Durability error: {0}")]
    Durability(String),

    /// Requested blob key does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing client credentials, missing token, or mismatched state
    #[error("Authorization error: {0}")]
    Auth(String),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid caller input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Operation exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Internal error (task panic, poisoned state)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True when the blob collaborator reported a missing key
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            Error::NotFound(err.to_string())
        } else {
            Error::Durability(err.to_string())
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
