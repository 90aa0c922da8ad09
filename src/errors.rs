//! Registry Error Hierarchy
//!
//! Two layers, mirroring how a call crosses the crate:
//! - [`StoreError`]: what a backing coordination store reports for one round trip
//! - [`Error`]: what registry callers see, with the failed operation and key attached

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration loading or deserialization failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration value rejected by validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// `get` on a key that is absent or has no value payload
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Backing store failure on a key/value, watch or lock operation
    #[error("Registry {operation} failed for key `{key}`: {source}")]
    Registry {
        operation: &'static str,
        key: String,
        #[source]
        source: StoreError,
    },

    /// Unrecoverable: the registry cannot coordinate without a session
    #[error("Failed to create registry session: {0}")]
    SessionCreation(#[source] StoreError),

    /// Store stayed unreachable for the whole connect window
    #[error("Registry not connected after {0:?}")]
    ConnectTimeout(Duration),

    /// Operation interrupted because the registry was closed
    #[error("Registry is closed")]
    Closed,
}

impl Error {
    /// Wraps a store failure with the operation and key that triggered it
    pub(crate) fn registry(
        operation: &'static str,
        key: impl Into<String>,
        source: StoreError,
    ) -> Self {
        Error::Registry {
            operation,
            key: key.into(),
            source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Transport level failure talking to the store agent
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// Store answered with an unexpected status code
    #[error("Unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Store is not reachable or has no leader
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Key is bound to a different session
    #[error("Key held by another session: {0}")]
    HeldByOtherSession(String),

    /// Session id unknown to the store (expired or destroyed)
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Store endpoint is not a usable base URL
    #[error("Invalid store endpoint: {0}")]
    InvalidEndpoint(String),

    /// Response payload could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Decode(e.to_string())
    }
}

impl From<base64::DecodeError> for StoreError {
    fn from(e: base64::DecodeError) -> Self {
        StoreError::Decode(e.to_string())
    }
}
