//! Backing coordination stores.
//!
//! [`CoordinationStore`] is the capability set the registry needs from an
//! external store: leased sessions, a flat key/value space with session-bound
//! keys, and full-snapshot prefix listings that can block until the store
//! index moves. Key arguments are always full, namespaced keys; namespace
//! handling lives above this layer.
//!
//! - [`ConsulStore`] talks to a Consul agent over its HTTP API
//! - [`MemoryStore`] keeps everything in-process with the same semantics

mod consul;
mod memory;
pub use consul::*;
pub use memory::*;


use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use serde::Deserialize;
use serde::Serialize;

use crate::StoreError;

/// Identifier of a leased session issued by the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(id: &str) -> Self {
        SessionId(id.to_string())
    }
}

/// One stored key with its store-side bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    /// `None` when the key exists without payload (e.g. a folder marker)
    pub value: Option<String>,
    /// Store index of the last write to this key
    pub modify_index: u64,
    /// Session currently holding the key, if any
    pub session: Option<SessionId>,
}

/// Parameters of a blocking listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitQuery {
    /// Return as soon as the store index is greater than this
    pub index: u64,
    /// Give up waiting after this long and return the current snapshot
    pub timeout: Duration,
}

/// Full snapshot of a prefix at a store index
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Listing {
    pub index: u64,
    pub entries: Vec<KvEntry>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// One cheap liveness round trip; no retries.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Creates a session that deletes its held keys when it ends.
    async fn create_session(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<SessionId, StoreError>;

    async fn renew_session(
        &self,
        id: &SessionId,
    ) -> Result<(), StoreError>;

    async fn destroy_session(
        &self,
        id: &SessionId,
    ) -> Result<(), StoreError>;

    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<KvEntry>, StoreError>;

    /// Unconditional durable write.
    async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError>;

    /// Writes `value` and binds `key` to `session`.
    ///
    /// Returns `false` when a different session already holds the key.
    async fn acquire(
        &self,
        key: &str,
        value: &str,
        session: &SessionId,
    ) -> Result<bool, StoreError>;

    /// Detaches `session` from `key`, leaving the value in place.
    ///
    /// Returns `false` when `session` did not hold the key.
    async fn release(
        &self,
        key: &str,
        session: &SessionId,
    ) -> Result<bool, StoreError>;

    /// Removes `key`; absent keys are not an error.
    async fn delete(
        &self,
        key: &str,
    ) -> Result<(), StoreError>;

    /// Every full key starting with `prefix`.
    async fn keys(
        &self,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError>;

    /// Snapshot of every entry under `prefix`.
    ///
    /// With `wait`, blocks until the store index passes `wait.index` or the
    /// wait times out.
    async fn list(
        &self,
        prefix: &str,
        wait: Option<WaitQuery>,
    ) -> Result<Listing, StoreError>;
}
