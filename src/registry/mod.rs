//! The registry contract consumed by master and worker nodes.
//!
//! [`Registry`] is the only surface collaborators see: namespaced key/value
//! access, prefix subscriptions, connection state notifications and
//! session-bound distributed locks. [`StoreRegistry`] implements it over any
//! [`crate::CoordinationStore`] by composing:
//!
//! - [`ConnectionMonitor`]: probe loop and connection state machine
//! - `SessionManager`: the process-wide lease and its renewal loop
//! - [`Namespace`]: prefix mapping at every boundary crossing
//! - [`SnapshotTracker`]: snapshot diffing behind every subscribed path
//! - `LockManager`: session-bound locks with local re-entrancy

mod health;
mod lock;
mod namespace;
mod session;
mod store_registry;
mod watch;

pub use health::*;
pub(crate) use lock::*;
pub use namespace::*;
pub(crate) use session::*;
pub use store_registry::*;
pub use watch::*;


use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use nanoid::nanoid;

use crate::constants::OWNER_ID_LEN;
use crate::Result;

/// Kind of change observed under a watched path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Add,
    Remove,
    Update,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Add => "add",
            EventType::Remove => "remove",
            EventType::Update => "update",
        }
    }
}

/// One change delivered to a [`SubscribeListener`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Namespace-relative key of the entry that changed
    pub key: String,
    /// Namespace-relative path the listener subscribed to
    pub path: String,
    /// New value; the last known value for [`EventType::Remove`]
    pub data: String,
    pub event_type: EventType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connected,
    Disconnected,
    /// Only ever follows [`ConnectionState::Disconnected`]
    Reconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Reconnected => "reconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait SubscribeListener: Send + Sync {
    fn notify(
        &self,
        event: &Event,
    );
}

impl<F> SubscribeListener for F
where
    F: Fn(&Event) + Send + Sync,
{
    fn notify(
        &self,
        event: &Event,
    ) {
        self(event)
    }
}

pub trait ConnectionListener: Send + Sync {
    fn on_update(
        &self,
        state: ConnectionState,
    );
}

impl<F> ConnectionListener for F
where
    F: Fn(ConnectionState) + Send + Sync,
{
    fn on_update(
        &self,
        state: ConnectionState,
    ) {
        self(state)
    }
}

/// Identity of a local lock holder.
///
/// Re-acquiring a key already held by the same owner succeeds without a
/// store round trip; a different owner in the same process has to wait like
/// any remote contender.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockOwner(String);

impl LockOwner {
    /// Fresh random identity
    pub fn new() -> Self {
        LockOwner(nanoid!(OWNER_ID_LEN))
    }

    pub fn named(name: impl Into<String>) -> Self {
        LockOwner(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for LockOwner {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for LockOwner {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coordination contract shared by every backend.
///
/// All keys and paths are namespace-relative.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Starts the health probe and session renewal loops. Calling it again
    /// is a no-op.
    async fn start(&self) -> Result<()>;

    /// Whether the last observed connection state is connected or reconnected
    fn is_connected(&self) -> bool;

    /// Probes the store until it answers or `timeout` elapses.
    ///
    /// # Errors
    /// [`crate::Error::ConnectTimeout`] when the store never answered.
    async fn connect_until_timeout(
        &self,
        timeout: Duration,
    ) -> Result<()>;

    /// # Errors
    /// [`crate::Error::NotFound`] when the key or its value is absent.
    async fn get(
        &self,
        key: &str,
    ) -> Result<String>;

    /// Writes `value`; with `delete_on_session_end` the key is bound to this
    /// registry's session and vanishes when the session ends.
    async fn put(
        &self,
        key: &str,
        value: &str,
        delete_on_session_end: bool,
    ) -> Result<()>;

    /// Absent keys are not an error.
    async fn delete(
        &self,
        key: &str,
    ) -> Result<()>;

    async fn exists(
        &self,
        key: &str,
    ) -> Result<bool>;

    /// Immediate child names under `key`, one level deep.
    async fn children(
        &self,
        key: &str,
    ) -> Result<BTreeSet<String>>;

    /// Delivers every change under `path` to `listener`.
    ///
    /// Subscribing again to a watched path adds the listener to the existing
    /// watch.
    async fn subscribe(
        &self,
        path: &str,
        listener: Arc<dyn SubscribeListener>,
    ) -> Result<()>;

    /// Stops the watch on `path` and drops all of its listeners.
    async fn unsubscribe(
        &self,
        path: &str,
    ) -> Result<()>;

    fn add_connection_state_listener(
        &self,
        listener: Arc<dyn ConnectionListener>,
    );

    /// Blocks until `owner` holds `key`.
    ///
    /// # Errors
    /// [`crate::Error::Closed`] when the registry closes while waiting.
    async fn acquire_lock(
        &self,
        key: &str,
        owner: &LockOwner,
    ) -> Result<bool>;

    /// Like [`Registry::acquire_lock`] but gives up with `Ok(false)` after
    /// `timeout`.
    async fn acquire_lock_timeout(
        &self,
        key: &str,
        owner: &LockOwner,
        timeout: Duration,
    ) -> Result<bool>;

    /// Detaches the session from `key` and forgets the local holder.
    async fn release_lock(
        &self,
        key: &str,
    ) -> Result<bool>;

    /// Stops every background loop and destroys the session. Idempotent.
    async fn close(&self) -> Result<()>;
}
