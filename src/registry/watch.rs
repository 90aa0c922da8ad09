//! Snapshot diffing behind prefix subscriptions.
//!
//! Stores such as Consul only hand out full snapshots of a prefix. The pieces
//! here turn successive snapshots into [`EventType::Add`],
//! [`EventType::Update`] and [`EventType::Remove`] changes:
//!
//! - [`diff_snapshots`] is the pure, backend-agnostic diff
//! - [`SnapshotTracker`] holds the baseline for one watched path
//! - `WatchLoop` drives blocking listings and delivers events to listeners

use std::collections::BTreeMap;
use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::Event;
use super::EventType;
use super::Namespace;
use super::SubscribeListener;
use crate::metrics::LISTENER_PANICS;
use crate::metrics::WATCH_EVENTS;
use crate::CoordinationStore;
use crate::KvEntry;
use crate::Result;
use crate::WaitQuery;
use crate::WatchConfig;

/// Value and modify index of one key as of a snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotEntry {
    pub value: Option<String>,
    pub modify_index: u64,
}

/// Full key to entry mapping of a watched prefix at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchSnapshot {
    entries: BTreeMap<String, SnapshotEntry>,
}

impl WatchSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: Option<String>,
        modify_index: u64,
    ) {
        self.entries.insert(key.into(), SnapshotEntry { value, modify_index });
    }

    pub fn get(
        &self,
        key: &str,
    ) -> Option<&SnapshotEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<KvEntry> for WatchSnapshot {
    fn from_iter<I: IntoIterator<Item = KvEntry>>(iter: I) -> Self {
        let mut snapshot = WatchSnapshot::new();
        for entry in iter {
            snapshot.insert(entry.key, entry.value, entry.modify_index);
        }
        snapshot
    }
}

/// One change between two snapshots, keyed by full store key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub key: String,
    pub data: String,
    pub event_type: EventType,
}

/// Adds and updates in key order, then removals in key order.
pub fn diff_snapshots(
    old: &WatchSnapshot,
    new: &WatchSnapshot,
) -> Vec<Change> {
    let mut changes = Vec::new();

    for (key, entry) in &new.entries {
        let event_type = match old.entries.get(key) {
            None => EventType::Add,
            Some(previous) if previous.modify_index != entry.modify_index => EventType::Update,
            Some(_) => continue,
        };
        changes.push(Change {
            key: key.clone(),
            data: entry.value.clone().unwrap_or_default(),
            event_type,
        });
    }

    for (key, entry) in &old.entries {
        if !new.entries.contains_key(key) {
            changes.push(Change {
                key: key.clone(),
                data: entry.value.clone().unwrap_or_default(),
                event_type: EventType::Remove,
            });
        }
    }

    changes
}

/// Baseline of one watched path.
///
/// The first snapshot only becomes the baseline; every later one is diffed
/// against the previous and replaces it.
#[derive(Debug, Default)]
pub struct SnapshotTracker {
    baseline: Option<WatchSnapshot>,
}

impl SnapshotTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_initialized(&self) -> bool {
        self.baseline.is_some()
    }

    pub fn refresh(
        &mut self,
        next: WatchSnapshot,
    ) -> Vec<Change> {
        let changes = match &self.baseline {
            Some(previous) => diff_snapshots(previous, &next),
            None => Vec::new(),
        };
        self.baseline = Some(next);
        changes
    }
}

pub(crate) type SharedListeners = Arc<Mutex<Vec<Arc<dyn SubscribeListener>>>>;

/// Blocking-query loop for one subscribed path
pub(crate) struct WatchLoop<S> {
    pub(crate) store: Arc<S>,
    pub(crate) namespace: Namespace,
    /// Namespace-relative path as subscribed
    pub(crate) path: String,
    pub(crate) listeners: SharedListeners,
    pub(crate) config: WatchConfig,
}

impl<S: CoordinationStore> WatchLoop<S> {
    pub(crate) async fn run(
        self,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let prefix = self.namespace.apply(&self.path);
        let mut tracker = SnapshotTracker::new();
        let mut index = 0u64;

        loop {
            let wait = tracker.is_initialized().then(|| WaitQuery {
                // a zero index would not block at all
                index: index.max(1),
                timeout: self.config.wait(),
            });

            let listing = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                listing = self.store.list(&prefix, wait) => listing,
            };

            let listing = match listing {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(path = %self.path, "watch refresh failed: {}", e);
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = sleep(self.config.retry_backoff()) => {}
                    }
                    continue;
                }
            };

            if tracker.is_initialized() && listing.index == index {
                trace!(path = %self.path, index, "watch wait timed out");
                continue;
            }
            if listing.index < index {
                debug!(path = %self.path, old = index, new = listing.index, "store index went backwards");
            }
            index = listing.index;

            let changes = tracker.refresh(listing.entries.into_iter().collect());
            if shutdown.is_cancelled() {
                return Ok(());
            }
            self.deliver(changes);
        }
    }

    fn deliver(
        &self,
        changes: Vec<Change>,
    ) {
        if changes.is_empty() {
            return;
        }
        // listeners may subscribe or unsubscribe from inside a callback
        let listeners = self.listeners.lock().clone();

        for change in changes {
            let event = Event {
                key: self.namespace.strip(&change.key).to_string(),
                path: self.path.clone(),
                data: change.data,
                event_type: change.event_type,
            };
            debug!(path = %event.path, key = %event.key, event_type = event.event_type.as_str(), "watch event");
            WATCH_EVENTS.with_label_values(&[event.event_type.as_str()]).inc();

            for listener in &listeners {
                if catch_unwind(AssertUnwindSafe(|| listener.notify(&event))).is_err() {
                    error!(path = %event.path, key = %event.key, "subscribe listener panicked");
                    LISTENER_PANICS.with_label_values(&["subscribe"]).inc();
                }
            }
        }
    }
}
