//! In-process coordination store.
//!
//! Mirrors the Consul semantics the registry depends on:
//! - every mutation bumps one monotonically increasing store index, which
//!   starts at 1 so that waiting on index 0 never blocks
//! - sessions expire `ttl` after their last renewal; expiry and destruction
//!   delete every key the session holds
//! - blocking listings park until the index passes the caller's index
//!
//! Session expiry is evaluated lazily on each call (and while a blocking
//! listing waits), so no background task is needed.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::sleep_until;
use tokio::time::Instant;
use tracing::debug;
use tracing::trace;

use super::CoordinationStore;
use super::KvEntry;
use super::Listing;
use super::SessionId;
use super::WaitQuery;
use crate::StoreError;

#[derive(Debug)]
struct StoredValue {
    value: Option<String>,
    modify_index: u64,
    session: Option<SessionId>,
}

#[derive(Debug)]
struct SessionLease {
    name: String,
    ttl: Duration,
    expires_at: Instant,
}

#[derive(Debug)]
struct MemoryState {
    index: u64,
    entries: BTreeMap<String, StoredValue>,
    sessions: HashMap<SessionId, SessionLease>,
}

impl Default for MemoryState {
    fn default() -> Self {
        Self {
            index: 1,
            entries: BTreeMap::new(),
            sessions: HashMap::new(),
        }
    }
}

impl MemoryState {
    fn bump(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    /// Drops every lapsed session together with the keys it holds.
    /// Returns true when anything changed.
    fn reap_expired(
        &mut self,
        now: Instant,
    ) -> bool {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, lease)| lease.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();

        let mut changed = false;
        for id in expired {
            if let Some(lease) = self.sessions.remove(&id) {
                debug!(session = %id, name = %lease.name, "session expired");
            }
            changed |= self.drop_session_keys(&id);
        }
        changed
    }

    fn drop_session_keys(
        &mut self,
        id: &SessionId,
    ) -> bool {
        let before = self.entries.len();
        self.entries.retain(|_, v| v.session.as_ref() != Some(id));
        let removed = before - self.entries.len();
        if removed > 0 {
            trace!(session = %id, removed, "deleted session-bound keys");
            self.bump();
        }
        removed > 0
    }

    fn next_expiry(&self) -> Option<Instant> {
        self.sessions.values().map(|lease| lease.expires_at).min()
    }

    fn entry(
        &self,
        key: &str,
    ) -> Option<KvEntry> {
        self.entries.get(key).map(|v| KvEntry {
            key: key.to_string(),
            value: v.value.clone(),
            modify_index: v.modify_index,
            session: v.session.clone(),
        })
    }
}

/// In-memory [`CoordinationStore`]
#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    index_tx: watch::Sender<u64>,
    available: AtomicBool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (index_tx, _) = watch::channel(1);
        Self {
            state: Mutex::new(MemoryState::default()),
            index_tx,
            available: AtomicBool::new(true),
        }
    }

    /// Simulates an outage: while unavailable every call fails with
    /// [`StoreError::Unavailable`]. Sessions keep aging meanwhile.
    pub fn set_available(
        &self,
        available: bool,
    ) {
        self.available.store(available, Ordering::SeqCst);
        // wake blocking listings so they observe the outage
        self.index_tx.send_modify(|_| {});
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        let mut state = self.state.lock();
        self.reap(&mut state);
        state.sessions.len()
    }

    /// Current store index
    pub fn index(&self) -> u64 {
        self.state.lock().index
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.is_available() {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".to_string()))
        }
    }

    fn reap(
        &self,
        state: &mut MemoryState,
    ) {
        if state.reap_expired(Instant::now()) {
            self.publish(state.index);
        }
    }

    fn publish(
        &self,
        index: u64,
    ) {
        self.index_tx.send_replace(index);
    }

    fn snapshot(
        &self,
        prefix: &str,
    ) -> Listing {
        let mut state = self.state.lock();
        self.reap(&mut state);
        let entries = state
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| KvEntry {
                key: k.clone(),
                value: v.value.clone(),
                modify_index: v.modify_index,
                session: v.session.clone(),
            })
            .collect();
        Listing {
            index: state.index,
            entries,
        }
    }

    /// Parks until the index passes `wait.index`, the wait elapses or the
    /// store goes offline.
    async fn block_until_changed(
        &self,
        wait: WaitQuery,
    ) {
        let deadline = Instant::now() + wait.timeout;
        let mut rx = self.index_tx.subscribe();

        loop {
            // mark seen before reading state so a concurrent publish still wakes us
            let _ = rx.borrow_and_update();
            let (index, next_expiry) = {
                let mut state = self.state.lock();
                self.reap(&mut state);
                (state.index, state.next_expiry())
            };

            if index > wait.index || !self.is_available() || Instant::now() >= deadline {
                return;
            }

            let wake_at = next_expiry.map_or(deadline, |at| at.min(deadline));
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
                _ = sleep_until(wake_at) => {}
            }
        }
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_available()
    }

    async fn create_session(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<SessionId, StoreError> {
        self.check_available()?;
        let id = SessionId(nanoid::nanoid!());
        let mut state = self.state.lock();
        self.reap(&mut state);
        state.sessions.insert(
            id.clone(),
            SessionLease {
                name: name.to_string(),
                ttl,
                expires_at: Instant::now() + ttl,
            },
        );
        debug!(session = %id, name, ?ttl, "session created");
        Ok(id)
    }

    async fn renew_session(
        &self,
        id: &SessionId,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        self.reap(&mut state);
        match state.sessions.get_mut(id) {
            Some(lease) => {
                lease.expires_at = Instant::now() + lease.ttl;
                Ok(())
            }
            None => Err(StoreError::SessionNotFound(id.to_string())),
        }
    }

    async fn destroy_session(
        &self,
        id: &SessionId,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        self.reap(&mut state);
        if state.sessions.remove(id).is_some() {
            debug!(session = %id, "session destroyed");
        }
        if state.drop_session_keys(id) {
            self.publish(state.index);
        }
        Ok(())
    }

    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<KvEntry>, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        self.reap(&mut state);
        Ok(state.entry(key))
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        self.reap(&mut state);
        let index = state.bump();
        let session = state.entries.get(key).and_then(|v| v.session.clone());
        state.entries.insert(
            key.to_string(),
            StoredValue {
                value: Some(value.to_string()),
                modify_index: index,
                session,
            },
        );
        self.publish(index);
        Ok(())
    }

    async fn acquire(
        &self,
        key: &str,
        value: &str,
        session: &SessionId,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        self.reap(&mut state);

        if !state.sessions.contains_key(session) {
            return Err(StoreError::SessionNotFound(session.to_string()));
        }

        if let Some(existing) = state.entries.get(key) {
            if existing.session.as_ref().is_some_and(|holder| holder != session) {
                return Ok(false);
            }
        }

        let index = state.bump();
        state.entries.insert(
            key.to_string(),
            StoredValue {
                value: Some(value.to_string()),
                modify_index: index,
                session: Some(session.clone()),
            },
        );
        self.publish(index);
        Ok(true)
    }

    async fn release(
        &self,
        key: &str,
        session: &SessionId,
    ) -> Result<bool, StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        self.reap(&mut state);

        let held = state.entries.get(key).is_some_and(|v| v.session.as_ref() == Some(session));
        if !held {
            return Ok(false);
        }

        let index = state.bump();
        if let Some(entry) = state.entries.get_mut(key) {
            entry.session = None;
            entry.modify_index = index;
        }
        self.publish(index);
        Ok(true)
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<(), StoreError> {
        self.check_available()?;
        let mut state = self.state.lock();
        self.reap(&mut state);
        if state.entries.remove(key).is_some() {
            let index = state.bump();
            self.publish(index);
        }
        Ok(())
    }

    async fn keys(
        &self,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.check_available()?;
        Ok(self.snapshot(prefix).entries.into_iter().map(|e| e.key).collect())
    }

    async fn list(
        &self,
        prefix: &str,
        wait: Option<WaitQuery>,
    ) -> Result<Listing, StoreError> {
        self.check_available()?;
        if let Some(wait) = wait {
            self.block_until_changed(wait).await;
            self.check_available()?;
        }
        Ok(self.snapshot(prefix))
    }
}
