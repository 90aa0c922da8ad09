use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::ConnectionListener;
use super::ConnectionMonitor;
use super::LockManager;
use super::LockOwner;
use super::Namespace;
use super::Registry;
use super::SessionManager;
use super::SharedListeners;
use super::SubscribeListener;
use super::WatchLoop;
use crate::constants::PATH_SEPARATOR;
use crate::metrics;
use crate::utils::async_task::spawn_task;
use crate::ConsulStore;
use crate::CoordinationStore;
use crate::Error;
use crate::MemoryStore;
use crate::RegistrySettings;
use crate::Result;
use crate::SessionId;
use crate::StoreError;

pub type ConsulRegistry = StoreRegistry<ConsulStore>;
pub type MemoryRegistry = StoreRegistry<MemoryStore>;

struct PathWatch {
    listeners: SharedListeners,
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// [`Registry`] over any [`CoordinationStore`].
///
/// Owns one session for its whole life. Background loops (health probe,
/// session renewal, one watch per subscribed path, metrics exporter) hang off
/// a single cancellation token and are joined by [`Registry::close`].
pub struct StoreRegistry<S: CoordinationStore> {
    store: Arc<S>,
    settings: RegistrySettings,
    namespace: Namespace,
    session: Arc<SessionManager<S>>,
    monitor: Arc<ConnectionMonitor>,
    locks: LockManager<S>,
    watches: DashMap<String, PathWatch>,
    shutdown: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    closed: AtomicBool,
}

impl ConsulRegistry {
    /// Builds the Consul client from `settings.store` and opens a session.
    pub async fn connect(settings: RegistrySettings) -> Result<Self> {
        let settings = settings.validate()?;
        let store = ConsulStore::new(&settings.store)
            .map_err(|e| Error::registry("connect", settings.store.endpoint.clone(), e))?;
        Self::new(Arc::new(store), settings).await
    }
}

impl<S: CoordinationStore> StoreRegistry<S> {
    /// Validates `settings` and creates the session.
    ///
    /// # Errors
    /// [`Error::SessionCreation`] when the store refuses the session.
    pub async fn new(
        store: Arc<S>,
        settings: RegistrySettings,
    ) -> Result<Self> {
        let settings = settings.validate()?;
        let session = Arc::new(SessionManager::create(store.clone(), settings.session.clone()).await?);
        let locks = LockManager::new(store.clone(), session.id().clone(), settings.lock.retry_backoff());

        info!(namespace = %settings.store.namespace, session = %session.id(), "registry created");
        Ok(Self {
            namespace: Namespace::new(settings.store.namespace.clone()),
            store,
            settings,
            session,
            monitor: Arc::new(ConnectionMonitor::new()),
            locks,
            watches: DashMap::new(),
            shutdown: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        })
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.settings
    }

    pub(crate) fn session_id(&self) -> &SessionId {
        self.session.id()
    }

    #[cfg(test)]
    pub(crate) fn watch_count(&self) -> usize {
        self.watches.len()
    }

    #[cfg(test)]
    pub(crate) fn task_count(&self) -> usize {
        self.handles.lock().len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    fn track(
        &self,
        name: &str,
        task: impl std::future::Future<Output = Result<()>> + Send + 'static,
    ) {
        self.handles.lock().push(spawn_task(name, task));
    }

    async fn acquire(
        &self,
        key: &str,
        owner: &LockOwner,
        deadline: Option<Instant>,
    ) -> Result<bool> {
        self.ensure_open()?;
        self.locks
            .acquire(&self.namespace.apply(key), owner, deadline, &self.shutdown)
            .await
    }
}

/// First path segment of every key below `prefix`, without duplicates.
pub(crate) fn immediate_children(
    prefix: &str,
    keys: &[String],
) -> BTreeSet<String> {
    keys.iter()
        .filter_map(|key| key.strip_prefix(prefix))
        .filter_map(|rest| rest.split(PATH_SEPARATOR).next())
        .filter(|child| !child.is_empty())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl<S: CoordinationStore> Registry for StoreRegistry<S> {
    async fn start(&self) -> Result<()> {
        self.ensure_open()?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.track(
            "health_probe",
            self.monitor.clone().run_probe_loop(
                self.store.clone(),
                self.settings.health.clone(),
                self.shutdown.child_token(),
            ),
        );
        self.track(
            "session_renewal",
            self.session.clone().run_renewal_loop(self.shutdown.child_token()),
        );

        if self.settings.monitoring.prometheus_enabled {
            let port = self.settings.monitoring.prometheus_port;
            let shutdown = self.shutdown.child_token();
            self.track("metrics_exporter", async move {
                metrics::start_server(port, shutdown).await;
                Ok::<(), Error>(())
            });
        }

        info!(session = %self.session.id(), "registry started");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.monitor.is_connected()
    }

    async fn connect_until_timeout(
        &self,
        wait: Duration,
    ) -> Result<()> {
        self.ensure_open()?;
        // too far out to represent: wait without a deadline
        let deadline = Instant::now().checked_add(wait);
        let interval = self.settings.health.probe_interval();
        let remaining = || deadline.map(|d| d.saturating_duration_since(Instant::now()));

        loop {
            let reachable = match remaining() {
                Some(left) => matches!(timeout(left, self.store.ping()).await, Ok(Ok(()))),
                None => self.store.ping().await.is_ok(),
            };
            self.monitor.observe(reachable);
            if reachable {
                return Ok(());
            }

            let pause = match remaining() {
                Some(left) if left.is_zero() => {
                    warn!(timeout = ?wait, "registry still not connected");
                    return Err(Error::ConnectTimeout(wait));
                }
                Some(left) => interval.min(left),
                None => interval,
            };
            sleep(pause).await;
        }
    }

    async fn get(
        &self,
        key: &str,
    ) -> Result<String> {
        self.ensure_open()?;
        let entry = self
            .store
            .get(&self.namespace.apply(key))
            .await
            .map_err(|e| Error::registry("get", key, e))?;

        entry
            .and_then(|entry| entry.value)
            .ok_or_else(|| Error::NotFound(key.to_string()))
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
        delete_on_session_end: bool,
    ) -> Result<()> {
        self.ensure_open()?;
        let full_key = self.namespace.apply(key);

        if !delete_on_session_end {
            return self
                .store
                .put(&full_key, value)
                .await
                .map_err(|e| Error::registry("put", key, e));
        }

        let bound = self
            .store
            .acquire(&full_key, value, self.session.id())
            .await
            .map_err(|e| Error::registry("put", key, e))?;
        if !bound {
            return Err(Error::registry("put", key, StoreError::HeldByOtherSession(full_key)));
        }
        Ok(())
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<()> {
        self.ensure_open()?;
        self.store
            .delete(&self.namespace.apply(key))
            .await
            .map_err(|e| Error::registry("delete", key, e))
    }

    async fn exists(
        &self,
        key: &str,
    ) -> Result<bool> {
        self.ensure_open()?;
        let entry = self
            .store
            .get(&self.namespace.apply(key))
            .await
            .map_err(|e| Error::registry("exists", key, e))?;
        Ok(entry.is_some())
    }

    async fn children(
        &self,
        key: &str,
    ) -> Result<BTreeSet<String>> {
        self.ensure_open()?;
        let mut prefix = self.namespace.apply(key);
        if !key.is_empty() && !prefix.ends_with(PATH_SEPARATOR) {
            prefix.push(PATH_SEPARATOR);
        }

        let keys = self
            .store
            .keys(&prefix)
            .await
            .map_err(|e| Error::registry("children", key, e))?;
        Ok(immediate_children(&prefix, &keys))
    }

    async fn subscribe(
        &self,
        path: &str,
        listener: Arc<dyn SubscribeListener>,
    ) -> Result<()> {
        self.ensure_open()?;

        match self.watches.entry(path.to_string()) {
            Entry::Occupied(watch) => {
                watch.get().listeners.lock().push(listener);
                debug!(%path, "listener added to existing watch");
            }
            Entry::Vacant(slot) => {
                let listeners: SharedListeners = Arc::new(Mutex::new(vec![listener]));
                let shutdown = self.shutdown.child_token();
                let watch = WatchLoop {
                    store: self.store.clone(),
                    namespace: self.namespace.clone(),
                    path: path.to_string(),
                    listeners: listeners.clone(),
                    config: self.settings.watch.clone(),
                };

                let handle = spawn_task("watch", watch.run(shutdown.clone()));
                slot.insert(PathWatch {
                    listeners,
                    shutdown,
                    handle,
                });
                info!(%path, "watch started");
            }
        }
        Ok(())
    }

    async fn unsubscribe(
        &self,
        path: &str,
    ) -> Result<()> {
        if let Some((_, watch)) = self.watches.remove(path) {
            watch.shutdown.cancel();
            watch.listeners.lock().clear();
            if let Err(e) = watch.handle.await {
                warn!(%path, "watch task did not stop cleanly: {}", e);
            }
            info!(%path, "watch stopped");
        }
        Ok(())
    }

    fn add_connection_state_listener(
        &self,
        listener: Arc<dyn ConnectionListener>,
    ) {
        self.monitor.add_listener(listener);
    }

    async fn acquire_lock(
        &self,
        key: &str,
        owner: &LockOwner,
    ) -> Result<bool> {
        self.acquire(key, owner, None).await
    }

    async fn acquire_lock_timeout(
        &self,
        key: &str,
        owner: &LockOwner,
        timeout: Duration,
    ) -> Result<bool> {
        self.acquire(key, owner, Instant::now().checked_add(timeout)).await
    }

    async fn release_lock(
        &self,
        key: &str,
    ) -> Result<bool> {
        self.ensure_open()?;
        self.locks.release(&self.namespace.apply(key)).await
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.shutdown.cancel();

        let paths: Vec<String> = self.watches.iter().map(|w| w.key().clone()).collect();
        let mut handles: Vec<JoinHandle<()>> = self.handles.lock().drain(..).collect();
        for path in paths {
            if let Some((_, watch)) = self.watches.remove(&path) {
                watch.listeners.lock().clear();
                handles.push(watch.handle);
            }
        }
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("background task did not stop cleanly: {}", e);
            }
        }

        self.monitor.clear_listeners();
        self.session.destroy().await?;
        info!("registry closed");
        Ok(())
    }
}
