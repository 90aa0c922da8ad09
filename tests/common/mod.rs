use std::sync::Arc;
use std::time::Duration;

use d_registry::ConnectionState;
use d_registry::Event;
use d_registry::MemoryRegistry;
use d_registry::MemoryStore;
use d_registry::RegistrySettings;
use parking_lot::Mutex;
use tokio::time::Instant;

pub const WAIT_FOR_EVENTS: Duration = Duration::from_secs(3);

pub fn settings() -> RegistrySettings {
    let mut settings = RegistrySettings::default();
    settings.store.namespace = "it/".to_string();
    settings.health.probe_interval_ms = 20;
    settings.health.initial_delay_ms = 10;
    settings.lock.retry_backoff_ms = 20;
    settings.watch.wait_secs = 1;
    settings.watch.retry_backoff_ms = 20;
    settings
}

/// One more "process" against the shared store
pub async fn process(store: &Arc<MemoryStore>) -> MemoryRegistry {
    MemoryRegistry::new(store.clone(), settings())
        .await
        .expect("registry should open a session")
}

pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self { seen: self.seen.clone() }
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn seen(&self) -> Vec<T> {
        self.seen.lock().clone()
    }

    fn push(
        &self,
        item: T,
    ) {
        self.seen.lock().push(item);
    }

    pub async fn wait_for(
        &self,
        count: usize,
    ) -> Vec<T> {
        let deadline = Instant::now() + WAIT_FOR_EVENTS;
        while self.seen.lock().len() < count && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.seen()
    }
}

impl Recorder<Event> {
    pub fn subscriber(&self) -> Arc<dyn d_registry::SubscribeListener> {
        let recorder = self.clone();
        Arc::new(move |event: &Event| recorder.push(event.clone()))
    }
}

impl Recorder<ConnectionState> {
    pub fn connection_listener(&self) -> Arc<dyn d_registry::ConnectionListener> {
        let recorder = self.clone();
        Arc::new(move |state: ConnectionState| recorder.push(state))
    }
}
