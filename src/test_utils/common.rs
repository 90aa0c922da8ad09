use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::ConnectionState;
use crate::Event;
use crate::RegistrySettings;

/// Settings with intervals short enough for unit tests
pub(crate) fn fast_settings() -> RegistrySettings {
    let mut settings = RegistrySettings::default();
    settings.store.namespace = "test-ns/".to_string();
    settings.health.probe_interval_ms = 20;
    settings.health.initial_delay_ms = 10;
    settings.lock.retry_backoff_ms = 20;
    settings.watch.wait_secs = 1;
    settings.watch.retry_backoff_ms = 20;
    settings
}

/// Subscribe listener that keeps every delivered event
#[derive(Default, Clone)]
pub(crate) struct EventCollector {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventCollector {
    pub(crate) fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub(crate) fn listener(&self) -> Arc<dyn crate::SubscribeListener> {
        let events = self.events.clone();
        Arc::new(move |event: &Event| events.lock().push(event.clone()))
    }

    /// Polls until at least `count` events arrived or `timeout` passed
    pub(crate) async fn wait_for(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<Event> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.events.lock().len() < count && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.events()
    }
}

/// Connection listener that keeps every notified state
#[derive(Default, Clone)]
pub(crate) struct StateRecorder {
    states: Arc<Mutex<Vec<ConnectionState>>>,
}

impl StateRecorder {
    pub(crate) fn states(&self) -> Vec<ConnectionState> {
        self.states.lock().clone()
    }

    pub(crate) fn listener(&self) -> Arc<dyn crate::ConnectionListener> {
        let states = self.states.clone();
        Arc::new(move |state: ConnectionState| states.lock().push(state))
    }
}
