use std::panic::catch_unwind;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::ConnectionListener;
use super::ConnectionState;
use crate::metrics::CONNECTION_STATE_TRANSITIONS;
use crate::metrics::LISTENER_PANICS;
use crate::CoordinationStore;
use crate::HealthConfig;
use crate::Result;

/// Next state to notify, given the last notified one and a probe result.
///
/// `None` means the probe did not change anything.
pub fn next_connection_state(
    last: Option<ConnectionState>,
    reachable: bool,
) -> Option<ConnectionState> {
    match (last, reachable) {
        (None, true) => Some(ConnectionState::Connected),
        (None, false) => Some(ConnectionState::Disconnected),
        (Some(ConnectionState::Disconnected), true) => Some(ConnectionState::Reconnected),
        (Some(ConnectionState::Connected | ConnectionState::Reconnected), false) => {
            Some(ConnectionState::Disconnected)
        }
        _ => None,
    }
}

/// Turns raw reachability into de-duplicated connection state notifications.
#[derive(Default)]
pub struct ConnectionMonitor {
    state: Mutex<Option<ConnectionState>>,
    listeners: Mutex<Vec<Arc<dyn ConnectionListener>>>,
    // held across notification so listeners see transitions in order
    notify_lock: Mutex<()>,
}

impl ConnectionMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<ConnectionState> {
        *self.state.lock()
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.current(),
            Some(ConnectionState::Connected | ConnectionState::Reconnected)
        )
    }

    pub fn add_listener(
        &self,
        listener: Arc<dyn ConnectionListener>,
    ) {
        self.listeners.lock().push(listener);
    }

    pub fn clear_listeners(&self) {
        self.listeners.lock().clear();
    }

    /// Feeds one probe result and returns the state it notified, if any.
    pub fn observe(
        &self,
        reachable: bool,
    ) -> Option<ConnectionState> {
        let _ordered = self.notify_lock.lock();
        let next = {
            let mut state = self.state.lock();
            let next = next_connection_state(*state, reachable)?;
            *state = Some(next);
            next
        };

        match next {
            ConnectionState::Disconnected => warn!("registry connection state: {}", next),
            _ => info!("registry connection state: {}", next),
        }
        CONNECTION_STATE_TRANSITIONS.with_label_values(&[next.as_str()]).inc();

        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener.on_update(next))).is_err() {
                error!(state = %next, "connection state listener panicked");
                LISTENER_PANICS.with_label_values(&["connection"]).inc();
            }
        }
        Some(next)
    }

    /// Probes `store` with a fixed delay between probes until cancelled.
    pub(crate) async fn run_probe_loop<S: CoordinationStore>(
        self: Arc<Self>,
        store: Arc<S>,
        config: HealthConfig,
        shutdown: CancellationToken,
    ) -> Result<()> {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            _ = sleep(config.initial_delay()) => {}
        }

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                result = store.ping() => {
                    if let Err(e) = &result {
                        debug!("registry probe failed: {}", e);
                    }
                    self.observe(result.is_ok());
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = sleep(config.probe_interval()) => {}
            }
        }
    }
}
