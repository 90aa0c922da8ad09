use std::sync::Arc;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::constants::SESSION_NAME_PREFIX;
use crate::metrics::SESSION_RENEW_FAILURES;
use crate::CoordinationStore;
use crate::Error;
use crate::Result;
use crate::SessionConfig;
use crate::SessionId;

/// Owns the one lease a registry holds against its store
pub(crate) struct SessionManager<S> {
    store: Arc<S>,
    id: SessionId,
    config: SessionConfig,
}

impl<S: CoordinationStore> SessionManager<S> {
    /// Creates the session; failing here is fatal for the registry.
    pub(crate) async fn create(
        store: Arc<S>,
        config: SessionConfig,
    ) -> Result<Self> {
        let name = format!("{}-{}", SESSION_NAME_PREFIX, std::process::id());
        let id = store
            .create_session(&name, config.ttl())
            .await
            .map_err(Error::SessionCreation)?;
        info!(session = %id, ttl_ms = config.ttl_ms, "registry session created");

        Ok(Self { store, id, config })
    }

    pub(crate) fn id(&self) -> &SessionId {
        &self.id
    }

    /// Renews, then sleeps one renew interval, until cancelled.
    ///
    /// A failed renewal is retried on the next cycle; if it keeps failing the
    /// store lets the session lapse after its TTL.
    pub(crate) async fn run_renewal_loop(
        self: Arc<Self>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                result = self.store.renew_session(&self.id) => match result {
                    Ok(()) => debug!(session = %self.id, "registry session renewed"),
                    Err(e) => {
                        SESSION_RENEW_FAILURES.inc();
                        warn!(session = %self.id, "registry session renewal failed: {}", e);
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = sleep(self.config.renew_interval()) => {}
            }
        }
    }

    pub(crate) async fn destroy(&self) -> Result<()> {
        self.store
            .destroy_session(&self.id)
            .await
            .map_err(|e| Error::registry("destroy_session", self.id.as_str(), e))?;
        info!(session = %self.id, "registry session destroyed");
        Ok(())
    }
}
