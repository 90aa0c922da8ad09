use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::LockOwner;
use crate::metrics::LOCK_ACQUIRED;
use crate::metrics::LOCK_ATTEMPT_FAILURES;
use crate::CoordinationStore;
use crate::Error;
use crate::Result;
use crate::SessionId;

/// Session-bound distributed locks with local re-entrancy.
///
/// Keys are full store keys. One mutex guards the holder map for every key
/// and stays locked across the store round trip, so two local callers never
/// both see themselves as first.
pub(crate) struct LockManager<S> {
    store: Arc<S>,
    session: SessionId,
    held: Mutex<HashMap<String, LockOwner>>,
    retry_backoff: Duration,
}

impl<S: CoordinationStore> LockManager<S> {
    pub(crate) fn new(
        store: Arc<S>,
        session: SessionId,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            store,
            session,
            held: Mutex::new(HashMap::new()),
            retry_backoff,
        }
    }

    /// One acquisition attempt.
    pub(crate) async fn try_lock(
        &self,
        key: &str,
        owner: &LockOwner,
    ) -> Result<bool> {
        let mut held = self.held.lock().await;
        if let Some(holder) = held.get(key) {
            return Ok(holder == owner);
        }

        let acquired = self
            .store
            .acquire(key, owner.as_str(), &self.session)
            .await
            .map_err(|e| Error::registry("acquire_lock", key, e))?;
        if acquired {
            held.insert(key.to_string(), owner.clone());
            LOCK_ACQUIRED.inc();
            debug!(%key, %owner, "lock acquired");
        }
        Ok(acquired)
    }

    /// Retries [`Self::try_lock`] every backoff until it succeeds, `deadline`
    /// passes (`Ok(false)`) or `shutdown` fires (`Err(Error::Closed)`).
    pub(crate) async fn acquire(
        &self,
        key: &str,
        owner: &LockOwner,
        deadline: Option<Instant>,
        shutdown: &CancellationToken,
    ) -> Result<bool> {
        loop {
            if shutdown.is_cancelled() {
                return Err(Error::Closed);
            }

            match self.try_lock(key, owner).await {
                Ok(true) => return Ok(true),
                Ok(false) => trace!(%key, %owner, "lock held elsewhere"),
                Err(e) => {
                    LOCK_ATTEMPT_FAILURES.inc();
                    warn!(%key, %owner, "lock attempt failed: {}", e);
                }
            }

            let pause = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(%key, %owner, "lock wait timed out");
                        return Ok(false);
                    }
                    self.retry_backoff.min(deadline - now)
                }
                None => self.retry_backoff,
            };

            tokio::select! {
                _ = shutdown.cancelled() => return Err(Error::Closed),
                _ = sleep(pause) => {}
            }
        }
    }

    /// Forgets the local holder and releases the store binding.
    ///
    /// Attempted even when nothing local holds `key`.
    pub(crate) async fn release(
        &self,
        key: &str,
    ) -> Result<bool> {
        let mut held = self.held.lock().await;
        let holder = held.remove(key);

        let released = self
            .store
            .release(key, &self.session)
            .await
            .map_err(|e| Error::registry("release_lock", key, e))?;
        debug!(%key, holder = ?holder, released, "lock released");
        Ok(released)
    }

    #[cfg(test)]
    pub(crate) async fn holder(
        &self,
        key: &str,
    ) -> Option<LockOwner> {
        self.held.lock().await.get(key).cloned()
    }
}
