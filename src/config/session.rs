use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::MAX_SESSION_TTL_MS;
use crate::constants::MIN_SESSION_TTL_MS;
use crate::Error;
use crate::Result;

/// Session lease configuration
///
/// The session is created once per registry and renewed every
/// `renew_interval_ms`. If renewal keeps failing the store expires the
/// session after `ttl_ms` and drops every session-bound key with it.
///
/// ```toml
/// [session]
/// ttl_ms = 30000
/// renew_interval_ms = 10000
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SessionConfig {
    /// Lease time-to-live in milliseconds
    ///
    /// Range: 10000-86400000 (the store rejects anything outside)
    /// Default: 30000
    #[serde(default = "default_ttl_ms")]
    pub ttl_ms: u64,

    /// Renewal cadence in milliseconds, strictly below `ttl_ms`
    ///
    /// Default: 10000
    #[serde(default = "default_renew_interval_ms")]
    pub renew_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_ttl_ms(),
            renew_interval_ms: default_renew_interval_ms(),
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn renew_interval(&self) -> Duration {
        Duration::from_millis(self.renew_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_SESSION_TTL_MS..=MAX_SESSION_TTL_MS).contains(&self.ttl_ms) {
            return Err(Error::InvalidConfig(format!(
                "session ttl_ms must be between {} and {}, got {}",
                MIN_SESSION_TTL_MS, MAX_SESSION_TTL_MS, self.ttl_ms
            )));
        }

        if self.renew_interval_ms == 0 || self.renew_interval_ms >= self.ttl_ms {
            return Err(Error::InvalidConfig(format!(
                "session renew_interval_ms must be in (0, ttl_ms={}), got {}",
                self.ttl_ms, self.renew_interval_ms
            )));
        }

        Ok(())
    }
}

fn default_ttl_ms() -> u64 {
    30_000
}

fn default_renew_interval_ms() -> u64 {
    10_000
}
