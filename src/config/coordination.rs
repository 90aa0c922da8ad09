use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Connection health probing
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthConfig {
    /// Interval between two liveness probes (unit: milliseconds)
    #[serde(default = "default_probe_interval_ms")]
    pub probe_interval_ms: u64,

    /// Delay before the first probe (unit: milliseconds)
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: default_probe_interval_ms(),
            initial_delay_ms: default_initial_delay_ms(),
        }
    }
}

impl HealthConfig {
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }

    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.probe_interval_ms == 0 {
            return Err(Error::InvalidConfig("health probe_interval_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Distributed lock retry policy
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LockConfig {
    /// Fixed sleep between two acquisition attempts (unit: milliseconds)
    #[serde(default = "default_lock_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            retry_backoff_ms: default_lock_retry_backoff_ms(),
        }
    }
}

impl LockConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.retry_backoff_ms == 0 {
            return Err(Error::InvalidConfig("lock retry_backoff_ms must be > 0".into()));
        }
        Ok(())
    }
}

/// Prefix watch parameters
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatchConfig {
    /// How long one blocking query may park on the store (unit: seconds)
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,

    /// Sleep after a failed refresh before trying again (unit: milliseconds)
    #[serde(default = "default_watch_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            wait_secs: default_wait_secs(),
            retry_backoff_ms: default_watch_retry_backoff_ms(),
        }
    }
}

impl WatchConfig {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn validate(&self) -> Result<()> {
        // Consul caps blocking queries at 10 minutes
        if !(1..=600).contains(&self.wait_secs) {
            return Err(Error::InvalidConfig(format!(
                "watch wait_secs must be between 1 and 600, got {}",
                self.wait_secs
            )));
        }
        if self.retry_backoff_ms == 0 {
            return Err(Error::InvalidConfig("watch retry_backoff_ms must be > 0".into()));
        }
        Ok(())
    }
}

fn default_probe_interval_ms() -> u64 {
    500
}
fn default_initial_delay_ms() -> u64 {
    500
}
fn default_lock_retry_backoff_ms() -> u64 {
    500
}
fn default_wait_secs() -> u64 {
    10
}
fn default_watch_retry_backoff_ms() -> u64 {
    1000
}
