//! Configuration management for the registry client.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support
//! - Environment variable overrides
//! - Component-wise validation
mod coordination;
mod monitoring;
mod session;
mod store;
pub use coordination::*;
pub use monitoring::*;
pub use session::*;
pub use store::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "REGISTRY";

/// Main configuration container for a registry instance
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables with `REGISTRY__` prefix (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct RegistrySettings {
    /// Backing store endpoint, namespace and credentials
    #[serde(default)]
    pub store: StoreConfig,
    /// Session lease parameters
    #[serde(default)]
    pub session: SessionConfig,
    /// Connection health probing
    #[serde(default)]
    pub health: HealthConfig,
    /// Distributed lock retry policy
    #[serde(default)]
    pub lock: LockConfig,
    /// Prefix watch parameters
    #[serde(default)]
    pub watch: WatchConfig,
    /// Metrics exporter
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Debug for RegistrySettings {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        // credentials intentionally left out
        f.debug_struct("RegistrySettings")
            .field("endpoint", &self.store.endpoint)
            .field("namespace", &self.store.namespace)
            .field("session", &self.session)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}

impl RegistrySettings {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `REGISTRY__` prefix (highest priority)
    ///
    /// # Note
    /// Callers MUST call `validate()` once all overrides are applied.
    ///
    /// # Examples
    /// ```ignore
    /// std::env::set_var("REGISTRY__STORE__ENDPOINT", "http://consul:8500");
    /// let settings = RegistrySettings::new()?.validate()?;
    /// ```
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates every section and returns the validated instance.
    pub fn validate(self) -> Result<Self> {
        self.store.validate()?;
        self.session.validate()?;
        self.health.validate()?;
        self.lock.validate()?;
        self.watch.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
