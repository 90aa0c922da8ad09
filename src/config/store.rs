use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::constants::PATH_SEPARATOR;
use crate::Error;
use crate::Result;

/// Where the coordination store lives and how to authenticate against it
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreConfig {
    /// Agent base URL, e.g. `http://127.0.0.1:8500`
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Prefix prepended to every logical key.
    /// Lets several deployments share one store without key collisions.
    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Basic auth user
    #[serde(default)]
    pub username: Option<String>,

    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,

    /// ACL token sent as `X-Consul-Token`
    #[serde(default)]
    pub token: Option<String>,

    /// Per request timeout in milliseconds (blocking queries add their wait on top)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            namespace: default_namespace(),
            username: None,
            password: None,
            token: None,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "store endpoint must be an http(s) URL, got `{}`",
                self.endpoint
            )));
        }

        if self.namespace.is_empty() {
            return Err(Error::InvalidConfig("store namespace cannot be empty".into()));
        }

        if self.namespace.starts_with(PATH_SEPARATOR) {
            return Err(Error::InvalidConfig(format!(
                "store namespace `{}` must not start with `{}`",
                self.namespace, PATH_SEPARATOR
            )));
        }

        if self.password.is_some() && self.username.is_none() {
            return Err(Error::InvalidConfig("store password set without username".into()));
        }

        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig("request_timeout_ms must be > 0".into()));
        }

        Ok(())
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_namespace() -> String {
    "d-registry/".to_string()
}

fn default_request_timeout_ms() -> u64 {
    3000
}
