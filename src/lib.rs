//! Coordination registry client for master and worker nodes.
//!
//! A [`Registry`] gives a process namespaced key/value storage, prefix
//! subscriptions with add/remove/update events, session-bound distributed
//! locks and connection state notifications, all on top of one leased
//! session against an external coordination store.
//!
//! ```ignore
//! use std::sync::Arc;
//! use d_registry::{ConsulRegistry, LockOwner, Registry, RegistrySettings};
//!
//! let settings = RegistrySettings::new()?.validate()?;
//! let registry = ConsulRegistry::connect(settings).await?;
//! registry.start().await?;
//!
//! registry.put("nodes/master/10.0.0.1:5678", "{}", true).await?;
//! registry
//!     .subscribe("nodes/worker", Arc::new(|event: &d_registry::Event| println!("{event:?}")))
//!     .await?;
//!
//! let owner = LockOwner::new();
//! if registry.acquire_lock("lock/failover", &owner).await? {
//!     // ... leader work ...
//!     registry.release_lock("lock/failover").await?;
//! }
//! registry.close().await?;
//! ```

mod config;
mod constants;
mod errors;
mod metrics;
mod registry;
mod store;
mod utils;

pub use config::*;
pub use constants::PATH_SEPARATOR;
pub use errors::*;
pub use metrics::*;
pub use registry::*;
pub use store::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub(crate) mod test_utils;
