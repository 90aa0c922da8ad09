/// Separator between hierarchy levels of a registry key.
pub const PATH_SEPARATOR: char = '/';

/// Consul rejects session TTLs outside of this window.
pub(crate) const MIN_SESSION_TTL_MS: u64 = 10_000;
pub(crate) const MAX_SESSION_TTL_MS: u64 = 86_400_000;

/// Session name prefix shown in the store UI.
pub(crate) const SESSION_NAME_PREFIX: &str = "d-registry";

/// Consul header carrying the store index of a listing.
pub(crate) const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";
pub(crate) const CONSUL_TOKEN_HEADER: &str = "X-Consul-Token";

/// Length of generated lock owner ids.
pub(crate) const OWNER_ID_LEN: usize = 16;
