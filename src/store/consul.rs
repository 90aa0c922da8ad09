//! Consul agent backend.
//!
//! Endpoints used:
//! - `GET  /v1/status/leader` liveness (an empty leader counts as unreachable)
//! - `PUT  /v1/session/{create,renew,destroy}` session lifecycle
//! - `GET|PUT|DELETE /v1/kv/<key>` key/value, with `?acquire=` / `?release=`
//! - `GET  /v1/kv/<prefix>?recurse&index=&wait=` blocking snapshot listing

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::Method;
use reqwest::RequestBuilder;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::Url;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::trace;

use super::CoordinationStore;
use super::KvEntry;
use super::Listing;
use super::SessionId;
use super::WaitQuery;
use crate::constants::CONSUL_INDEX_HEADER;
use crate::constants::CONSUL_TOKEN_HEADER;
use crate::constants::PATH_SEPARATOR;
use crate::StoreConfig;
use crate::StoreError;

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SessionCreateRequest<'a> {
    name: &'a str,
    #[serde(rename = "TTL")]
    ttl: String,
    behavior: &'a str,
}

#[derive(Deserialize)]
struct SessionCreateResponse {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ConsulKv {
    key: String,
    #[serde(default)]
    value: Option<String>,
    modify_index: u64,
    #[serde(default)]
    session: Option<String>,
}

impl ConsulKv {
    fn into_entry(self) -> Result<KvEntry, StoreError> {
        let value = match self.value {
            Some(encoded) => {
                let raw = STANDARD.decode(encoded.as_bytes())?;
                Some(String::from_utf8(raw).map_err(|e| StoreError::Decode(e.to_string()))?)
            }
            None => None,
        };
        Ok(KvEntry {
            key: self.key,
            value,
            modify_index: self.modify_index,
            session: self.session.map(SessionId),
        })
    }
}

/// [`CoordinationStore`] backed by a Consul agent
#[derive(Debug, Clone)]
pub struct ConsulStore {
    client: reqwest::Client,
    endpoint: Url,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    request_timeout: Duration,
}

impl ConsulStore {
    pub fn new(config: &StoreConfig) -> Result<Self, StoreError> {
        let endpoint = Url::parse(&config.endpoint)
            .map_err(|e| StoreError::InvalidEndpoint(format!("{}: {e}", config.endpoint)))?;
        if endpoint.cannot_be_a_base() {
            return Err(StoreError::InvalidEndpoint(config.endpoint.clone()));
        }
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            client,
            endpoint,
            username: config.username.clone(),
            password: config.password.clone(),
            token: config.token.clone(),
            request_timeout: config.request_timeout(),
        })
    }

    /// `<endpoint>/v1/<segments>`, each segment percent-encoded on its own.
    fn url<'a>(
        &self,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> Url {
        let mut url = self.endpoint.clone();
        // cannot fail, cannot-be-a-base endpoints are rejected in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push("v1").extend(segments);
        }
        url
    }

    fn request<'a>(
        &self,
        method: Method,
        segments: impl IntoIterator<Item = &'a str>,
    ) -> RequestBuilder {
        let url = self.url(segments);
        let mut builder = self.client.request(method, url).timeout(self.request_timeout);
        if let Some(username) = &self.username {
            builder = builder.basic_auth(username, self.password.as_ref());
        }
        if let Some(token) = &self.token {
            builder = builder.header(CONSUL_TOKEN_HEADER, token);
        }
        builder
    }

    fn kv(
        &self,
        method: Method,
        key: &str,
    ) -> RequestBuilder {
        // only the separator stays structural, `?`, `#` and `%` are escaped
        self.request(method, std::iter::once("kv").chain(key.split(PATH_SEPARATOR)))
    }

    async fn send(builder: RequestBuilder) -> Result<Response, StoreError> {
        let response = builder.send().await?;
        Self::check(response).await
    }

    async fn check(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(classify(status, body))
    }

    /// Sends and treats 404 as "nothing there".
    async fn send_optional(builder: RequestBuilder) -> Result<Option<Response>, StoreError> {
        match Self::send(builder).await {
            Ok(response) => Ok(Some(response)),
            Err(StoreError::Status { status: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Maps an error status to the store error taxonomy.
fn classify(
    status: StatusCode,
    body: String,
) -> StoreError {
    // Consul answers 500 "invalid session" for acquire/release with a dead session
    if status == StatusCode::INTERNAL_SERVER_ERROR && body.contains("invalid session") {
        return StoreError::SessionNotFound(body);
    }
    if status == StatusCode::SERVICE_UNAVAILABLE {
        return StoreError::Unavailable(body);
    }
    StoreError::Status {
        status: status.as_u16(),
        body,
    }
}

fn index_of(response: &Response) -> u64 {
    response
        .headers()
        .get(CONSUL_INDEX_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn go_duration(d: Duration) -> String {
    format!("{}ms", d.as_millis())
}

#[async_trait]
impl CoordinationStore for ConsulStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let response = Self::send(self.request(Method::GET, ["status", "leader"])).await?;
        let leader: String = response.json().await?;
        if leader.is_empty() {
            return Err(StoreError::Unavailable("cluster has no leader".to_string()));
        }
        trace!(%leader, "consul reachable");
        Ok(())
    }

    async fn create_session(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<SessionId, StoreError> {
        let body = SessionCreateRequest {
            name,
            ttl: format!("{}s", ttl.as_secs()),
            behavior: "delete",
        };
        let response = Self::send(self.request(Method::PUT, ["session", "create"]).json(&body)).await?;
        let created: SessionCreateResponse = response.json().await?;
        debug!(session = %created.id, name, "consul session created");
        Ok(SessionId(created.id))
    }

    async fn renew_session(
        &self,
        id: &SessionId,
    ) -> Result<(), StoreError> {
        match Self::send(self.request(Method::PUT, ["session", "renew", id.as_str()])).await {
            Ok(_) => Ok(()),
            Err(StoreError::Status { status: 404, .. }) => Err(StoreError::SessionNotFound(id.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn destroy_session(
        &self,
        id: &SessionId,
    ) -> Result<(), StoreError> {
        Self::send(self.request(Method::PUT, ["session", "destroy", id.as_str()])).await?;
        Ok(())
    }

    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<KvEntry>, StoreError> {
        let Some(response) = Self::send_optional(self.kv(Method::GET, key)).await? else {
            return Ok(None);
        };
        let entries: Vec<ConsulKv> = response.json().await?;
        entries.into_iter().next().map(ConsulKv::into_entry).transpose()
    }

    async fn put(
        &self,
        key: &str,
        value: &str,
    ) -> Result<(), StoreError> {
        Self::send(self.kv(Method::PUT, key).body(value.to_string())).await?;
        Ok(())
    }

    async fn acquire(
        &self,
        key: &str,
        value: &str,
        session: &SessionId,
    ) -> Result<bool, StoreError> {
        let builder = self
            .kv(Method::PUT, key)
            .query(&[("acquire", session.as_str())])
            .body(value.to_string());
        let acquired: bool = Self::send(builder).await?.json().await?;
        Ok(acquired)
    }

    async fn release(
        &self,
        key: &str,
        session: &SessionId,
    ) -> Result<bool, StoreError> {
        let builder = self.kv(Method::PUT, key).query(&[("release", session.as_str())]);
        let released: bool = Self::send(builder).await?.json().await?;
        Ok(released)
    }

    async fn delete(
        &self,
        key: &str,
    ) -> Result<(), StoreError> {
        Self::send(self.kv(Method::DELETE, key)).await?;
        Ok(())
    }

    async fn keys(
        &self,
        prefix: &str,
    ) -> Result<Vec<String>, StoreError> {
        let builder = self.kv(Method::GET, prefix).query(&[("keys", "")]);
        match Self::send_optional(builder).await? {
            Some(response) => Ok(response.json().await?),
            None => Ok(Vec::new()),
        }
    }

    async fn list(
        &self,
        prefix: &str,
        wait: Option<WaitQuery>,
    ) -> Result<Listing, StoreError> {
        let mut builder = self.kv(Method::GET, prefix).query(&[("recurse", "")]);
        if let Some(wait) = wait {
            // the agent may hold the query up to wait + wait/16
            builder = builder
                .query(&[("index", wait.index.to_string()), ("wait", go_duration(wait.timeout))])
                .timeout(self.request_timeout + wait.timeout + wait.timeout / 16);
        }

        let response = builder.send().await?;
        // an empty prefix is a 404 that still carries the index to block on
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Listing {
                index: index_of(&response),
                entries: Vec::new(),
            });
        }
        let response = Self::check(response).await?;

        let index = index_of(&response);
        let raw: Vec<ConsulKv> = response.json().await?;
        let entries = raw.into_iter().map(ConsulKv::into_entry).collect::<Result<Vec<_>, _>>()?;
        Ok(Listing { index, entries })
    }
}
