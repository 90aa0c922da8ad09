//! A Consul agent double served by warp and backed by [`MemoryStore`].
//!
//! Implements only the HTTP surface [`crate::ConsulStore`] talks to, with
//! Consul's status codes and headers, so the HTTP codec can be exercised
//! end to end without a real agent.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::oneshot;
use warp::http::Method;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::hyper::Body;
use warp::path::Tail;
use warp::reply::Response;
use warp::Filter;

use crate::constants::CONSUL_INDEX_HEADER;
use crate::CoordinationStore;
use crate::KvEntry;
use crate::MemoryStore;
use crate::SessionId;
use crate::StoreError;
use crate::WaitQuery;

struct AgentState {
    store: Arc<MemoryStore>,
    required_token: Option<String>,
    last_authorization: Mutex<Option<String>>,
}

pub struct MockConsulAgent {
    pub store: Arc<MemoryStore>,
    addr: SocketAddr,
    state: Arc<AgentState>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl MockConsulAgent {
    /// Serves the agent on an ephemeral localhost port.
    ///
    /// With `required_token`, every request lacking a matching
    /// `X-Consul-Token` gets a 403.
    pub async fn start(
        store: Arc<MemoryStore>,
        required_token: Option<String>,
    ) -> Self {
        let state = Arc::new(AgentState {
            store: store.clone(),
            required_token,
            last_authorization: Mutex::new(None),
        });

        let handler_state = state.clone();
        let routes = warp::method()
            .and(warp::path("v1"))
            .and(warp::path::tail())
            .and(warp::query::<HashMap<String, String>>())
            .and(warp::header::optional::<String>("x-consul-token"))
            .and(warp::header::optional::<String>("authorization"))
            .and(warp::body::bytes())
            .and_then(
                move |method: Method,
                      tail: Tail,
                      query: HashMap<String, String>,
                      token: Option<String>,
                      authorization: Option<String>,
                      body: Bytes| {
                    let state = handler_state.clone();
                    async move {
                        *state.last_authorization.lock() = authorization;
                        Ok::<_, Infallible>(state.handle(method, tail.as_str(), query, token, body).await)
                    }
                },
            );

        let (tx, rx) = oneshot::channel::<()>();
        let (addr, server) = warp::serve(routes).bind_with_graceful_shutdown(([127, 0, 0, 1], 0), async move {
            rx.await.ok();
        });
        tokio::spawn(server);

        Self {
            store,
            addr,
            state,
            shutdown: Some(tx),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// `Authorization` header of the most recent request
    pub fn last_authorization(&self) -> Option<String> {
        self.state.last_authorization.lock().clone()
    }
}

impl Drop for MockConsulAgent {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

fn respond(
    status: StatusCode,
    body: String,
    index: Option<u64>,
) -> Response {
    let mut builder = warp::http::Response::builder().status(status);
    if let Some(index) = index {
        builder = builder.header(CONSUL_INDEX_HEADER, index.to_string());
    }
    builder.body(Body::from(body)).unwrap_or_default()
}

fn ok_json(value: serde_json::Value) -> Response {
    respond(StatusCode::OK, value.to_string(), None)
}

fn store_error(e: StoreError) -> Response {
    match e {
        StoreError::Unavailable(msg) => respond(StatusCode::SERVICE_UNAVAILABLE, msg, None),
        StoreError::SessionNotFound(id) => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("invalid session \"{id}\""),
            None,
        ),
        other => respond(StatusCode::INTERNAL_SERVER_ERROR, other.to_string(), None),
    }
}

fn kv_json(entry: &KvEntry) -> serde_json::Value {
    json!({
        "Key": entry.key,
        "Value": entry.value.as_ref().map(|v| STANDARD.encode(v.as_bytes())),
        "ModifyIndex": entry.modify_index,
        "CreateIndex": entry.modify_index,
        "LockIndex": 0,
        "Flags": 0,
        "Session": entry.session.as_ref().map(|s| s.0.clone()),
    })
}

/// Parses the subset of Go durations the client sends (`10s`, `500ms`).
fn parse_duration(raw: &str) -> Option<Duration> {
    if let Some(ms) = raw.strip_suffix("ms") {
        return ms.parse().ok().map(Duration::from_millis);
    }
    raw.strip_suffix('s')?.parse().ok().map(Duration::from_secs)
}

impl AgentState {
    async fn handle(
        &self,
        method: Method,
        path: &str,
        query: HashMap<String, String>,
        token: Option<String>,
        body: Bytes,
    ) -> Response {
        if self.required_token.is_some() && token != self.required_token {
            return respond(StatusCode::FORBIDDEN, "ACL not found".to_string(), None);
        }

        let store = &self.store;
        match (method, path) {
            (Method::GET, "status/leader") => {
                let leader = if store.is_available() { "127.0.0.1:8300" } else { "" };
                ok_json(json!(leader))
            }
            (Method::PUT, "session/create") => {
                let request: serde_json::Value = serde_json::from_slice(&body).unwrap_or_default();
                let name = request["Name"].as_str().unwrap_or("mock");
                let ttl = request["TTL"].as_str().and_then(parse_duration).unwrap_or(Duration::from_secs(10));
                match store.create_session(name, ttl).await {
                    Ok(id) => ok_json(json!({ "ID": id.0 })),
                    Err(e) => store_error(e),
                }
            }
            (Method::PUT, p) if p.starts_with("session/renew/") => {
                let id = SessionId::from(&p["session/renew/".len()..]);
                match store.renew_session(&id).await {
                    Ok(()) => ok_json(json!([{ "ID": id.0 }])),
                    Err(StoreError::SessionNotFound(_)) => {
                        respond(StatusCode::NOT_FOUND, format!("Session id '{id}' not found"), None)
                    }
                    Err(e) => store_error(e),
                }
            }
            (Method::PUT, p) if p.starts_with("session/destroy/") => {
                let id = SessionId::from(&p["session/destroy/".len()..]);
                match store.destroy_session(&id).await {
                    Ok(()) => ok_json(json!(true)),
                    Err(e) => store_error(e),
                }
            }
            // warp hands over the tail still percent-encoded
            (method, p) if p.starts_with("kv/") => match urlencoding::decode(&p["kv/".len()..]) {
                Ok(key) => self.handle_kv(method, &key, query, body).await,
                Err(e) => respond(StatusCode::BAD_REQUEST, e.to_string(), None),
            },
            _ => respond(StatusCode::NOT_FOUND, "unsupported endpoint".to_string(), None),
        }
    }

    async fn handle_kv(
        &self,
        method: Method,
        key: &str,
        query: HashMap<String, String>,
        body: Bytes,
    ) -> Response {
        let store = &self.store;
        let value = String::from_utf8_lossy(&body).to_string();

        match method {
            Method::GET if query.contains_key("keys") => match store.keys(key).await {
                Ok(keys) if keys.is_empty() => respond(StatusCode::NOT_FOUND, String::new(), Some(store.index())),
                Ok(keys) => respond(StatusCode::OK, json!(keys).to_string(), Some(store.index())),
                Err(e) => store_error(e),
            },
            Method::GET if query.contains_key("recurse") => {
                let wait = query.get("index").and_then(|i| i.parse().ok()).map(|index| WaitQuery {
                    index,
                    timeout: query
                        .get("wait")
                        .and_then(|w| parse_duration(w))
                        .unwrap_or(Duration::from_secs(300)),
                });
                match store.list(key, wait).await {
                    Ok(listing) if listing.entries.is_empty() => {
                        respond(StatusCode::NOT_FOUND, String::new(), Some(listing.index))
                    }
                    Ok(listing) => {
                        let body: Vec<_> = listing.entries.iter().map(kv_json).collect();
                        respond(StatusCode::OK, json!(body).to_string(), Some(listing.index))
                    }
                    Err(e) => store_error(e),
                }
            }
            Method::GET => match store.get(key).await {
                Ok(Some(entry)) => respond(
                    StatusCode::OK,
                    json!([kv_json(&entry)]).to_string(),
                    Some(entry.modify_index),
                ),
                Ok(None) => respond(StatusCode::NOT_FOUND, String::new(), Some(store.index())),
                Err(e) => store_error(e),
            },
            Method::PUT => {
                let result = if let Some(session) = query.get("acquire") {
                    store.acquire(key, &value, &SessionId::from(session.as_str())).await
                } else if let Some(session) = query.get("release") {
                    store.release(key, &SessionId::from(session.as_str())).await
                } else {
                    store.put(key, &value).await.map(|_| true)
                };
                match result {
                    Ok(done) => ok_json(json!(done)),
                    Err(e) => store_error(e),
                }
            }
            Method::DELETE => match store.delete(key).await {
                Ok(()) => ok_json(json!(true)),
                Err(e) => store_error(e),
            },
            _ => respond(StatusCode::METHOD_NOT_ALLOWED, String::new(), None),
        }
    }
}
