use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::Encoder;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;


lazy_static! {
    pub static ref CONNECTION_STATE_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("registry_connection_state_transitions", "Notified connection state transitions"),
        &["state"]
    )
    .expect("metric can not be created");

    pub static ref SESSION_RENEW_FAILURES: IntCounter = IntCounter::new(
        "registry_session_renew_failures",
        "Failed session renewal attempts"
    )
    .expect("metric can not be created");

    pub static ref LOCK_ACQUIRED: IntCounter = IntCounter::new(
        "registry_lock_acquired",
        "Distributed locks acquired through the store"
    )
    .expect("metric can not be created");

    pub static ref LOCK_ATTEMPT_FAILURES: IntCounter = IntCounter::new(
        "registry_lock_attempt_failures",
        "Lock attempts that hit a store error"
    )
    .expect("metric can not be created");

    pub static ref WATCH_EVENTS: IntCounterVec = IntCounterVec::new(
        Opts::new("registry_watch_events", "Watch events delivered to subscribers"),
        &["type"]
    )
    .expect("metric can not be created");

    pub static ref LISTENER_PANICS: IntCounterVec = IntCounterVec::new(
        Opts::new("registry_listener_panics", "Listener callbacks that panicked"),
        &["listener"]
    )
    .expect("metric can not be created");

    static ref METRICS_REGISTRY: Registry = Registry::new();
}

static REGISTER: Once = Once::new();

fn register_custom_metrics(registry: &Registry) {
    registry
        .register(Box::new(CONNECTION_STATE_TRANSITIONS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(SESSION_RENEW_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(LOCK_ACQUIRED.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(LOCK_ATTEMPT_FAILURES.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(WATCH_EVENTS.clone()))
        .expect("collector can be registered");
    registry
        .register(Box::new(LISTENER_PANICS.clone()))
        .expect("collector can be registered");
}

/// Serves `GET /metrics` on `port` until `shutdown` fires.
pub async fn start_server(
    port: u16,
    shutdown: CancellationToken,
) {
    REGISTER.call_once(|| register_custom_metrics(&METRICS_REGISTRY));

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    let bound = warp::serve(metrics_route)
        .try_bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move { shutdown.cancelled().await });
    match bound {
        Ok((addr, server)) => {
            info!(%addr, "metrics exporter listening");
            server.await;
        }
        Err(e) => error!(port, "metrics exporter could not bind: {}", e),
    }
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_metrics(&METRICS_REGISTRY))
}

/// Text exposition of `registry`
pub fn gather_metrics(registry: &Registry) -> String {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    match String::from_utf8(buffer) {
        Ok(body) => body,
        Err(e) => {
            error!("custom metrics could not be from_utf8'd: {}", e);
            String::default()
        }
    }
}
