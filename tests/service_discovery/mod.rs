use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use d_registry::ConnectionState;
use d_registry::Event;
use d_registry::EventType;
use d_registry::MemoryStore;
use d_registry::Registry;

use crate::common::process;
use crate::common::Recorder;

const WORKERS: &str = "nodes/worker";

/// Master watches worker registrations come and go as workers start and
/// shut down.
#[tokio::test]
async fn test_master_sees_worker_lifecycle() {
    let store = Arc::new(MemoryStore::new());
    let master = process(&store).await;
    let worker = process(&store).await;
    let events = Recorder::<Event>::default();

    master.subscribe(WORKERS, events.subscriber()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    worker.put("nodes/worker/10.0.0.2:1234", "{\"load\":0.1}", true).await.unwrap();
    events.wait_for(1).await;
    worker.put("nodes/worker/10.0.0.2:1234", "{\"load\":0.9}", true).await.unwrap();
    events.wait_for(2).await;
    worker.close().await.unwrap();

    let seen = events.wait_for(3).await;
    let kinds: Vec<_> = seen.iter().map(|e| e.event_type).collect();
    assert_eq!(kinds, vec![EventType::Add, EventType::Update, EventType::Remove]);
    assert!(seen.iter().all(|e| e.key == "nodes/worker/10.0.0.2:1234" && e.path == WORKERS));
    assert_eq!(seen[1].data, "{\"load\":0.9}");

    master.close().await.unwrap();
}

#[tokio::test]
async fn test_children_lists_registered_workers() {
    let store = Arc::new(MemoryStore::new());
    let master = process(&store).await;
    let worker_a = process(&store).await;
    let worker_b = process(&store).await;

    worker_a.put("nodes/worker/a", "up", true).await.unwrap();
    worker_b.put("nodes/worker/b", "up", true).await.unwrap();
    worker_b.put("nodes/worker/b/heartbeat", "1", true).await.unwrap();

    let expected: BTreeSet<String> = ["a", "b"].iter().map(|s| s.to_string()).collect();
    assert_eq!(master.children(WORKERS).await.unwrap(), expected);

    worker_a.close().await.unwrap();
    let expected: BTreeSet<String> = ["b"].iter().map(|s| s.to_string()).collect();
    assert_eq!(master.children(WORKERS).await.unwrap(), expected);

    worker_b.close().await.unwrap();
    assert!(master.children(WORKERS).await.unwrap().is_empty());
    master.close().await.unwrap();
}

#[tokio::test]
async fn test_connection_listeners_follow_store_outage() {
    let store = Arc::new(MemoryStore::new());
    let master = process(&store).await;
    let states = Recorder::<ConnectionState>::default();
    master.add_connection_state_listener(states.connection_listener());
    master.start().await.unwrap();

    states.wait_for(1).await;
    store.set_available(false);
    states.wait_for(2).await;
    assert!(!master.is_connected());
    store.set_available(true);

    let seen = states.wait_for(3).await;
    assert_eq!(
        seen,
        vec![
            ConnectionState::Connected,
            ConnectionState::Disconnected,
            ConnectionState::Reconnected
        ]
    );
    assert!(master.is_connected());
    master.close().await.unwrap();
}

#[tokio::test]
async fn test_durable_keys_outlive_their_writer() {
    let store = Arc::new(MemoryStore::new());
    let writer = process(&store).await;
    let reader = process(&store).await;

    writer.put("config/alert", "on", false).await.unwrap();
    writer.close().await.unwrap();

    assert_eq!(reader.get("config/alert").await.unwrap(), "on");
    reader.delete("config/alert").await.unwrap();
    assert!(reader.get("config/alert").await.unwrap_err().is_not_found());
    reader.close().await.unwrap();
}
