use std::sync::Arc;
use std::time::Duration;

use d_registry::Error;
use d_registry::LockOwner;
use d_registry::MemoryStore;
use d_registry::Registry;
use tokio::time::Instant;

use crate::common::process;

const FAILOVER_LOCK: &str = "lock/failover";

/// Two masters race for the failover lock: exactly one wins, the loser only
/// gets it once the winner lets go.
#[tokio::test]
async fn test_only_one_master_holds_the_lock() {
    let store = Arc::new(MemoryStore::new());
    let master_a = Arc::new(process(&store).await);
    let master_b = Arc::new(process(&store).await);

    let race = |master: Arc<d_registry::MemoryRegistry>| {
        tokio::spawn(async move {
            let acquired = master.acquire_lock(FAILOVER_LOCK, &LockOwner::new()).await;
            (acquired, Instant::now())
        })
    };
    let a = race(master_a.clone());
    let b = race(master_b.clone());

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(
        a.is_finished() ^ b.is_finished(),
        "exactly one master should hold the lock"
    );

    let (winner, loser, pending) = if a.is_finished() {
        (master_a, master_b, b)
    } else {
        (master_b, master_a, a)
    };
    let released_at = Instant::now();
    assert!(winner.release_lock(FAILOVER_LOCK).await.unwrap());

    let (acquired, at) = tokio::time::timeout(Duration::from_secs(2), pending)
        .await
        .expect("loser should take over")
        .unwrap();
    assert!(acquired.unwrap());
    assert!(at >= released_at);

    loser.close().await.unwrap();
    winner.close().await.unwrap();
}

/// A master that dies without releasing loses the lock with its session.
#[tokio::test]
async fn test_lock_follows_session_of_closed_holder() {
    let store = Arc::new(MemoryStore::new());
    let holder = process(&store).await;
    let standby = process(&store).await;

    assert!(holder.acquire_lock(FAILOVER_LOCK, &LockOwner::new()).await.unwrap());
    assert!(!standby
        .acquire_lock_timeout(FAILOVER_LOCK, &LockOwner::new(), Duration::from_millis(100))
        .await
        .unwrap());

    holder.close().await.unwrap();

    assert!(standby
        .acquire_lock_timeout(FAILOVER_LOCK, &LockOwner::new(), Duration::from_millis(500))
        .await
        .unwrap());
    standby.close().await.unwrap();
}

/// A holder that stops renewing its session is fenced off once the session
/// TTL lapses, without anyone releasing the lock.
#[tokio::test(start_paused = true)]
async fn test_unrenewed_session_releases_lock_after_ttl() {
    let store = Arc::new(MemoryStore::new());
    // never started, so its session is never renewed
    let stalled = process(&store).await;
    let standby = process(&store).await;
    standby.start().await.unwrap();

    assert!(stalled.acquire_lock(FAILOVER_LOCK, &LockOwner::new()).await.unwrap());

    let started = Instant::now();
    let acquired = standby
        .acquire_lock_timeout(FAILOVER_LOCK, &LockOwner::new(), Duration::from_secs(60))
        .await
        .unwrap();

    assert!(acquired);
    let ttl = Duration::from_millis(standby.settings().session.ttl_ms);
    assert!(started.elapsed() >= ttl - Duration::from_secs(1));
    assert!(started.elapsed() < ttl + Duration::from_secs(1));
    standby.close().await.unwrap();
}

#[tokio::test]
async fn test_closed_registry_rejects_lock_calls() {
    let store = Arc::new(MemoryStore::new());
    let master = process(&store).await;
    master.close().await.unwrap();

    assert!(matches!(
        master.acquire_lock(FAILOVER_LOCK, &LockOwner::new()).await,
        Err(Error::Closed)
    ));
    assert!(matches!(master.release_lock(FAILOVER_LOCK).await, Err(Error::Closed)));
}
