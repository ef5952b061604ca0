//! Integration tests for the distributed lock

mod common;

use common::t0;
use persona_agent::{Clock, DistributedLock, FakeClock, InMemoryLockBackend, LockBackend, RedisLockBackend, SystemClock};
use std::sync::Arc;
use std::time::Duration;

fn memory_lock(clock: Arc<FakeClock>) -> Arc<DistributedLock> {
    let backend: Arc<dyn LockBackend> = Arc::new(InMemoryLockBackend::new(clock.clone()));
    Arc::new(DistributedLock::new(backend, clock))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_acquirers_single_winner() {
    let lock = memory_lock(Arc::new(FakeClock::new(t0())));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("timeline", Duration::from_secs(30)).await })
        })
        .collect();

    let mut winners = 0;
    for task in tasks {
        if task.await.unwrap().is_some() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn test_different_names_do_not_contend() {
    let lock = memory_lock(Arc::new(FakeClock::new(t0())));
    let a = lock.acquire("ingestion", Duration::from_secs(30)).await;
    let b = lock.acquire("learning", Duration::from_secs(30)).await;
    assert!(a.is_some() && b.is_some());
}

#[tokio::test]
async fn test_expired_lock_is_reacquired_and_stale_owner_fenced() {
    let clock = Arc::new(FakeClock::new(t0()));
    let lock = memory_lock(clock.clone());

    let mut stale = lock.acquire("learning", Duration::from_secs(10)).await.unwrap();
    assert!(lock.acquire("learning", Duration::from_secs(10)).await.is_none());

    clock.advance(Duration::from_secs(11));
    assert!(stale.is_expired(clock.now()));

    let fresh = lock.acquire("learning", Duration::from_secs(10)).await.unwrap();
    assert_ne!(fresh.owner_token, stale.owner_token);

    // The old owner can neither extend nor release the new owner's lock
    assert!(!lock.extend(&mut stale, Duration::from_secs(60)).await);
    assert!(!lock.release(stale).await);
    assert!(lock.acquire("learning", Duration::from_secs(10)).await.is_none());

    assert!(lock.release(fresh).await);
    assert!(lock.acquire("learning", Duration::from_secs(10)).await.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_redis_backend_when_configured() {
    let Ok(url) = std::env::var("REDIS_URL") else {
        return;
    };

    let backend: Arc<dyn LockBackend> = Arc::new(RedisLockBackend::new(&url).unwrap());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let prefix = format!("persona:test:{}:", uuid::Uuid::new_v4());
    let lock = Arc::new(DistributedLock::with_prefix(backend, clock, &prefix));
    assert_eq!(lock.backend_name(), "redis");

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire("timeline", Duration::from_secs(5)).await })
        })
        .collect();
    let mut handles = Vec::new();
    for task in tasks {
        if let Some(handle) = task.await.unwrap() {
            handles.push(handle);
        }
    }
    assert_eq!(handles.len(), 1);

    // Expiry on the server side
    let short = lock.acquire("short", Duration::from_millis(200)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;
    let next = lock.acquire("short", Duration::from_secs(5)).await.unwrap();
    assert!(!lock.release(short).await);
    assert!(lock.release(next).await);

    for handle in handles {
        assert!(lock.release(handle).await);
    }
}
