mod common;

use common::ctx;
use kazino_server::error::ErrorCode;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;

#[tokio::test]
async fn acquire_and_release() {
    let t = ctx().await;
    let lease = t.locks.acquire("k1", 1_000, 5_000).await.unwrap();
    assert_eq!(lease.key, "k1");
    t.locks.release(&lease).await.unwrap();
    // Released lease is immediately reusable.
    let lease2 = t.locks.acquire("k1", 500, 5_000).await.unwrap();
    assert_ne!(lease.owner_id, lease2.owner_id);
    t.locks.release(&lease2).await.unwrap();
    // Release is idempotent.
    t.locks.release(&lease2).await.unwrap();
}

#[tokio::test]
async fn contender_times_out_while_held() {
    let t = ctx().await;
    let held = t.locks.acquire("k2", 1_000, 30_000).await.unwrap();

    let err = t.locks.acquire("k2", 300, 30_000).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::LockTimeout);
    assert!(err.retryable);

    t.locks.release(&held).await.unwrap();
}

#[tokio::test]
async fn expired_lease_is_taken_over() {
    let t = ctx().await;
    let stale = t.locks.acquire("k3", 1_000, 50).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(80)).await;

    // TTL lapsed; a new contender seizes the same row.
    let fresh = t.locks.acquire("k3", 1_000, 5_000).await.unwrap();
    assert_ne!(stale.owner_id, fresh.owner_id);

    // The old holder no longer owns the lock.
    let err = t.locks.renew(&stale, 5_000).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    t.locks.release(&fresh).await.unwrap();
}

#[tokio::test]
async fn renew_extends_a_live_lease() {
    let t = ctx().await;
    let lease = t.locks.acquire("k4", 1_000, 5_000).await.unwrap();
    let renewed = t.locks.renew(&lease, 10_000).await.unwrap();
    assert!(renewed.expires_at >= lease.expires_at);
    t.locks.release(&renewed).await.unwrap();
}

#[tokio::test]
async fn contenders_serialize_without_overlap() {
    let t = ctx().await;
    let in_section = Arc::new(AtomicI32::new(0));
    let max_seen = Arc::new(AtomicI32::new(0));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let locks = t.locks.clone();
        let in_section = in_section.clone();
        let max_seen = max_seen.clone();
        tasks.push(tokio::spawn(async move {
            let lease = locks.acquire("hot", 8_000, 5_000).await.unwrap();
            let inside = in_section.fetch_add(1, Ordering::SeqCst) + 1;
            max_seen.fetch_max(inside, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            in_section.fetch_sub(1, Ordering::SeqCst);
            locks.release(&lease).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    // Exactly one holder at a time.
    assert_eq!(max_seen.load(Ordering::SeqCst), 1);
}
