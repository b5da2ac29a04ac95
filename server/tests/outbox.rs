mod common;

use common::ctx;
use kazino_server::outbox::{append_event, spawn_tailer, EventBus, NewEvent};
use std::sync::Arc;
use std::time::Duration;

fn event(event_type: &str, aggregate_id: &str, version: i64) -> NewEvent {
    NewEvent {
        event_type: event_type.to_string(),
        aggregate_type: "crash".to_string(),
        aggregate_id: aggregate_id.to_string(),
        version,
        user_id: None,
        payload: serde_json::json!({ "v": version }),
    }
}

#[tokio::test]
async fn tailer_delivers_committed_events_in_insert_order() {
    let t = ctx().await;
    let bus = Arc::new(EventBus::new(1_000));
    let mut rx = bus.subscribe();
    spawn_tailer(t.pool.clone(), bus.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;

    for version in 1..=3 {
        append_event(&t.pool, event("crash.tick", "round1", version))
            .await
            .unwrap();
    }

    for expected in 1..=3 {
        let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("tailer delivered in time")
            .unwrap();
        assert_eq!(received.version, expected);
        assert_eq!(received.aggregate_id, "round1");
    }
}

#[tokio::test]
async fn rolled_back_events_are_never_published() {
    let t = ctx().await;
    let bus = Arc::new(EventBus::new(1_000));
    let mut rx = bus.subscribe();
    spawn_tailer(t.pool.clone(), bus.clone());
    tokio::time::sleep(Duration::from_millis(200)).await;

    {
        let mut tx = t.pool.begin().await.unwrap();
        append_event(&mut *tx, event("crash.tick", "doomed", 1))
            .await
            .unwrap();
        tx.rollback().await.unwrap();
    }
    append_event(&t.pool, event("crash.tick", "committed", 1))
        .await
        .unwrap();

    let received = tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("committed event delivered")
        .unwrap();
    // Only the committed row ever reaches the bus.
    assert_eq!(received.aggregate_id, "committed");
}
