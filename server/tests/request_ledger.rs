mod common;

use common::ctx;
use kazino_server::request_ledger::BeginOutcome;

#[tokio::test]
async fn fresh_request_starts_processing() {
    let t = ctx().await;
    let outcome = t.ledger.begin("u1", "r1", "dice.bet").await.unwrap();
    assert_eq!(outcome, BeginOutcome::Started);
}

#[tokio::test]
async fn in_flight_duplicate_is_reported() {
    let t = ctx().await;
    t.ledger.begin("u1", "r1", "dice.bet").await.unwrap();
    let outcome = t.ledger.begin("u1", "r1", "dice.bet").await.unwrap();
    assert_eq!(outcome, BeginOutcome::InProgress);
}

#[tokio::test]
async fn completed_request_replays_stored_bytes() {
    let t = ctx().await;
    t.ledger.begin("u1", "r1", "dice.bet").await.unwrap();

    let stored = r#"{"type":"dice.bet.result","requestId":"r1","ok":true,"data":{"roll":42.17}}"#;
    t.ledger.complete("u1", "r1", stored).await.unwrap();

    match t.ledger.begin("u1", "r1", "dice.bet").await.unwrap() {
        BeginOutcome::Completed(replayed) => assert_eq!(replayed, stored),
        other => panic!("expected completed replay, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_request_is_terminal() {
    let t = ctx().await;
    t.ledger.begin("u1", "r1", "dice.bet").await.unwrap();
    t.ledger.fail("u1", "r1").await.unwrap();

    let outcome = t.ledger.begin("u1", "r1", "dice.bet").await.unwrap();
    assert_eq!(outcome, BeginOutcome::Failed);
}

#[tokio::test]
async fn request_ids_are_scoped_per_user() {
    let t = ctx().await;
    t.ledger.begin("u1", "r1", "dice.bet").await.unwrap();
    // The same request id from another user is a fresh request.
    let outcome = t.ledger.begin("u2", "r1", "dice.bet").await.unwrap();
    assert_eq!(outcome, BeginOutcome::Started);
}
