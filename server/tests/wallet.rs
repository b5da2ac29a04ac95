mod common;

use common::{assert_ledger_conserved, balance_bonus, balance_main, ctx, ledger_rows, seed_user};
use kazino_server::error::ErrorCode;
use kazino_server::wallet::{BalanceKind, LedgerType, MutationParams};

fn debit(user_id: &str, amount: i64, request_id: Option<&str>) -> MutationParams {
    MutationParams {
        user_id: user_id.to_string(),
        request_id: request_id.map(String::from),
        ledger_type: LedgerType::GameBet,
        delta_main: -amount,
        delta_bonus: 0,
        metadata: serde_json::json!({}),
    }
}

#[tokio::test]
async fn mutation_updates_balance_and_ledger() {
    let t = ctx().await;
    let user = seed_user(&t.pool, "alice", 100_000_000).await;

    let snapshot = t.wallet.apply_mutation(debit(&user, 10_000_000, None)).await.unwrap();
    assert_eq!(snapshot.main, 90_000_000);
    assert_eq!(snapshot.state_version, 2);

    assert_eq!(balance_main(&t.pool, &user).await, 90_000_000);
    assert_eq!(ledger_rows(&t.pool, &user, "game_bet").await, 1);
    assert_ledger_conserved(&t.pool, &user).await;
}

#[tokio::test]
async fn insufficient_balance_leaves_state_untouched() {
    let t = ctx().await;
    let user = seed_user(&t.pool, "bob", 5_000_000).await;

    let err = t
        .wallet
        .apply_mutation(debit(&user, 10_000_000, None))
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InsufficientBalance);
    assert!(!err.retryable);

    assert_eq!(balance_main(&t.pool, &user).await, 5_000_000);
    assert_eq!(ledger_rows(&t.pool, &user, "game_bet").await, 0);
    assert_ledger_conserved(&t.pool, &user).await;
}

#[tokio::test]
async fn request_id_collapses_retries_to_one_effect() {
    let t = ctx().await;
    let user = seed_user(&t.pool, "carol", 100_000_000).await;

    let first = t
        .wallet
        .apply_mutation(debit(&user, 10_000_000, Some("r1:bet")))
        .await
        .unwrap();
    let second = t
        .wallet
        .apply_mutation(debit(&user, 10_000_000, Some("r1:bet")))
        .await
        .unwrap();

    assert_eq!(first.main, second.main);
    assert_eq!(first.ledger_id, second.ledger_id);
    assert_eq!(balance_main(&t.pool, &user).await, 90_000_000);
    assert_eq!(ledger_rows(&t.pool, &user, "game_bet").await, 1);
    assert_ledger_conserved(&t.pool, &user).await;
}

#[tokio::test]
async fn state_version_strictly_increases() {
    let t = ctx().await;
    let user = seed_user(&t.pool, "dave", 100_000_000).await;

    let mut last = 1;
    for i in 0..5 {
        let snapshot = t
            .wallet
            .apply_mutation(debit(&user, 1_000_000, Some(&format!("r{i}"))))
            .await
            .unwrap();
        assert!(snapshot.state_version > last);
        last = snapshot.state_version;
    }
}

#[tokio::test]
async fn exchange_moves_between_sub_balances() {
    let t = ctx().await;
    let user = seed_user(&t.pool, "erin", 100_000_000).await;

    let snapshot = t
        .wallet
        .exchange(&user, BalanceKind::Main, BalanceKind::Bonus, 30_000_000, None)
        .await
        .unwrap();
    assert_eq!(snapshot.main, 70_000_000);
    assert_eq!(snapshot.bonus, 30_000_000);
    assert_eq!(balance_bonus(&t.pool, &user).await, 30_000_000);
    assert_ledger_conserved(&t.pool, &user).await;

    let err = t
        .wallet
        .exchange(&user, BalanceKind::Main, BalanceKind::Main, 1_000_000, None)
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn webhook_credit_is_idempotent() {
    let t = ctx().await;
    let user = seed_user(&t.pool, "frank", 0).await;

    t.wallet
        .credit_provider_deposit(&user, "track1", "tx1", "TRX", 50_000_000)
        .await
        .unwrap();
    // The provider re-posts the same transfer.
    t.wallet
        .credit_provider_deposit(&user, "track1", "tx1", "TRX", 50_000_000)
        .await
        .unwrap();

    assert_eq!(balance_main(&t.pool, &user).await, 50_000_000);
    assert_eq!(ledger_rows(&t.pool, &user, "deposit").await, 2); // seed + one credit
    assert_ledger_conserved(&t.pool, &user).await;

    // A different tx on the same address credits again.
    t.wallet
        .credit_provider_deposit(&user, "track1", "tx2", "TRX", 25_000_000)
        .await
        .unwrap();
    assert_eq!(balance_main(&t.pool, &user).await, 75_000_000);
}

#[tokio::test]
async fn wallet_event_rides_the_outbox() {
    use sqlx::Row;
    let t = ctx().await;
    let user = seed_user(&t.pool, "grace", 100_000_000).await;

    t.wallet
        .apply_mutation(debit(&user, 10_000_000, None))
        .await
        .unwrap();

    let row = sqlx::query(
        "SELECT type, aggregate_type, user_id, version FROM event_outbox
         WHERE type = 'wallet.balance.updated' AND user_id = ?",
    )
    .bind(&user)
    .fetch_one(&t.pool)
    .await
    .unwrap();
    assert_eq!(row.get::<String, _>("aggregate_type"), "wallet");
    assert_eq!(row.get::<i64, _>("version"), 2);
}
