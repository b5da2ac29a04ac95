mod common;

use common::{assert_ledger_conserved, balance_bonus, ctx, seed_user};
use kazino_server::error::ErrorCode;
use kazino_server::promo::PromoCreateParams;

fn promo(code: &str, reward_type: &str, amount: i64, max: i64) -> PromoCreateParams {
    PromoCreateParams {
        code: code.to_string(),
        reward_type: reward_type.to_string(),
        reward_amount: amount,
        max_redemptions: max,
        starts_at: None,
        expires_at: None,
    }
}

#[tokio::test]
async fn single_redemption_scenario() {
    let t = ctx().await;
    let alice = seed_user(&t.pool, "alice", 100_000_000).await;
    let bob = seed_user(&t.pool, "bob", 100_000_000).await;

    t.promo.create(promo("WELCOME5", "bonus", 5_000_000, 1)).await.unwrap();

    // Alice redeems and gets +5 bonus.
    let (snapshot, amount, reward_type) =
        t.promo.redeem(&alice, "welcome5", None).await.unwrap();
    assert_eq!(amount, 5_000_000);
    assert_eq!(reward_type, "bonus");
    assert_eq!(snapshot.bonus, 5_000_000);
    assert_eq!(balance_bonus(&t.pool, &alice).await, 5_000_000);
    assert_ledger_conserved(&t.pool, &alice).await;

    // Alice again: already redeemed.
    let err = t.promo.redeem(&alice, "WELCOME5", None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
    assert_eq!(err.message, "already redeemed");

    // Bob: the single redemption is spent.
    let err = t.promo.redeem(&bob, "WELCOME5", None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Forbidden);
    assert_eq!(err.message, "limit reached");
    assert_eq!(balance_bonus(&t.pool, &bob).await, 0);
}

#[tokio::test]
async fn codes_are_case_insensitive() {
    let t = ctx().await;
    let user = seed_user(&t.pool, "carol", 0).await;
    t.promo.create(promo("MiXeD", "main", 1_000_000, 10)).await.unwrap();

    let (snapshot, _, _) = t.promo.redeem(&user, "mixed", None).await.unwrap();
    assert_eq!(snapshot.main, 1_000_000);
}

#[tokio::test]
async fn unknown_or_windowed_codes_are_refused() {
    let t = ctx().await;
    let user = seed_user(&t.pool, "dave", 0).await;

    let err = t.promo.redeem(&user, "NOPE", None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::NotFound);

    let future = kazino_server::db::now_ms() + 3_600_000;
    t.promo
        .create(PromoCreateParams {
            starts_at: Some(future),
            ..promo("LATER", "main", 1_000_000, 10)
        })
        .await
        .unwrap();
    let err = t.promo.redeem(&user, "LATER", None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);

    let past = kazino_server::db::now_ms() - 1_000;
    t.promo
        .create(PromoCreateParams {
            expires_at: Some(past),
            ..promo("GONE", "main", 1_000_000, 10)
        })
        .await
        .unwrap();
    let err = t.promo.redeem(&user, "GONE", None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
}

#[tokio::test]
async fn duplicate_code_creation_conflicts() {
    let t = ctx().await;
    t.promo.create(promo("ONCE", "main", 1_000_000, 1)).await.unwrap();
    let err = t.promo.create(promo("once", "main", 1_000_000, 1)).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
}
