mod common;

use common::{balance_main, ctx};
use kazino_server::error::ErrorCode;

#[tokio::test]
async fn register_seeds_demo_balance_and_logs_in() {
    let t = ctx().await;
    let (user, tokens) = t.auth.register("alice", "hunter22", None).await.unwrap();
    assert_eq!(user.username, "alice");
    assert!(!tokens.access_token.is_empty());

    // 100 demo coins, reconciled in the ledger.
    assert_eq!(balance_main(&t.pool, &user.id).await, 100_000_000);
    common::assert_ledger_conserved(&t.pool, &user.id).await;

    let validated = t.auth.validate_access(&tokens.access_token).await.unwrap();
    assert_eq!(validated.id, user.id);
}

#[tokio::test]
async fn register_rejects_bad_input_and_duplicates() {
    let t = ctx().await;
    assert_eq!(
        t.auth.register("ab", "hunter22", None).await.unwrap_err().code,
        ErrorCode::Validation
    );
    assert_eq!(
        t.auth.register("alice", "short", None).await.unwrap_err().code,
        ErrorCode::Validation
    );

    t.auth.register("alice", "hunter22", None).await.unwrap();
    let err = t.auth.register("ALICE", "hunter22", None).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Conflict);
}

#[tokio::test]
async fn login_verifies_password() {
    let t = ctx().await;
    t.auth.register("bob", "hunter22", None).await.unwrap();

    let (user, _tokens) = t.auth.login("bob", "hunter22").await.unwrap();
    assert_eq!(user.username, "bob");

    let err = t.auth.login("bob", "wrong-password").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
    let err = t.auth.login("nobody", "hunter22").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn refresh_rotates_and_detects_reuse() {
    let t = ctx().await;
    let (_, tokens) = t.auth.register("carol", "hunter22", None).await.unwrap();

    // First refresh succeeds and rotates the stored hash.
    let rotated = t.auth.refresh(&tokens.refresh_token).await.unwrap();
    assert_ne!(rotated.refresh_token, tokens.refresh_token);

    // Reusing the original refresh token must fail.
    let err = t.auth.refresh(&tokens.refresh_token).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);

    // The rotated token still works.
    t.auth.refresh(&rotated.refresh_token).await.unwrap();
}

#[tokio::test]
async fn revoked_session_refuses_refresh() {
    let t = ctx().await;
    let (user, tokens) = t.auth.register("dave", "hunter22", None).await.unwrap();

    t.auth.logout(&user.id, &tokens.session_id).await.unwrap();
    let err = t.auth.refresh(&tokens.refresh_token).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
}

#[tokio::test]
async fn referral_credits_bonus_and_counters() {
    use sqlx::Row;
    let t = ctx().await;
    let (referrer, _) = t.auth.register("erin", "hunter22", None).await.unwrap();
    let code: Option<String> = sqlx::query("SELECT affiliate_code FROM users WHERE id = ?")
        .bind(&referrer.id)
        .fetch_one(&t.pool)
        .await
        .unwrap()
        .get("affiliate_code");
    let code = code.expect("registration assigns an affiliate code");

    let (referred, _) = t
        .auth
        .register("frank", "hunter22", Some(&code))
        .await
        .unwrap();
    assert_eq!(common::balance_bonus(&t.pool, &referred.id).await, 5_000_000);
    common::assert_ledger_conserved(&t.pool, &referred.id).await;

    let count: i64 = sqlx::query("SELECT referral_count FROM users WHERE id = ?")
        .bind(&referrer.id)
        .fetch_one(&t.pool)
        .await
        .unwrap()
        .get("referral_count");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn invalid_access_token_is_rejected() {
    let t = ctx().await;
    let err = t.auth.validate_access("garbage").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Unauthorized);
}
