mod common;

use kazino_server::app::{bootstrap_with, App};
use kazino_server::config::Config;
use kazino_server::db;
use kazino_server::gateway::connection::ConnState;
use kazino_server::gateway::router::handle_frame;
use kazino_server::provider::DisabledProvider;
use std::sync::Arc;
use tokio::sync::mpsc;

async fn test_app() -> Arc<App> {
    let pool = db::connect_in_memory().await.expect("pool");
    db::init_schema(&pool).await.expect("schema");
    bootstrap_with(
        Config::for_tests("sqlite::memory:"),
        pool,
        Arc::new(DisabledProvider),
    )
    .await
    .expect("bootstrap")
}

fn test_conn() -> (Arc<ConnState>, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ConnState::new(tx), rx)
}

async fn send(app: &Arc<App>, conn: &Arc<ConnState>, frame: serde_json::Value) -> serde_json::Value {
    let raw = handle_frame(app, conn, &frame.to_string()).await;
    serde_json::from_str(&raw).expect("response is json")
}

async fn register(app: &Arc<App>, conn: &Arc<ConnState>, username: &str) -> String {
    let response = send(
        app,
        conn,
        serde_json::json!({
            "type": "auth.register",
            "requestId": format!("reg-{username}"),
            "data": { "username": username, "password": "hunter22" },
        }),
    )
    .await;
    assert_eq!(response["ok"], true, "register failed: {response}");
    response["data"]["tokens"]["accessToken"]
        .as_str()
        .expect("access token")
        .to_string()
}

#[tokio::test]
async fn malformed_frame_gets_validation_error() {
    let app = test_app().await;
    let (conn, _rx) = test_conn();

    let raw = handle_frame(&app, &conn, "this is not json").await;
    let response: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(response["ok"], false);
    assert_eq!(response["error"]["code"], "VALIDATION_ERROR");
    assert!(response["requestId"].as_str().unwrap().starts_with("invalid:"));
}

#[tokio::test]
async fn unknown_command_is_not_found() {
    let app = test_app().await;
    let (conn, _rx) = test_conn();

    let response = send(&app, &conn, serde_json::json!({ "type": "no.such.command" })).await;
    assert_eq!(response["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn auth_required_commands_reject_anonymous() {
    let app = test_app().await;
    let (conn, _rx) = test_conn();

    let response = send(
        &app,
        &conn,
        serde_json::json!({ "type": "wallet.balance.get" }),
    )
    .await;
    assert_eq!(response["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn mutating_commands_require_request_id() {
    let app = test_app().await;
    let (conn, _rx) = test_conn();
    register(&app, &conn, "alice").await;

    let response = send(
        &app,
        &conn,
        serde_json::json!({
            "type": "dice.bet",
            "data": { "amount": 1.0, "chance": 50.0, "direction": "under" },
        }),
    )
    .await;
    assert_eq!(response["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn dice_double_charge_guard_end_to_end() {
    use sqlx::Row;
    let app = test_app().await;
    let (conn, _rx) = test_conn();
    register(&app, &conn, "alice").await;

    let frame = serde_json::json!({
        "type": "dice.bet",
        "requestId": "r1",
        "data": {
            "amount": 10.0, "chance": 50.0, "direction": "under", "client_seed": "abc",
        },
    });

    let first_raw = handle_frame(&app, &conn, &frame.to_string()).await;
    let first: serde_json::Value = serde_json::from_str(&first_raw).unwrap();
    assert_eq!(first["ok"], true, "bet failed: {first}");

    let main = first["data"]["balance"]["main"].as_i64().unwrap();
    let payout = first["data"]["payout"].as_i64().unwrap();
    assert_eq!(main, 100_000_000 - 10_000_000 + payout);

    // Resending the same frame must return byte-identical data.
    let second_raw = handle_frame(&app, &conn, &frame.to_string()).await;
    assert_eq!(first_raw, second_raw);

    // Exactly one game_bet ledger row exists.
    let count: i64 = sqlx::query(
        "SELECT COUNT(*) AS n FROM wallet_ledger WHERE type = 'game_bet'",
    )
    .fetch_one(&app.pool)
    .await
    .unwrap()
    .get("n");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn legacy_aliases_resolve_to_canonical_commands() {
    let app = test_app().await;
    let (conn, _rx) = test_conn();
    register(&app, &conn, "alice").await;

    let response = send(
        &app,
        &conn,
        serde_json::json!({
            "type": "dice_bet",
            "requestId": "r1",
            "data": { "amount": 1.0, "chance": 50.0, "direction": "under" },
        }),
    )
    .await;
    assert_eq!(response["ok"], true, "aliased bet failed: {response}");
    assert_eq!(response["type"], "dice.bet.result");
}

#[tokio::test]
async fn in_flight_duplicate_reports_request_in_progress() {
    let app = test_app().await;
    let (conn, _rx) = test_conn();
    register(&app, &conn, "alice").await;

    // Mark a request processing by hand, then send its twin.
    let user_id = conn.ledger_user_id();
    app.request_ledger
        .begin(&user_id, "r9", "dice.bet")
        .await
        .unwrap();

    let response = send(
        &app,
        &conn,
        serde_json::json!({
            "type": "dice.bet",
            "requestId": "r9",
            "data": { "amount": 1.0, "chance": 50.0, "direction": "under" },
        }),
    )
    .await;
    assert_eq!(response["error"]["code"], "REQUEST_IN_PROGRESS");
    assert_eq!(response["error"]["retryable"], true);
}

#[tokio::test]
async fn failed_request_id_is_terminal() {
    let app = test_app().await;
    let (conn, _rx) = test_conn();
    register(&app, &conn, "alice").await;

    // A bet that fails marks its request id failed.
    let response = send(
        &app,
        &conn,
        serde_json::json!({
            "type": "dice.bet",
            "requestId": "r1",
            "data": { "amount": 1e9, "chance": 50.0, "direction": "under" },
        }),
    )
    .await;
    assert_eq!(response["ok"], false);

    // The same id can not be reused, even with a valid payload.
    let response = send(
        &app,
        &conn,
        serde_json::json!({
            "type": "dice.bet",
            "requestId": "r1",
            "data": { "amount": 1.0, "chance": 50.0, "direction": "under" },
        }),
    )
    .await;
    assert_eq!(response["error"]["code"], "DUPLICATE_REQUEST");
}

#[tokio::test]
async fn invalid_token_clears_connection_auth() {
    let app = test_app().await;
    let (conn, _rx) = test_conn();
    register(&app, &conn, "alice").await;
    assert!(conn.current_user().is_some());

    let response = send(
        &app,
        &conn,
        serde_json::json!({
            "type": "wallet.balance.get",
            "auth": { "accessToken": "expired-garbage" },
        }),
    )
    .await;
    assert_eq!(response["error"]["code"], "UNAUTHORIZED");
    assert!(conn.current_user().is_none(), "stale auth must be cleared");
}

#[tokio::test]
async fn token_in_frame_authenticates_connection() {
    let app = test_app().await;
    let (conn_a, _rx_a) = test_conn();
    let token = register(&app, &conn_a, "alice").await;

    // A different socket presents the token and is recognized.
    let (conn_b, _rx_b) = test_conn();
    let response = send(
        &app,
        &conn_b,
        serde_json::json!({
            "type": "wallet.balance.get",
            "auth": { "accessToken": token },
        }),
    )
    .await;
    assert_eq!(response["ok"], true);
    assert_eq!(response["data"]["main"].as_i64().unwrap(), 100_000_000);
}

#[tokio::test]
async fn subscriptions_gate_broadcasts() {
    let app = test_app().await;
    let (conn, _rx) = test_conn();

    let response = send(&app, &conn, serde_json::json!({ "type": "crash.subscribe" })).await;
    assert_eq!(response["ok"], true);
    assert!(conn
        .subscriptions
        .lock()
        .unwrap()
        .contains("crash"));
}

#[tokio::test]
async fn promo_full_flow_through_router() {
    let app = test_app().await;

    // Seed an admin who creates the promo.
    let (admin_conn, _rx) = test_conn();
    register(&app, &admin_conn, "admin").await;
    sqlx::query("UPDATE users SET roles = '[\"admin\",\"user\"]' WHERE username = 'admin'")
        .execute(&app.pool)
        .await
        .unwrap();

    // The connection user predates the role grant; log in again for the
    // fresh role set.
    let (logged_in, _) = app.auth.login("admin", "hunter22").await.unwrap();
    admin_conn.set_user(Some(logged_in));

    let response = send(
        &app,
        &admin_conn,
        serde_json::json!({
            "type": "admin.promo.create",
            "requestId": "p1",
            "data": {
                "code": "FREEBIE",
                "rewardType": "bonus",
                "rewardAmount": 5.0,
                "maxRedemptions": 1,
            },
        }),
    )
    .await;
    assert_eq!(response["ok"], true, "promo create failed: {response}");

    let (user_conn, _rx2) = test_conn();
    register(&app, &user_conn, "bob").await;
    let response = send(
        &app,
        &user_conn,
        serde_json::json!({
            "type": "promo.redeem",
            "requestId": "pr1",
            "data": { "code": "freebie" },
        }),
    )
    .await;
    assert_eq!(response["ok"], true, "redeem failed: {response}");
    assert_eq!(response["data"]["rewardAmount"].as_i64().unwrap(), 5_000_000);

    let retry = send(
        &app,
        &user_conn,
        serde_json::json!({
            "type": "promo.redeem",
            "requestId": "pr2",
            "data": { "code": "FREEBIE" },
        }),
    )
    .await;
    assert_eq!(retry["error"]["code"], "CONFLICT");
}
