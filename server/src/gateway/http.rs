use crate::app::App;
use crate::db::now_ms;
use crate::error::ErrorCode;
use crate::gateway::connection::ConnState;
use crate::gateway::protocol::Envelope;
use crate::gateway::router::handle_frame;
use crate::provider::handle_deposit_webhook;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::body::Bytes;
use axum::routing::{get, post};
use axum::Router;
use futures::{SinkExt, StreamExt};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

const WEBHOOK_BODY_LIMIT: usize = 1024 * 1024;

/// The single HTTP/WS surface: the WebSocket endpoint plus the few plain
/// HTTP routes, all on one port.
pub fn build_router(app: Arc<App>) -> Router {
    let ws_path = app.config.ws_path.clone();
    Router::new()
        .route(&ws_path, get(ws_upgrade))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/site/settings", get(site_settings))
        .route(
            "/webhooks/oxapay",
            post(deposit_webhook).layer(DefaultBodyLimit::max(WEBHOOK_BODY_LIMIT)),
        )
        .with_state(app)
}

async fn health() -> impl IntoResponse {
    axum::Json(serde_json::json!({ "ok": true, "ts": now_ms() }))
}

async fn metrics(State(app): State<Arc<App>>) -> impl IntoResponse {
    app.metrics.render()
}

async fn site_settings(State(app): State<Arc<App>>) -> impl IntoResponse {
    match app.settings.get().await {
        Ok(settings) => axum::Json(serde_json::json!({
            "siteName": settings.site_name,
            "maintenance": settings.maintenance,
            "online": app.registry.online_count(),
        }))
        .into_response(),
        Err(err) => {
            log::error!("site settings read failed: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn deposit_webhook(
    State(app): State<Arc<App>>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    app.metrics.webhooks_received.fetch_add(1, Ordering::Relaxed);
    let signature = headers
        .get("hmac")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    match handle_deposit_webhook(&app.pool, &app.wallet, app.provider.as_ref(), &body, signature)
        .await
    {
        Ok(credited) => (StatusCode::OK, format!("ok: {credited} credited")),
        Err(err) if err.code == ErrorCode::Unauthorized => {
            (StatusCode::UNAUTHORIZED, err.message)
        }
        Err(err) if err.code == ErrorCode::Validation => (StatusCode::BAD_REQUEST, err.message),
        Err(err) => {
            log::error!("webhook processing failed: {err}");
            (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
        }
    }
}

async fn ws_upgrade(State(app): State<Arc<App>>, upgrade: WebSocketUpgrade) -> impl IntoResponse {
    upgrade.on_upgrade(move |socket| client_connection(app, socket))
}

/// One task per socket reading frames, one writer task draining the
/// connection's outbound queue.
async fn client_connection(app: Arc<App>, socket: WebSocket) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let conn = ConnState::new(tx);

    app.registry.add(conn.clone());
    app.metrics.connections_open.fetch_add(1, Ordering::Relaxed);
    app.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
    broadcast_online(&app);
    log::debug!("connection {} opened", conn.id);

    let writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                let response = handle_frame(&app, &conn, text.as_str()).await;
                if !conn.send(response) {
                    break;
                }
            }
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => {} // ping/pong/binary are ignored
        }
    }

    app.registry.remove(conn.id);
    app.metrics.connections_open.fetch_sub(1, Ordering::Relaxed);
    broadcast_online(&app);
    writer.abort();
    log::debug!("connection {} closed", conn.id);
}

/// Presence is recomputed and pushed to everyone on connect/disconnect.
fn broadcast_online(app: &Arc<App>) {
    let count = app.registry.online_count();
    let frame = Envelope {
        frame_type: "chat.online".to_string(),
        request_id: format!("event:online:{}", now_ms()),
        ok: true,
        server_ts: now_ms(),
        data: Some(serde_json::json!({ "count": count })),
        error: None,
        event_id: None,
        state_version: None,
    }
    .to_json();
    app.registry.broadcast_all(&frame);
}
