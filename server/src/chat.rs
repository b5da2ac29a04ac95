use crate::auth::AuthUser;
use crate::db::{new_id, now_ms};
use crate::error::{DomainError, DomainResult};
use crate::outbox::{append_event, NewEvent};
use sqlx::{Row, SqlitePool};

const MAX_MESSAGE_LEN: usize = 500;

#[derive(Clone)]
pub struct ChatService {
    pool: SqlitePool,
}

impl ChatService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn send(&self, user: &AuthUser, text: &str) -> DomainResult<serde_json::Value> {
        let text = text.trim();
        if text.is_empty() {
            return Err(DomainError::validation("message is empty"));
        }
        if text.len() > MAX_MESSAGE_LEN {
            return Err(DomainError::validation("message is too long"));
        }

        let id = new_id();
        let now = now_ms();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO chat_messages (id, user_id, username, text, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&user.id)
        .bind(&user.username)
        .bind(text)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let message = serde_json::json!({
            "id": id,
            "userId": user.id,
            "username": user.username,
            "text": text,
            "createdAt": now,
        });
        append_event(
            &mut *tx,
            NewEvent {
                event_type: "chat.message.created".to_string(),
                aggregate_type: "chat".to_string(),
                aggregate_id: id.clone(),
                version: 1,
                user_id: None,
                payload: message.clone(),
            },
        )
        .await?;
        tx.commit().await?;
        Ok(message)
    }

    pub async fn history(&self, limit: i64) -> DomainResult<serde_json::Value> {
        let rows = sqlx::query(
            "SELECT id, user_id, username, text, created_at FROM chat_messages
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(limit.clamp(1, 100))
        .fetch_all(&self.pool)
        .await?;
        let mut messages: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                serde_json::json!({
                    "id": row.get::<String, _>("id"),
                    "userId": row.get::<String, _>("user_id"),
                    "username": row.get::<String, _>("username"),
                    "text": row.get::<String, _>("text"),
                    "createdAt": row.get::<i64, _>("created_at"),
                })
            })
            .collect();
        messages.reverse();
        Ok(serde_json::json!({ "messages": messages }))
    }
}
