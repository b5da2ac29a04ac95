use crate::db::{new_id, now_ms};
use crate::error::DomainResult;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::broadcast;

const TAILER_POLL_MS: u64 = 150;
const TAILER_BATCH: i64 = 500;

/// A normalized event as delivered to bus subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub version: i64,
    pub user_id: Option<String>,
    pub payload: serde_json::Value,
    pub created_at: i64,
}

/// An event to append. The insert must ride the same transaction as the
/// state change it describes; committed state and published events then
/// cannot diverge.
#[derive(Debug, Clone)]
pub struct NewEvent {
    pub event_type: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub version: i64,
    pub user_id: Option<String>,
    pub payload: serde_json::Value,
}

pub async fn append_event<'e, E>(executor: E, event: NewEvent) -> DomainResult<String>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let event_id = new_id();
    sqlx::query(
        "INSERT INTO event_outbox
            (event_id, type, aggregate_type, aggregate_id, version, user_id, payload, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&event_id)
    .bind(&event.event_type)
    .bind(&event.aggregate_type)
    .bind(&event.aggregate_id)
    .bind(event.version)
    .bind(&event.user_id)
    .bind(event.payload.to_string())
    .bind(now_ms())
    .execute(executor)
    .await?;
    Ok(event_id)
}

struct DedupeWindow {
    seen: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
}

impl DedupeWindow {
    fn new(cap: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            cap: cap.max(1),
        }
    }

    /// True when the id is fresh; records it and evicts the oldest entry
    /// past the cap.
    fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        self.seen.insert(id.to_string());
        self.order.push_back(id.to_string());
        while self.order.len() > self.cap {
            if let Some(old) = self.order.pop_front() {
                self.seen.remove(&old);
            }
        }
        true
    }
}

/// Process-wide fan-out of outbox rows. The rolling dedupe window absorbs
/// tailer restarts that re-deliver recent rows.
pub struct EventBus {
    sender: broadcast::Sender<EventRecord>,
    dedupe: Mutex<DedupeWindow>,
}

impl EventBus {
    pub fn new(dedupe_window: usize) -> Self {
        let (sender, _) = broadcast::channel(4096);
        Self {
            sender,
            dedupe: Mutex::new(DedupeWindow::new(dedupe_window)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Deliver at most once per rolling window. A send error only means no
    /// subscriber is listening right now.
    pub fn publish(&self, event: EventRecord) {
        let fresh = self
            .dedupe
            .lock()
            .expect("dedupe mutex poisoned")
            .insert(&event.event_id);
        if !fresh {
            return;
        }
        let _ = self.sender.send(event);
    }
}

/// Tail the outbox table from its current end and publish each new row.
/// This is the polling rendition of an insert change-feed: a restartable
/// sequence over `id > last_seen`, delivered in insert order.
pub fn spawn_tailer(pool: SqlitePool, bus: std::sync::Arc<EventBus>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_seen: i64 = match sqlx::query("SELECT COALESCE(MAX(id), 0) AS id FROM event_outbox")
            .fetch_one(&pool)
            .await
        {
            Ok(row) => row.get("id"),
            Err(err) => {
                log::error!("outbox tailer failed to read start position: {err}");
                0
            }
        };

        loop {
            let rows = sqlx::query(
                "SELECT id, event_id, type, aggregate_type, aggregate_id, version,
                        user_id, payload, created_at
                 FROM event_outbox WHERE id > ? ORDER BY id LIMIT ?",
            )
            .bind(last_seen)
            .bind(TAILER_BATCH)
            .fetch_all(&pool)
            .await;

            match rows {
                Ok(rows) => {
                    for row in rows {
                        last_seen = row.get("id");
                        let payload: String = row.get("payload");
                        let payload = serde_json::from_str(&payload)
                            .unwrap_or(serde_json::Value::Null);
                        bus.publish(EventRecord {
                            event_id: row.get("event_id"),
                            event_type: row.get("type"),
                            aggregate_type: row.get("aggregate_type"),
                            aggregate_id: row.get("aggregate_id"),
                            version: row.get("version"),
                            user_id: row.get("user_id"),
                            payload,
                            created_at: row.get("created_at"),
                        });
                    }
                }
                Err(err) => log::warn!("outbox tailer poll failed: {err}"),
            }

            tokio::time::sleep(Duration::from_millis(TAILER_POLL_MS)).await;
        }
    })
}
