use crate::db::now_ms;
use crate::error::{is_unique_violation, DomainResult};
use sqlx::{Row, SqlitePool};

/// Outcome of claiming a `(user, request)` pair before running a mutating
/// command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeginOutcome {
    /// Fresh request; caller runs the handler and must `complete` or `fail`.
    Started,
    /// A twin of this request is still running.
    InProgress,
    /// Already ran; the stored envelope is replayed byte-identical.
    Completed(String),
    /// The first attempt failed. Terminal: a new request id is required.
    Failed,
}

/// Idempotency table keyed by `(user_id, request_id)`. Non-mutating
/// commands never touch it.
#[derive(Clone)]
pub struct RequestLedger {
    pool: SqlitePool,
}

impl RequestLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn begin(
        &self,
        user_id: &str,
        request_id: &str,
        command_type: &str,
    ) -> DomainResult<BeginOutcome> {
        let now = now_ms();
        let inserted = sqlx::query(
            "INSERT INTO request_ledger (user_id, request_id, type, status, created_at, updated_at)
             VALUES (?, ?, ?, 'processing', ?, ?)",
        )
        .bind(user_id)
        .bind(request_id)
        .bind(command_type)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        match inserted {
            Ok(_) => Ok(BeginOutcome::Started),
            Err(err) if is_unique_violation(&err) => {
                let row = sqlx::query(
                    "SELECT status, response FROM request_ledger
                     WHERE user_id = ? AND request_id = ?",
                )
                .bind(user_id)
                .bind(request_id)
                .fetch_one(&self.pool)
                .await?;
                let status: String = row.get("status");
                match status.as_str() {
                    "completed" => {
                        let response: Option<String> = row.get("response");
                        Ok(BeginOutcome::Completed(response.unwrap_or_default()))
                    }
                    "failed" => Ok(BeginOutcome::Failed),
                    _ => Ok(BeginOutcome::InProgress),
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Store the serialized response envelope so a replayed command returns
    /// identical bytes.
    pub async fn complete(
        &self,
        user_id: &str,
        request_id: &str,
        response: &str,
    ) -> DomainResult<()> {
        sqlx::query(
            "UPDATE request_ledger SET status = 'completed', response = ?, updated_at = ?
             WHERE user_id = ? AND request_id = ?",
        )
        .bind(response)
        .bind(now_ms())
        .bind(user_id)
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fail(&self, user_id: &str, request_id: &str) -> DomainResult<()> {
        sqlx::query(
            "UPDATE request_ledger SET status = 'failed', updated_at = ?
             WHERE user_id = ? AND request_id = ?",
        )
        .bind(now_ms())
        .bind(user_id)
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
