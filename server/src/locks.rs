use crate::db::{new_id, now_ms};
use crate::error::{is_unique_violation, DomainError, DomainResult};
use rand::Rng;
use sqlx::SqlitePool;
use std::time::Duration;

pub const DEFAULT_WAIT_MS: i64 = 8_000;
pub const DEFAULT_TTL_MS: i64 = 30_000;

const BACKOFF_BASE_MS: f64 = 15.0;
const BACKOFF_FACTOR: f64 = 1.35;
const BACKOFF_CAP_MS: f64 = 250.0;

/// A held named mutex. The holder must `release` it; if the TTL runs out
/// first, another contender takes the row over and this lease is dead.
#[derive(Debug, Clone)]
pub struct Lease {
    pub key: String,
    pub owner_id: String,
    pub expires_at: i64,
}

/// Named leases in the shared `locks` table. Row-level atomicity of the
/// database makes each takeover/insert exclusive; the TTL guarantees
/// progress when a holder crashes.
#[derive(Clone)]
pub struct LockManager {
    pool: SqlitePool,
}

impl LockManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Block up to `wait_ms` trying to take `key`. Each attempt first
    /// seizes any row whose lease has lapsed (`expires_at <= now`,
    /// inclusive so a released lease is immediately reusable), then falls
    /// back to inserting a fresh row.
    pub async fn acquire(&self, key: &str, wait_ms: i64, ttl_ms: i64) -> DomainResult<Lease> {
        let owner_id = new_id();
        let deadline = now_ms() + wait_ms;
        let mut attempt: u32 = 0;

        loop {
            let now = now_ms();
            let expires_at = now + ttl_ms;

            let seized = sqlx::query(
                "UPDATE locks SET owner_id = ?, expires_at = ? WHERE key = ? AND expires_at <= ?",
            )
            .bind(&owner_id)
            .bind(expires_at)
            .bind(key)
            .bind(now)
            .execute(&self.pool)
            .await?;

            if seized.rows_affected() > 0 {
                return Ok(Lease {
                    key: key.to_string(),
                    owner_id,
                    expires_at,
                });
            }

            let inserted = sqlx::query(
                "INSERT INTO locks (key, owner_id, expires_at) VALUES (?, ?, ?)",
            )
            .bind(key)
            .bind(&owner_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await;

            match inserted {
                Ok(_) => {
                    return Ok(Lease {
                        key: key.to_string(),
                        owner_id,
                        expires_at,
                    })
                }
                Err(err) if is_unique_violation(&err) => {
                    // Live holder; back off and retry below.
                }
                Err(err) => return Err(err.into()),
            }

            if now_ms() >= deadline {
                return Err(DomainError::lock_timeout(key));
            }
            tokio::time::sleep(backoff_delay(attempt)).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Extend a held lease. Fails with `CONFLICT` when the row is owned by
    /// someone else, which happens after this lease expired and was taken
    /// over.
    pub async fn renew(&self, lease: &Lease, ttl_ms: i64) -> DomainResult<Lease> {
        let expires_at = now_ms() + ttl_ms;
        let updated = sqlx::query(
            "UPDATE locks SET expires_at = ? WHERE key = ? AND owner_id = ? AND expires_at > ?",
        )
        .bind(expires_at)
        .bind(&lease.key)
        .bind(&lease.owner_id)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(DomainError::conflict(format!(
                "lock {} is no longer held",
                lease.key
            )));
        }
        Ok(Lease {
            key: lease.key.clone(),
            owner_id: lease.owner_id.clone(),
            expires_at,
        })
    }

    /// Mark the lease expired without deleting the row. Idempotent, and a
    /// no-op when the lease was already taken over.
    pub async fn release(&self, lease: &Lease) -> DomainResult<()> {
        sqlx::query("UPDATE locks SET expires_at = 0 WHERE key = ? AND owner_id = ?")
            .bind(&lease.key)
            .bind(&lease.owner_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS * BACKOFF_FACTOR.powi(attempt.min(20) as i32);
    let capped = exp.min(BACKOFF_CAP_MS);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..15.0);
    Duration::from_millis((capped + jitter) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_grows_and_caps() {
        // Strip jitter by checking the raw curve.
        let raw = |n: u32| (BACKOFF_BASE_MS * BACKOFF_FACTOR.powi(n as i32)).min(BACKOFF_CAP_MS);
        assert_eq!(raw(0), 15.0);
        assert!(raw(3) > raw(1));
        assert_eq!(raw(15), BACKOFF_CAP_MS);
    }
}
