use crate::db::{new_id, now_ms};
use crate::error::{is_unique_violation, DomainResult};
use crate::settings::SettingsCache;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// Commission hook called after a referred player's positive win. It must
/// never block or fail game resolution, so the public entry point logs and
/// swallows every error. The `event_key` unique index keeps replays from
/// double-crediting.
#[derive(Clone)]
pub struct AffiliateHook {
    pool: SqlitePool,
    settings: Arc<SettingsCache>,
}

impl AffiliateHook {
    pub fn new(pool: SqlitePool, settings: Arc<SettingsCache>) -> Self {
        Self { pool, settings }
    }

    pub async fn credit_from_referral_win(
        &self,
        winner_user_id: &str,
        win_amount: i64,
        event_key: &str,
    ) {
        if let Err(err) = self
            .try_credit(winner_user_id, win_amount, event_key)
            .await
        {
            log::warn!("affiliate credit for {event_key} failed: {err}");
        }
    }

    async fn try_credit(
        &self,
        winner_user_id: &str,
        win_amount: i64,
        event_key: &str,
    ) -> DomainResult<()> {
        if win_amount <= 0 {
            return Ok(());
        }
        let winner = sqlx::query("SELECT referred_by FROM users WHERE id = ?")
            .bind(winner_user_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(winner) = winner else { return Ok(()) };
        let Some(referrer_id) = winner.get::<Option<String>, _>("referred_by") else {
            return Ok(());
        };

        let pct = self.settings.get().await?.affiliate_commission_pct;
        let pct_x100 = (pct * 100.0).round() as i128;
        let commission = (win_amount as i128 * pct_x100 / 10_000) as i64;
        if commission <= 0 {
            return Ok(());
        }

        let inserted = sqlx::query(
            "INSERT INTO affiliate_earnings (id, event_key, user_id, source_user_id, amount, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(event_key)
        .bind(&referrer_id)
        .bind(winner_user_id)
        .bind(commission)
        .bind(now_ms())
        .execute(&self.pool)
        .await;
        match inserted {
            Ok(_) => {}
            // Already credited for this event.
            Err(err) if is_unique_violation(&err) => return Ok(()),
            Err(err) => return Err(err.into()),
        }

        sqlx::query(
            "UPDATE users SET referral_earnings = referral_earnings + ?, updated_at = ? WHERE id = ?",
        )
        .bind(commission)
        .bind(now_ms())
        .bind(&referrer_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn earnings_summary(&self, user_id: &str) -> DomainResult<serde_json::Value> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS events, COALESCE(SUM(amount), 0) AS total
             FROM affiliate_earnings WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(serde_json::json!({
            "events": row.get::<i64, _>("events"),
            "total": row.get::<i64, _>("total"),
        }))
    }
}
