use crate::db::{new_id, now_ms};
use crate::error::{DomainError, DomainResult};
use crate::settings::SettingsCache;
use crate::wallet::{LedgerType, MutationParams, WalletService};
use rand::Rng;
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

const SPIN_COOLDOWN_MS: i64 = 24 * 3600 * 1000;

/// Daily bonus wheel. The prize table is an admin-tunable settings field;
/// a winning spin is just a bonus-balance wallet mutation.
#[derive(Clone)]
pub struct BonusService {
    pool: SqlitePool,
    wallet: WalletService,
    settings: Arc<SettingsCache>,
}

impl BonusService {
    pub fn new(pool: SqlitePool, wallet: WalletService, settings: Arc<SettingsCache>) -> Self {
        Self {
            pool,
            wallet,
            settings,
        }
    }

    pub async fn get_wheel(&self) -> DomainResult<serde_json::Value> {
        let prizes = self.settings.get().await?.bonus_wheel_prizes;
        Ok(serde_json::json!({ "prizes": prizes }))
    }

    pub async fn spin(
        &self,
        user_id: &str,
        request_id: Option<String>,
    ) -> DomainResult<serde_json::Value> {
        let last = sqlx::query(
            "SELECT MAX(created_at) AS last FROM bonus_spins WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        if let Some(last) = last.get::<Option<i64>, _>("last") {
            if now_ms() - last < SPIN_COOLDOWN_MS {
                return Err(DomainError::conflict("bonus wheel is on cooldown"));
            }
        }

        let prizes = self.settings.get().await?.bonus_wheel_prizes;
        if prizes.is_empty() {
            return Err(DomainError::conflict("bonus wheel is disabled"));
        }
        let index = rand::thread_rng().gen_range(0..prizes.len());
        let prize_atomic = money::money_to_atomic(prizes[index])?;

        sqlx::query(
            "INSERT INTO bonus_spins (id, user_id, prize, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(new_id())
        .bind(user_id)
        .bind(prize_atomic)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;

        let snapshot = if prize_atomic > 0 {
            Some(
                self.wallet
                    .apply_mutation(MutationParams {
                        user_id: user_id.to_string(),
                        request_id: request_id.map(|rid| format!("{user_id}:{rid}")),
                        ledger_type: LedgerType::Promo,
                        delta_main: 0,
                        delta_bonus: prize_atomic,
                        metadata: serde_json::json!({ "bonusWheel": true }),
                    })
                    .await?,
            )
        } else {
            None
        };

        Ok(serde_json::json!({
            "prizeIndex": index,
            "prize": prizes[index],
            "balance": snapshot,
        }))
    }
}
