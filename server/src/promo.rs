use crate::db::{new_id, now_ms};
use crate::error::{is_unique_violation, DomainError, DomainResult};
use crate::outbox::{append_event, NewEvent};
use crate::wallet::{LedgerType, MutationParams, WalletService, WalletSnapshot};
use sqlx::{Row, SqlitePool};

/// Single-use-per-user code redemption folded into a wallet mutation.
#[derive(Clone)]
pub struct PromoService {
    pool: SqlitePool,
    wallet: WalletService,
}

pub struct PromoCreateParams {
    pub code: String,
    pub reward_type: String,
    pub reward_amount: i64,
    pub max_redemptions: i64,
    pub starts_at: Option<i64>,
    pub expires_at: Option<i64>,
}

impl PromoService {
    pub fn new(pool: SqlitePool, wallet: WalletService) -> Self {
        Self { pool, wallet }
    }

    pub async fn redeem(
        &self,
        user_id: &str,
        code: &str,
        request_id: Option<String>,
    ) -> DomainResult<(WalletSnapshot, i64, String)> {
        let code = code.trim().to_uppercase();
        if code.is_empty() {
            return Err(DomainError::validation("promo code is required"));
        }

        // Client request ids are only unique per user; scope the copy the
        // wallet sees.
        let request_id = request_id.map(|rid| format!("{user_id}:{rid}"));

        let lease = self.wallet.lock_user(user_id).await?;
        let result = self.redeem_locked(user_id, &code, request_id).await;
        self.wallet.unlock(&lease).await;
        result
    }

    async fn redeem_locked(
        &self,
        user_id: &str,
        code: &str,
        request_id: Option<String>,
    ) -> DomainResult<(WalletSnapshot, i64, String)> {
        let mut tx = self.pool.begin().await?;

        let promo = sqlx::query(
            "SELECT id, reward_type, reward_amount, max_redemptions, current_redemptions,
                    starts_at, expires_at
             FROM promocodes WHERE code = ? AND active = 1",
        )
        .bind(code)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DomainError::not_found("promo code not found"))?;

        let now = now_ms();
        if let Some(starts_at) = promo.get::<Option<i64>, _>("starts_at") {
            if now < starts_at {
                return Err(DomainError::conflict("promo code is not active yet"));
            }
        }
        if let Some(expires_at) = promo.get::<Option<i64>, _>("expires_at") {
            if now >= expires_at {
                return Err(DomainError::conflict("promo code has expired"));
            }
        }
        let max: i64 = promo.get("max_redemptions");
        let current: i64 = promo.get("current_redemptions");
        if current >= max {
            return Err(DomainError::forbidden("limit reached"));
        }

        let promo_id: String = promo.get("id");
        let reward_type: String = promo.get("reward_type");
        let reward_amount: i64 = promo.get("reward_amount");

        let inserted = sqlx::query(
            "INSERT INTO promo_redemptions (user_id, promo_id, amount, request_id, created_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&promo_id)
        .bind(reward_amount)
        .bind(&request_id)
        .bind(now)
        .execute(&mut *tx)
        .await;
        match inserted {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => {
                return Err(DomainError::conflict("already redeemed"))
            }
            Err(err) => return Err(err.into()),
        }

        sqlx::query(
            "UPDATE promocodes SET current_redemptions = current_redemptions + 1, updated_at = ?
             WHERE id = ?",
        )
        .bind(now)
        .bind(&promo_id)
        .execute(&mut *tx)
        .await?;

        let (delta_main, delta_bonus) = if reward_type == "bonus" {
            (0, reward_amount)
        } else {
            (reward_amount, 0)
        };
        let snapshot = self
            .wallet
            .apply_mutation_in_session(
                &mut tx,
                MutationParams {
                    user_id: user_id.to_string(),
                    request_id,
                    ledger_type: LedgerType::Promo,
                    delta_main,
                    delta_bonus,
                    metadata: serde_json::json!({ "code": code, "promoId": promo_id }),
                },
            )
            .await?;

        append_event(
            &mut *tx,
            NewEvent {
                event_type: "promo.redeem.result".to_string(),
                aggregate_type: "promo".to_string(),
                aggregate_id: promo_id.clone(),
                version: snapshot.state_version,
                user_id: Some(user_id.to_string()),
                payload: serde_json::json!({
                    "code": code,
                    "rewardType": reward_type,
                    "rewardAmount": reward_amount,
                }),
            },
        )
        .await?;

        tx.commit().await?;
        Ok((snapshot, reward_amount, reward_type))
    }

    /// Codes are normalized to upper-case on write as well as on lookup.
    pub async fn create(&self, params: PromoCreateParams) -> DomainResult<String> {
        if params.reward_type != "main" && params.reward_type != "bonus" {
            return Err(DomainError::validation("rewardType must be main or bonus"));
        }
        if params.reward_amount <= 0 || params.max_redemptions <= 0 {
            return Err(DomainError::validation("reward and redemption cap must be positive"));
        }
        let id = new_id();
        let now = now_ms();
        let inserted = sqlx::query(
            "INSERT INTO promocodes
                (id, code, reward_type, reward_amount, max_redemptions, active,
                 starts_at, expires_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(params.code.trim().to_uppercase())
        .bind(&params.reward_type)
        .bind(params.reward_amount)
        .bind(params.max_redemptions)
        .bind(params.starts_at)
        .bind(params.expires_at)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;
        match inserted {
            Ok(_) => Ok(id),
            Err(err) if is_unique_violation(&err) => {
                Err(DomainError::conflict("promo code already exists"))
            }
            Err(err) => Err(err.into()),
        }
    }
}
