use crate::db::{new_id, now_ms};
use crate::error::{DomainError, DomainResult};
use crate::locks::{Lease, LockManager, DEFAULT_TTL_MS, DEFAULT_WAIT_MS};
use crate::outbox::{append_event, NewEvent};
use crate::settings::GameSettings;
use money::Balances;
use serde::{Deserialize, Serialize};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerType {
    Deposit,
    Withdraw,
    Exchange,
    GameBet,
    GamePayout,
    Promo,
}

impl LedgerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LedgerType::Deposit => "deposit",
            LedgerType::Withdraw => "withdraw",
            LedgerType::Exchange => "exchange",
            LedgerType::GameBet => "game_bet",
            LedgerType::GamePayout => "game_payout",
            LedgerType::Promo => "promo",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceKind {
    Main,
    Bonus,
}

/// The post-mutation view returned by every wallet operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletSnapshot {
    pub main: i64,
    pub bonus: i64,
    pub state_version: i64,
    pub ledger_id: String,
}

#[derive(Debug, Clone)]
pub struct MutationParams {
    pub user_id: String,
    pub request_id: Option<String>,
    pub ledger_type: LedgerType,
    pub delta_main: i64,
    pub delta_bonus: i64,
    pub metadata: serde_json::Value,
}

/// Double-entry balance store. Every mutation runs the same kernel:
/// read, check, update user row with `state_version + 1`, append a ledger
/// row, append a `wallet.balance.updated` outbox event, all in one
/// transaction serialized by the `wallet:{userId}` lock.
#[derive(Clone)]
pub struct WalletService {
    pool: SqlitePool,
    locks: LockManager,
}

impl WalletService {
    pub fn new(pool: SqlitePool, locks: LockManager) -> Self {
        Self { pool, locks }
    }

    pub async fn lock_user(&self, user_id: &str) -> DomainResult<Lease> {
        self.locks
            .acquire(&format!("wallet:{user_id}"), DEFAULT_WAIT_MS, DEFAULT_TTL_MS)
            .await
    }

    pub async fn unlock(&self, lease: &Lease) {
        if let Err(err) = self.locks.release(lease).await {
            log::warn!("failed to release {}: {err}", lease.key);
        }
    }

    /// The kernel primitive: lock, transact, mutate, release.
    pub async fn apply_mutation(&self, params: MutationParams) -> DomainResult<WalletSnapshot> {
        let lease = self.lock_user(&params.user_id).await?;
        let result = self.apply_in_new_tx(params).await;
        self.unlock(&lease).await;
        result
    }

    async fn apply_in_new_tx(&self, params: MutationParams) -> DomainResult<WalletSnapshot> {
        let mut tx = self.pool.begin().await?;
        let snapshot = self.apply_mutation_in_session(&mut tx, params).await?;
        tx.commit().await?;
        Ok(snapshot)
    }

    /// Same primitive without lock or transaction management, for callers
    /// that already hold the user lock and an outer transaction.
    pub async fn apply_mutation_in_session(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        params: MutationParams,
    ) -> DomainResult<WalletSnapshot> {
        // A retried request collapses to the first committed effect.
        if let Some(request_id) = &params.request_id {
            let existing = sqlx::query(
                "SELECT id, balance_main_after, balance_bonus_after
                 FROM wallet_ledger WHERE request_id = ?",
            )
            .bind(request_id)
            .fetch_optional(&mut **tx)
            .await?;
            if let Some(row) = existing {
                let state_version: i64 =
                    sqlx::query("SELECT state_version FROM users WHERE id = ?")
                        .bind(&params.user_id)
                        .fetch_one(&mut **tx)
                        .await?
                        .get("state_version");
                return Ok(WalletSnapshot {
                    main: row.get("balance_main_after"),
                    bonus: row.get("balance_bonus_after"),
                    state_version,
                    ledger_id: row.get("id"),
                });
            }
        }

        let user = sqlx::query(
            "SELECT balance_main, balance_bonus, state_version FROM users WHERE id = ?",
        )
        .bind(&params.user_id)
        .fetch_optional(&mut **tx)
        .await?
        .ok_or_else(|| DomainError::not_found("user not found"))?;

        let balances = Balances::new(user.get("balance_main"), user.get("balance_bonus"));
        let next = balances
            .checked_apply(params.delta_main, params.delta_bonus)
            .ok_or_else(DomainError::insufficient_balance)?;
        let state_version: i64 = user.get::<i64, _>("state_version") + 1;

        let now = now_ms();
        sqlx::query(
            "UPDATE users SET balance_main = ?, balance_bonus = ?, state_version = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(next.main)
        .bind(next.bonus)
        .bind(state_version)
        .bind(now)
        .bind(&params.user_id)
        .execute(&mut **tx)
        .await?;

        let ledger_id = new_id();
        sqlx::query(
            "INSERT INTO wallet_ledger
                (id, user_id, request_id, type, amount_main, amount_bonus,
                 balance_main_after, balance_bonus_after, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&ledger_id)
        .bind(&params.user_id)
        .bind(&params.request_id)
        .bind(params.ledger_type.as_str())
        .bind(params.delta_main)
        .bind(params.delta_bonus)
        .bind(next.main)
        .bind(next.bonus)
        .bind(params.metadata.to_string())
        .bind(now)
        .execute(&mut **tx)
        .await?;

        append_event(
            &mut **tx,
            NewEvent {
                event_type: "wallet.balance.updated".to_string(),
                aggregate_type: "wallet".to_string(),
                aggregate_id: params.user_id.clone(),
                version: state_version,
                user_id: Some(params.user_id.clone()),
                payload: serde_json::json!({
                    "main": next.main,
                    "bonus": next.bonus,
                    "stateVersion": state_version,
                    "ledgerType": params.ledger_type.as_str(),
                }),
            },
        )
        .await?;

        Ok(WalletSnapshot {
            main: next.main,
            bonus: next.bonus,
            state_version,
            ledger_id,
        })
    }

    pub async fn balance_of(&self, user_id: &str) -> DomainResult<WalletSnapshot> {
        let user = sqlx::query(
            "SELECT balance_main, balance_bonus, state_version FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DomainError::not_found("user not found"))?;
        Ok(WalletSnapshot {
            main: user.get("balance_main"),
            bonus: user.get("balance_bonus"),
            state_version: user.get("state_version"),
            ledger_id: String::new(),
        })
    }

    pub async fn deposit(
        &self,
        user_id: &str,
        amount: i64,
        request_id: Option<String>,
        metadata: serde_json::Value,
    ) -> DomainResult<WalletSnapshot> {
        if amount <= 0 {
            return Err(DomainError::validation("deposit amount must be positive"));
        }
        let lease = self.lock_user(user_id).await?;
        let result = async {
            let mut tx = self.pool.begin().await?;
            let already = self.request_already_applied(&mut tx, &request_id).await?;
            let snapshot = self
                .apply_mutation_in_session(
                    &mut tx,
                    MutationParams {
                        user_id: user_id.to_string(),
                        request_id: request_id.clone(),
                        ledger_type: LedgerType::Deposit,
                        delta_main: amount,
                        delta_bonus: 0,
                        metadata,
                    },
                )
                .await?;
            if !already {
                sqlx::query(
                    "UPDATE users SET total_deposited = total_deposited + ? WHERE id = ?",
                )
                .bind(amount)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(snapshot)
        }
        .await;
        self.unlock(&lease).await;
        result
    }

    pub async fn withdraw(
        &self,
        user_id: &str,
        amount: i64,
        request_id: Option<String>,
        metadata: serde_json::Value,
    ) -> DomainResult<WalletSnapshot> {
        if amount <= 0 {
            return Err(DomainError::validation("withdraw amount must be positive"));
        }
        let lease = self.lock_user(user_id).await?;
        let result = async {
            let mut tx = self.pool.begin().await?;
            let already = self.request_already_applied(&mut tx, &request_id).await?;
            let snapshot = self
                .apply_mutation_in_session(
                    &mut tx,
                    MutationParams {
                        user_id: user_id.to_string(),
                        request_id: request_id.clone(),
                        ledger_type: LedgerType::Withdraw,
                        delta_main: -amount,
                        delta_bonus: 0,
                        metadata,
                    },
                )
                .await?;
            if !already {
                sqlx::query(
                    "UPDATE users SET total_withdrawn = total_withdrawn + ? WHERE id = ?",
                )
                .bind(amount)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(snapshot)
        }
        .await;
        self.unlock(&lease).await;
        result
    }

    /// Move the same atomic amount between the two sub-balances.
    pub async fn exchange(
        &self,
        user_id: &str,
        from: BalanceKind,
        to: BalanceKind,
        amount: i64,
        request_id: Option<String>,
    ) -> DomainResult<WalletSnapshot> {
        if from == to {
            return Err(DomainError::validation("exchange requires two different balances"));
        }
        if amount <= 0 {
            return Err(DomainError::validation("exchange amount must be positive"));
        }
        let (delta_main, delta_bonus) = match from {
            BalanceKind::Main => (-amount, amount),
            BalanceKind::Bonus => (amount, -amount),
        };
        self.apply_mutation(MutationParams {
            user_id: user_id.to_string(),
            request_id,
            ledger_type: LedgerType::Exchange,
            delta_main,
            delta_bonus,
            metadata: serde_json::json!({ "from": from, "to": to }),
        })
        .await
    }

    /// Provider-rule gate in front of `withdraw`, used by the
    /// `wallet.withdraw.request` command.
    pub async fn request_withdraw(
        &self,
        user_id: &str,
        amount: i64,
        currency: &str,
        network: &str,
        address: &str,
        request_id: Option<String>,
        settings: &GameSettings,
    ) -> DomainResult<WalletSnapshot> {
        let rule = sqlx::query(
            "SELECT withdraw_min, withdraw_max FROM wallet_provider_currencies
             WHERE currency = ? AND network = ? AND enabled = 1",
        )
        .bind(currency)
        .bind(network)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DomainError::conflict("currency or network is not supported"))?;

        let min: i64 = rule.get("withdraw_min");
        let max: i64 = rule.get("withdraw_max");
        if amount < min || amount > max {
            return Err(DomainError::conflict(format!(
                "withdraw amount must be between {} and {} on this network",
                money::format_money(min, 2),
                money::format_money(max, 2)
            )));
        }

        let user = sqlx::query(
            "SELECT total_deposited, total_withdrawn FROM users WHERE id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DomainError::not_found("user not found"))?;

        let total_deposited: i64 = user.get("total_deposited");
        let total_withdrawn: i64 = user.get("total_withdrawn");

        let min_deposit =
            money::money_to_atomic(settings.withdraw.min_total_deposit).unwrap_or(0);
        if total_deposited < min_deposit {
            return Err(DomainError::conflict("deposit before withdrawing"));
        }

        let allowance = (total_deposited as f64 * settings.withdraw.profit_coefficient) as i64
            - total_withdrawn;
        if amount > allowance {
            return Err(DomainError::conflict("withdraw limit exceeded"));
        }

        self.withdraw(
            user_id,
            amount,
            request_id,
            serde_json::json!({
                "currency": currency,
                "network": network,
                "address": address,
            }),
        )
        .await
    }

    /// Credit one provider transfer reported by a deposit webhook.
    /// Replays collapse on the `oxapay:static:{trackId}:{txId}` request id.
    pub async fn credit_provider_deposit(
        &self,
        user_id: &str,
        track_id: &str,
        tx_id: &str,
        currency: &str,
        amount: i64,
    ) -> DomainResult<WalletSnapshot> {
        let request_id = format!("oxapay:static:{track_id}:{tx_id}");
        let lease = self.lock_user(user_id).await?;
        let result = async {
            let mut tx = self.pool.begin().await?;
            let already = self
                .request_already_applied(&mut tx, &Some(request_id.clone()))
                .await?;
            let snapshot = self
                .apply_mutation_in_session(
                    &mut tx,
                    MutationParams {
                        user_id: user_id.to_string(),
                        request_id: Some(request_id.clone()),
                        ledger_type: LedgerType::Deposit,
                        delta_main: amount,
                        delta_bonus: 0,
                        metadata: serde_json::json!({
                            "provider": "oxapay",
                            "trackId": track_id,
                            "txId": tx_id,
                            "currency": currency,
                        }),
                    },
                )
                .await?;
            if !already {
                sqlx::query(
                    "UPDATE users SET total_deposited = total_deposited + ? WHERE id = ?",
                )
                .bind(amount)
                .bind(user_id)
                .execute(&mut *tx)
                .await?;
                sqlx::query(
                    "INSERT INTO wallet_deposits (id, user_id, track_id, tx_id, currency, amount, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                )
                .bind(new_id())
                .bind(user_id)
                .bind(track_id)
                .bind(tx_id)
                .bind(currency)
                .bind(amount)
                .bind(now_ms())
                .execute(&mut *tx)
                .await?;
            }
            tx.commit().await?;
            Ok(snapshot)
        }
        .await;
        self.unlock(&lease).await;
        result
    }

    async fn request_already_applied(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        request_id: &Option<String>,
    ) -> DomainResult<bool> {
        let Some(request_id) = request_id else {
            return Ok(false);
        };
        let row = sqlx::query("SELECT 1 FROM wallet_ledger WHERE request_id = ?")
            .bind(request_id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row.is_some())
    }
}
