use crate::auth::AuthUser;
use crate::error::{DomainError, DomainResult};
use crate::settings::{GameSettings, SettingsCache};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

pub fn require_admin(user: &AuthUser) -> DomainResult<()> {
    if user.has_role("admin") {
        Ok(())
    } else {
        Err(DomainError::forbidden("admin role required"))
    }
}

#[derive(Clone)]
pub struct AdminService {
    pool: SqlitePool,
    settings: Arc<SettingsCache>,
}

impl AdminService {
    pub fn new(pool: SqlitePool, settings: Arc<SettingsCache>) -> Self {
        Self { pool, settings }
    }

    /// Replace the runtime-tunable game parameters. Orchestrators pick the
    /// change up within the settings cache TTL.
    pub async fn settings_save(&self, raw: serde_json::Value) -> DomainResult<GameSettings> {
        let settings: GameSettings = serde_json::from_value(raw)
            .map_err(|err| DomainError::validation(format!("bad settings: {err}")))?;
        self.settings.save(&settings).await?;
        Ok(settings)
    }

    pub async fn settings_get(&self) -> DomainResult<GameSettings> {
        self.settings.get().await
    }

    pub async fn users_list(&self, page: i64, per_page: i64) -> DomainResult<serde_json::Value> {
        let per_page = per_page.clamp(1, 100);
        let offset = page.max(0) * per_page;
        let rows = sqlx::query(
            "SELECT id, username, roles, balance_main, balance_bonus, state_version,
                    total_deposited, total_withdrawn, created_at
             FROM users ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(per_page)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        let users: Vec<serde_json::Value> = rows
            .iter()
            .map(|row| {
                serde_json::json!({
                    "id": row.get::<String, _>("id"),
                    "username": row.get::<String, _>("username"),
                    "roles": serde_json::from_str::<serde_json::Value>(&row.get::<String, _>("roles"))
                        .unwrap_or_default(),
                    "balance": {
                        "main": row.get::<i64, _>("balance_main"),
                        "bonus": row.get::<i64, _>("balance_bonus"),
                    },
                    "stateVersion": row.get::<i64, _>("state_version"),
                    "totalDeposited": row.get::<i64, _>("total_deposited"),
                    "totalWithdrawn": row.get::<i64, _>("total_withdrawn"),
                    "createdAt": row.get::<i64, _>("created_at"),
                })
            })
            .collect();
        Ok(serde_json::json!({ "users": users, "page": page }))
    }

    /// Upsert a provider currency row used by the withdraw-request gate.
    pub async fn save_provider_currency(
        &self,
        currency: &str,
        network: &str,
        withdraw_min: i64,
        withdraw_max: i64,
        enabled: bool,
    ) -> DomainResult<()> {
        sqlx::query(
            "INSERT INTO wallet_provider_currencies
                (currency, network, withdraw_min, withdraw_max, enabled, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT (currency, network) DO UPDATE SET
                withdraw_min = excluded.withdraw_min,
                withdraw_max = excluded.withdraw_max,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at",
        )
        .bind(currency)
        .bind(network)
        .bind(withdraw_min)
        .bind(withdraw_max)
        .bind(enabled as i64)
        .bind(crate::db::now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
