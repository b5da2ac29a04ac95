use crate::db::now_ms;
use crate::error::DomainResult;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Mutex;
use std::time::{Duration, Instant};

const SETTINGS_KEY: &str = "game";
const CACHE_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetLimits {
    pub min_bet: f64,
    pub max_bet: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JackpotRoomConfig {
    pub countdown_seconds: i64,
    pub min_bet: f64,
    pub max_bet: f64,
    pub max_bets_per_user: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawRules {
    /// Multiplier on cumulative deposits that caps lifetime withdrawals.
    pub profit_coefficient: f64,
    /// Minimum cumulative deposit before any withdraw is allowed, coins.
    pub min_total_deposit: f64,
}

/// Admin-tunable parameters, one JSON blob in the settings table. The
/// orchestrators re-read it through `SettingsCache`, so an
/// `admin.settings.save` takes effect within the cache TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameSettings {
    pub dice: BetLimits,
    pub crash: BetLimits,
    pub crash_countdown_seconds: i64,
    pub wheel: BetLimits,
    pub wheel_countdown_seconds: i64,
    pub jackpot_easy: JackpotRoomConfig,
    pub jackpot_medium: JackpotRoomConfig,
    pub jackpot_hard: JackpotRoomConfig,
    pub jackpot_commission_pct: f64,
    pub battle: BetLimits,
    pub battle_countdown_seconds: i64,
    pub battle_commission_pct: f64,
    pub coinflip: BetLimits,
    pub coinflip_commission_pct: f64,
    pub affiliate_commission_pct: f64,
    pub bonus_wheel_prizes: Vec<f64>,
    pub withdraw: WithdrawRules,
    pub site_name: String,
    pub maintenance: bool,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            dice: BetLimits { min_bet: 0.1, max_bet: 1_000.0 },
            crash: BetLimits { min_bet: 0.1, max_bet: 1_000.0 },
            crash_countdown_seconds: 7,
            wheel: BetLimits { min_bet: 0.1, max_bet: 500.0 },
            wheel_countdown_seconds: 15,
            jackpot_easy: JackpotRoomConfig {
                countdown_seconds: 30,
                min_bet: 0.1,
                max_bet: 10.0,
                max_bets_per_user: 3,
            },
            jackpot_medium: JackpotRoomConfig {
                countdown_seconds: 30,
                min_bet: 1.0,
                max_bet: 100.0,
                max_bets_per_user: 3,
            },
            jackpot_hard: JackpotRoomConfig {
                countdown_seconds: 30,
                min_bet: 10.0,
                max_bet: 1_000.0,
                max_bets_per_user: 3,
            },
            jackpot_commission_pct: 10.0,
            battle: BetLimits { min_bet: 0.1, max_bet: 500.0 },
            battle_countdown_seconds: 20,
            battle_commission_pct: 10.0,
            coinflip: BetLimits { min_bet: 0.1, max_bet: 1_000.0 },
            coinflip_commission_pct: 5.0,
            affiliate_commission_pct: 1.0,
            bonus_wheel_prizes: vec![0.0, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0],
            withdraw: WithdrawRules {
                profit_coefficient: 3.0,
                min_total_deposit: 10.0,
            },
            site_name: "kazino".to_string(),
            maintenance: false,
        }
    }
}

impl BetLimits {
    pub fn check(&self, amount: f64) -> bool {
        amount >= self.min_bet && amount <= self.max_bet
    }
}

/// TTL-cached view of the settings row; every read within 5 s of the last
/// load is served from memory.
pub struct SettingsCache {
    pool: SqlitePool,
    cached: Mutex<Option<(Instant, GameSettings)>>,
}

impl SettingsCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cached: Mutex::new(None),
        }
    }

    pub async fn get(&self) -> DomainResult<GameSettings> {
        if let Some((at, settings)) = self.cached.lock().expect("settings mutex").clone() {
            if at.elapsed() < CACHE_TTL {
                return Ok(settings);
            }
        }
        let settings = self.load().await?;
        *self.cached.lock().expect("settings mutex") =
            Some((Instant::now(), settings.clone()));
        Ok(settings)
    }

    async fn load(&self) -> DomainResult<GameSettings> {
        let row = sqlx::query("SELECT value FROM settings WHERE key = ?")
            .bind(SETTINGS_KEY)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => {
                let raw: String = row.get("value");
                match serde_json::from_str(&raw) {
                    Ok(settings) => Ok(settings),
                    Err(err) => {
                        log::error!("settings row is corrupt, using defaults: {err}");
                        Ok(GameSettings::default())
                    }
                }
            }
            None => Ok(GameSettings::default()),
        }
    }

    /// Persist new settings and drop the cache so the next read sees them.
    pub async fn save(&self, settings: &GameSettings) -> DomainResult<()> {
        let raw = serde_json::to_string(settings)
            .map_err(|err| crate::error::DomainError::internal(err.to_string()))?;
        sqlx::query(
            "INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(SETTINGS_KEY)
        .bind(raw)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        *self.cached.lock().expect("settings mutex") = None;
        Ok(())
    }
}
