pub mod battle;
pub mod coinflip;
pub mod crash;
pub mod dice;
pub mod jackpot;
pub mod wheel;

use crate::affiliate::AffiliateHook;
use crate::error::{DomainError, DomainResult};
use crate::locks::LockManager;
use crate::settings::SettingsCache;
use crate::wallet::WalletService;
use rand::Rng;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Everything an orchestrator needs; cheap to clone into its task.
#[derive(Clone)]
pub struct GameDeps {
    pub pool: SqlitePool,
    pub wallet: WalletService,
    pub locks: LockManager,
    pub settings: Arc<SettingsCache>,
    pub affiliate: AffiliateHook,
}

/// Opaque round hash published with every round for later `fair.check`
/// lookups.
pub fn new_round_hash() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Parse and bound a bet amount against the configured table limits.
pub fn checked_bet_atomic(
    amount: f64,
    limits: &crate::settings::BetLimits,
) -> DomainResult<i64> {
    if !limits.check(amount) {
        return Err(DomainError::validation(format!(
            "bet must be between {} and {}",
            limits.min_bet, limits.max_bet
        )));
    }
    Ok(money::money_to_atomic(amount)?)
}

/// Route a command reply out of an orchestrator task; a dropped receiver
/// only means the socket went away mid-command.
pub(crate) fn send_reply<T>(reply: tokio::sync::oneshot::Sender<T>, value: T) {
    let _ = reply.send(value);
}

pub(crate) fn channel_closed() -> DomainError {
    DomainError::internal("game orchestrator is not running")
}
