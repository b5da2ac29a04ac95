use super::{channel_closed, checked_bet_atomic, new_round_hash, send_reply, GameDeps};
use crate::auth::AuthUser;
use crate::db::{new_id, now_ms};
use crate::error::{DomainError, DomainResult};
use crate::outbox::{append_event, NewEvent};
use crate::wallet::{LedgerType, MutationParams};
use games::{sample_wheel_color, wheel_angle, WheelColor};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const RESULT_DISPLAY_MS: u64 = 9_500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Phase {
    Betting,
    Resolved,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct WheelBet {
    user_id: String,
    username: String,
    color: WheelColor,
    amount: i64,
}

struct Round {
    id: String,
    hash: String,
    phase: Phase,
    countdown: i64,
    bets: Vec<WheelBet>,
    version: i64,
}

impl Round {
    fn new(countdown: i64) -> Self {
        Self {
            id: new_id(),
            hash: new_round_hash(),
            phase: Phase::Betting,
            countdown,
            bets: Vec::new(),
            version: 0,
        }
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "roundId": self.id,
            "hash": self.hash,
            "phase": self.phase,
            "countdownSec": self.countdown,
            "bets": self.bets,
            "version": self.version,
        })
    }
}

pub enum Command {
    Bet {
        user: AuthUser,
        amount: f64,
        color: WheelColor,
        request_id: String,
        reply: oneshot::Sender<DomainResult<serde_json::Value>>,
    },
    Snapshot {
        reply: oneshot::Sender<serde_json::Value>,
    },
}

#[derive(Clone)]
pub struct WheelHandle {
    tx: mpsc::Sender<Command>,
}

impl WheelHandle {
    pub async fn bet(
        &self,
        user: AuthUser,
        amount: f64,
        color: WheelColor,
        request_id: String,
    ) -> DomainResult<serde_json::Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Bet { user, amount, color, request_id, reply })
            .await
            .map_err(|_| channel_closed())?;
        rx.await.map_err(|_| channel_closed())?
    }

    pub async fn snapshot(&self) -> DomainResult<serde_json::Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| channel_closed())?;
        rx.await.map_err(|_| channel_closed())
    }
}

pub fn spawn(deps: GameDeps) -> WheelHandle {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(run(deps, rx));
    WheelHandle { tx }
}

async fn run(deps: GameDeps, mut rx: mpsc::Receiver<Command>) {
    loop {
        let countdown = match deps.settings.get().await {
            Ok(s) => s.wheel_countdown_seconds,
            Err(err) => {
                log::error!("wheel: settings unavailable: {err}");
                15
            }
        };
        let mut round = Round::new(countdown);
        let reset = round.snapshot();
        emit(&deps, &mut round, "wheel.reset", reset).await;

        let mut timer = tokio::time::interval(Duration::from_secs(1));
        timer.tick().await;
        while round.phase == Phase::Betting {
            tokio::select! {
                Some(cmd) = rx.recv() => handle_command(&deps, &mut round, cmd).await,
                _ = timer.tick() => {
                    round.countdown -= 1;
                    if round.countdown <= 0 {
                        round.phase = Phase::Resolved;
                        resolve(&deps, &mut round).await;
                    } else {
                        let payload = serde_json::json!({ "countdownSec": round.countdown });
                        emit(&deps, &mut round, "wheel.timer", payload).await;
                    }
                }
            }
        }

        // Let the client wheel animation land before the next round opens.
        let deadline = tokio::time::Instant::now() + Duration::from_millis(RESULT_DISPLAY_MS);
        loop {
            tokio::select! {
                Some(cmd) = rx.recv() => handle_command(&deps, &mut round, cmd).await,
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }
    }
}

async fn handle_command(deps: &GameDeps, round: &mut Round, cmd: Command) {
    match cmd {
        Command::Bet { user, amount, color, request_id, reply } => {
            let result = place_bet(deps, round, &user, amount, color, &request_id).await;
            send_reply(reply, result);
        }
        Command::Snapshot { reply } => send_reply(reply, round.snapshot()),
    }
}

async fn place_bet(
    deps: &GameDeps,
    round: &mut Round,
    user: &AuthUser,
    amount: f64,
    color: WheelColor,
    request_id: &str,
) -> DomainResult<serde_json::Value> {
    if round.phase != Phase::Betting {
        return Err(DomainError::conflict("not accepting bets"));
    }
    let settings = deps.settings.get().await?;
    let amount = checked_bet_atomic(amount, &settings.wheel)?;

    let balance = deps
        .wallet
        .apply_mutation(MutationParams {
            user_id: user.id.clone(),
            request_id: Some(format!("{}:{request_id}:bet", user.id)),
            ledger_type: LedgerType::GameBet,
            delta_main: -amount,
            delta_bonus: 0,
            metadata: serde_json::json!({
                "game": "wheel",
                "roundId": round.id,
                "color": color.as_str(),
            }),
        })
        .await?;

    round.bets.push(WheelBet {
        user_id: user.id.clone(),
        username: user.username.clone(),
        color,
        amount,
    });
    let snapshot = round.snapshot();
    emit(deps, round, "wheel.bet.placed", snapshot).await;

    Ok(serde_json::json!({
        "roundId": round.id,
        "amount": amount,
        "color": color.as_str(),
        "balance": balance,
    }))
}

async fn resolve(deps: &GameDeps, round: &mut Round) {
    let color = sample_wheel_color(&mut rand::thread_rng());
    let angle = wheel_angle(&mut rand::thread_rng(), color);
    let rate = color.rate();

    // One combined payout per user across their winning bets.
    let mut winnings: HashMap<String, i64> = HashMap::new();
    for bet in round.bets.iter().filter(|b| b.color == color) {
        *winnings.entry(bet.user_id.clone()).or_insert(0) += bet.amount * rate;
    }

    for (user_id, payout) in &winnings {
        let credited = deps
            .wallet
            .apply_mutation(MutationParams {
                user_id: user_id.clone(),
                request_id: Some(format!("wheel:{}:{user_id}", round.id)),
                ledger_type: LedgerType::GamePayout,
                delta_main: *payout,
                delta_bonus: 0,
                metadata: serde_json::json!({
                    "game": "wheel",
                    "roundId": round.id,
                    "color": color.as_str(),
                }),
            })
            .await;
        match credited {
            Ok(_) => {
                let staked: i64 = round
                    .bets
                    .iter()
                    .filter(|b| b.user_id == *user_id && b.color == color)
                    .map(|b| b.amount)
                    .sum();
                let profit = payout - staked;
                if profit > 0 {
                    let deps = deps.clone();
                    let user_id = user_id.clone();
                    let event_key = format!("wheel:{}:{user_id}", round.id);
                    tokio::spawn(async move {
                        deps.affiliate
                            .credit_from_referral_win(&user_id, profit, &event_key)
                            .await;
                    });
                }
            }
            Err(err) => log::error!("wheel: payout to {user_id} failed: {err}"),
        }
    }

    let history = sqlx::query(
        "INSERT INTO wheel_rounds (id, hash, color, angle, bets, created_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&round.id)
    .bind(&round.hash)
    .bind(color.as_str())
    .bind(angle)
    .bind(serde_json::to_string(&round.bets).unwrap_or_else(|_| "[]".into()))
    .bind(now_ms())
    .execute(&deps.pool)
    .await;
    if let Err(err) = history {
        log::error!("wheel: history append failed for round {}: {err}", round.id);
    }

    let payload = serde_json::json!({
        "color": color.as_str(),
        "rate": rate,
        "angle": angle,
        "hash": round.hash,
    });
    emit(deps, round, "wheel.roll", payload).await;
}

async fn emit(deps: &GameDeps, round: &mut Round, event_type: &str, payload: serde_json::Value) {
    round.version += 1;
    let appended = append_event(
        &deps.pool,
        NewEvent {
            event_type: event_type.to_string(),
            aggregate_type: "wheel".to_string(),
            aggregate_id: round.id.clone(),
            version: round.version,
            user_id: None,
            payload,
        },
    )
    .await;
    if let Err(err) = appended {
        log::warn!("wheel: failed to append {event_type}: {err}");
    }
}
