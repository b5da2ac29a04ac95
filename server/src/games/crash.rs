use super::{channel_closed, checked_bet_atomic, new_round_hash, send_reply, GameDeps};
use crate::auth::AuthUser;
use crate::db::{new_id, now_ms};
use crate::error::{DomainError, DomainResult};
use crate::outbox::{append_event, NewEvent};
use crate::wallet::{LedgerType, MutationParams};
use games::{multiplier_at, sample_crash_point};
use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

pub const ROUND_RESTART_MS: u64 = 3_000;
const TICK_MS: u64 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Phase {
    Betting,
    Running,
    Ended,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct CrashBet {
    user_id: String,
    username: String,
    amount: i64,
    cashed_out: bool,
    cashout_multiplier: Option<f64>,
    payout: i64,
}

struct Round {
    id: String,
    hash: String,
    crash_point_cents: i64,
    phase: Phase,
    countdown: i64,
    started_at: Option<Instant>,
    current_cents: i64,
    graph: Vec<(u64, f64)>,
    bets: Vec<CrashBet>,
    version: i64,
}

impl Round {
    fn new(countdown: i64) -> Self {
        let crash_point = sample_crash_point(&mut rand::thread_rng());
        Self {
            id: new_id(),
            hash: new_round_hash(),
            crash_point_cents: (crash_point * 100.0).round() as i64,
            phase: Phase::Betting,
            countdown,
            started_at: None,
            current_cents: 100,
            graph: Vec::new(),
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
            "multiplier": self.current_cents as f64 / 100.0,
            "bets": self.bets,
            "version": self.version,
        })
    }
}

pub enum Command {
    Bet {
        user: AuthUser,
        amount: f64,
        request_id: String,
        reply: oneshot::Sender<DomainResult<serde_json::Value>>,
    },
    Cashout {
        user_id: String,
        at_multiplier: Option<f64>,
        request_id: String,
        reply: oneshot::Sender<DomainResult<serde_json::Value>>,
    },
    Snapshot {
        reply: oneshot::Sender<serde_json::Value>,
    },
}

#[derive(Clone)]
pub struct CrashHandle {
    tx: mpsc::Sender<Command>,
}

impl CrashHandle {
    pub async fn bet(
        &self,
        user: AuthUser,
        amount: f64,
        request_id: String,
    ) -> DomainResult<serde_json::Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Bet { user, amount, request_id, reply })
            .await
            .map_err(|_| channel_closed())?;
        rx.await.map_err(|_| channel_closed())?
    }

    pub async fn cashout(
        &self,
        user_id: String,
        at_multiplier: Option<f64>,
        request_id: String,
    ) -> DomainResult<serde_json::Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Cashout { user_id, at_multiplier, request_id, reply })
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

/// Spawn the crash orchestrator. All round state lives on this task;
/// commands arrive over the queue so concurrency control collapses to
/// single-task ordering plus the wallet locks taken inside mutations.
pub fn spawn(deps: GameDeps) -> CrashHandle {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(run(deps, rx));
    CrashHandle { tx }
}

async fn run(deps: GameDeps, mut rx: mpsc::Receiver<Command>) {
    loop {
        let countdown = match deps.settings.get().await {
            Ok(s) => s.crash_countdown_seconds,
            Err(err) => {
                log::error!("crash: settings unavailable: {err}");
                7
            }
        };
        let mut round = Round::new(countdown);
        let reset = round.snapshot();
        emit(&deps, &mut round, "crash.reset", reset).await;

        // Betting: 1 Hz countdown.
        let mut timer = tokio::time::interval(Duration::from_secs(1));
        timer.tick().await; // first tick is immediate
        while round.phase == Phase::Betting {
            tokio::select! {
                Some(cmd) = rx.recv() => handle_command(&deps, &mut round, cmd).await,
                _ = timer.tick() => {
                    round.countdown -= 1;
                    if round.countdown <= 0 {
                        round.phase = Phase::Running;
                        round.started_at = Some(Instant::now());
                    } else {
                        let payload = serde_json::json!({ "countdownSec": round.countdown });
                        emit(&deps, &mut round, "crash.timer", payload).await;
                    }
                }
            }
        }

        // Running: high-frequency multiplier ticks until the crash point.
        let mut ticker = tokio::time::interval(Duration::from_millis(TICK_MS));
        while round.phase == Phase::Running {
            tokio::select! {
                Some(cmd) = rx.recv() => handle_command(&deps, &mut round, cmd).await,
                _ = ticker.tick() => {
                    let elapsed = round
                        .started_at
                        .map(|t| t.elapsed().as_millis() as u64)
                        .unwrap_or(0);
                    let multiplier = multiplier_at(elapsed);
                    round.current_cents = (multiplier * 100.0).round() as i64;
                    if round.graph.len() < games::GRAPH_POINT_CAP {
                        round.graph.push((elapsed, multiplier));
                    }
                    if round.current_cents >= round.crash_point_cents {
                        round.phase = Phase::Ended;
                        round.current_cents = round.crash_point_cents;
                        finish_round(&deps, &mut round).await;
                    } else {
                        emit(&deps, &mut round, "crash.tick", serde_json::json!({
                            "multiplier": multiplier,
                            "elapsedMs": elapsed,
                        })).await;
                    }
                }
            }
        }

        // Ended: drain commands (they fail with phase conflicts) while the
        // client animation settles, then start over.
        let restart_at = Instant::now() + Duration::from_millis(ROUND_RESTART_MS);
        loop {
            let remaining = restart_at.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                Some(cmd) = rx.recv() => handle_command(&deps, &mut round, cmd).await,
                _ = tokio::time::sleep(remaining) => break,
            }
        }
    }
}

async fn handle_command(deps: &GameDeps, round: &mut Round, cmd: Command) {
    match cmd {
        Command::Bet { user, amount, request_id, reply } => {
            let result = place_bet(deps, round, &user, amount, &request_id).await;
            send_reply(reply, result);
        }
        Command::Cashout { user_id, at_multiplier, request_id, reply } => {
            let result = cashout(deps, round, &user_id, at_multiplier, &request_id).await;
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
    request_id: &str,
) -> DomainResult<serde_json::Value> {
    if round.phase != Phase::Betting {
        return Err(DomainError::conflict("not accepting bets"));
    }
    if round.bets.iter().any(|b| b.user_id == user.id) {
        return Err(DomainError::conflict("already betting this round"));
    }
    let settings = deps.settings.get().await?;
    let amount = checked_bet_atomic(amount, &settings.crash)?;

    let balance = deps
        .wallet
        .apply_mutation(MutationParams {
            user_id: user.id.clone(),
            request_id: Some(format!("{}:{request_id}:bet", user.id)),
            ledger_type: LedgerType::GameBet,
            delta_main: -amount,
            delta_bonus: 0,
            metadata: serde_json::json!({ "game": "crash", "roundId": round.id }),
        })
        .await?;

    round.bets.push(CrashBet {
        user_id: user.id.clone(),
        username: user.username.clone(),
        amount,
        cashed_out: false,
        cashout_multiplier: None,
        payout: 0,
    });
    let snapshot = round.snapshot();
    emit(deps, round, "crash.bet.placed", snapshot).await;

    Ok(serde_json::json!({
        "roundId": round.id,
        "amount": amount,
        "balance": balance,
    }))
}

async fn cashout(
    deps: &GameDeps,
    round: &mut Round,
    user_id: &str,
    at_multiplier: Option<f64>,
    request_id: &str,
) -> DomainResult<serde_json::Value> {
    if round.phase != Phase::Running {
        return Err(DomainError::conflict("round is not running"));
    }
    let current = round.current_cents as f64 / 100.0;
    let bet = round
        .bets
        .iter_mut()
        .find(|b| b.user_id == user_id)
        .ok_or_else(|| DomainError::conflict("no bet this round"))?;
    if bet.cashed_out {
        return Err(DomainError::conflict("already cashed out"));
    }

    // A requested auto-cashout multiplier can only lower the effective
    // value; nobody cashes out above the live multiplier.
    let effective = at_multiplier.map_or(current, |at| at.min(current)).max(1.0);
    let effective_cents = (effective * 100.0).round() as i64;
    let payout = (bet.amount as i128 * effective_cents as i128 / 100) as i64;

    let balance = deps
        .wallet
        .apply_mutation(MutationParams {
            user_id: user_id.to_string(),
            request_id: Some(format!("{user_id}:{request_id}:payout")),
            ledger_type: LedgerType::GamePayout,
            delta_main: payout,
            delta_bonus: 0,
            metadata: serde_json::json!({
                "game": "crash",
                "roundId": round.id,
                "multiplier": effective,
            }),
        })
        .await?;

    bet.cashed_out = true;
    bet.cashout_multiplier = Some(effective);
    bet.payout = payout;
    let amount = bet.amount;
    let snapshot = round.snapshot();
    emit(deps, round, "crash.cashout", snapshot).await;

    let profit = payout - amount;
    if profit > 0 {
        let deps = deps.clone();
        let user_id = user_id.to_string();
        let event_key = format!("crash:{}:{user_id}", round.id);
        tokio::spawn(async move {
            deps.affiliate
                .credit_from_referral_win(&user_id, profit, &event_key)
                .await;
        });
    }

    Ok(serde_json::json!({
        "roundId": round.id,
        "multiplier": effective,
        "payout": payout,
        "balance": balance,
    }))
}

async fn finish_round(deps: &GameDeps, round: &mut Round) {
    let crash_point = round.crash_point_cents as f64 / 100.0;
    // History append is best-effort; a bookkeeping failure must not halt
    // the round loop.
    let history = sqlx::query(
        "INSERT INTO crash_rounds (id, hash, crash_point_cents, bets, created_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&round.id)
    .bind(&round.hash)
    .bind(round.crash_point_cents)
    .bind(serde_json::to_string(&round.bets).unwrap_or_else(|_| "[]".into()))
    .bind(now_ms())
    .execute(&deps.pool)
    .await;
    if let Err(err) = history {
        log::error!("crash: history append failed for round {}: {err}", round.id);
    }

    let payload = serde_json::json!({
        "phase": "ended",
        "multiplier": crash_point,
        "crashPoint": crash_point,
        "hash": round.hash,
    });
    emit(deps, round, "crash.tick", payload).await;
    log::info!(
        "crash round {} ended at {crash_point}x with {} bets",
        round.id,
        round.bets.len()
    );
}

async fn emit(deps: &GameDeps, round: &mut Round, event_type: &str, payload: serde_json::Value) {
    round.version += 1;
    let appended = append_event(
        &deps.pool,
        NewEvent {
            event_type: event_type.to_string(),
            aggregate_type: "crash".to_string(),
            aggregate_id: round.id.clone(),
            version: round.version,
            user_id: None,
            payload,
        },
    )
    .await;
    if let Err(err) = appended {
        log::warn!("crash: failed to append {event_type}: {err}");
    }
}
