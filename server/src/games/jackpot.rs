use super::{channel_closed, new_round_hash, send_reply, GameDeps};
use crate::auth::AuthUser;
use crate::db::{new_id, now_ms};
use crate::error::{DomainError, DomainResult};
use crate::outbox::{append_event, NewEvent};
use crate::settings::JackpotRoomConfig;
use crate::wallet::{LedgerType, MutationParams};
use games::{jackpot_payout, tickets_for_bet, winning_bet_index};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const WINNER_PAYOUT_DELAY_MS: u64 = 6_200;
pub const SPIN_RESET_DELAY_MS: u64 = 8_200;
const PAYOUT_RETRY_MS: u64 = 1_000;

const PLAYER_COLORS: &[&str] = &[
    "#e6194b", "#3cb44b", "#ffe119", "#4363d8", "#f58231", "#911eb4", "#46f0f0", "#f032e6",
    "#bcf60c", "#fabebe", "#008080", "#e6beff",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Room {
    Easy,
    Medium,
    Hard,
}

impl Room {
    pub fn as_str(&self) -> &'static str {
        match self {
            Room::Easy => "easy",
            Room::Medium => "medium",
            Room::Hard => "hard",
        }
    }

    pub fn parse(s: &str) -> DomainResult<Room> {
        match s {
            "easy" => Ok(Room::Easy),
            "medium" => Ok(Room::Medium),
            "hard" => Ok(Room::Hard),
            _ => Err(DomainError::validation("unknown jackpot room")),
        }
    }

    fn config(&self, settings: &crate::settings::GameSettings) -> JackpotRoomConfig {
        match self {
            Room::Easy => settings.jackpot_easy.clone(),
            Room::Medium => settings.jackpot_medium.clone(),
            Room::Hard => settings.jackpot_hard.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Phase {
    Betting,
    Spinning,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct JackpotBet {
    user_id: String,
    username: String,
    color: String,
    amount: i64,
    tickets: u64,
}

struct PendingPayout {
    user_id: String,
    amount: i64,
    due_at: tokio::time::Instant,
}

struct Round {
    id: String,
    hash: String,
    phase: Phase,
    countdown: i64,
    bets: Vec<JackpotBet>,
    /// Set once the spin is committed; the crash-recovery path must never
    /// resolve a round twice.
    resolving: bool,
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
            resolving: false,
            version: 0,
        }
    }

    fn distinct_users(&self) -> usize {
        let mut seen: Vec<&str> = Vec::new();
        for bet in &self.bets {
            if !seen.contains(&bet.user_id.as_str()) {
                seen.push(&bet.user_id);
            }
        }
        seen.len()
    }

    fn pot(&self) -> i64 {
        self.bets.iter().map(|b| b.amount).sum()
    }

    fn snapshot(&self, room: Room) -> serde_json::Value {
        serde_json::json!({
            "room": room.as_str(),
            "roundId": self.id,
            "hash": self.hash,
            "phase": self.phase,
            "countdownSec": self.countdown,
            "pot": self.pot(),
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
    Snapshot {
        reply: oneshot::Sender<serde_json::Value>,
    },
}

#[derive(Clone)]
pub struct JackpotHandle {
    tx: mpsc::Sender<Command>,
}

impl JackpotHandle {
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

    pub async fn snapshot(&self) -> DomainResult<serde_json::Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .await
            .map_err(|_| channel_closed())?;
        rx.await.map_err(|_| channel_closed())
    }
}

pub fn spawn(deps: GameDeps, room: Room) -> JackpotHandle {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(run(deps, room, rx));
    JackpotHandle { tx }
}

async fn room_config(deps: &GameDeps, room: Room) -> JackpotRoomConfig {
    match deps.settings.get().await {
        Ok(settings) => room.config(&settings),
        Err(err) => {
            log::error!("jackpot[{}]: settings unavailable: {err}", room.as_str());
            JackpotRoomConfig {
                countdown_seconds: 30,
                min_bet: 0.1,
                max_bet: 1_000.0,
                max_bets_per_user: 3,
            }
        }
    }
}

async fn run(deps: GameDeps, room: Room, mut rx: mpsc::Receiver<Command>) {
    loop {
        let config = room_config(&deps, room).await;
        let mut round = Round::new(config.countdown_seconds);
        let reset = round.snapshot(room);
        emit(&deps, room, &mut round, "jackpot.reset", reset).await;

        let mut timer = tokio::time::interval(Duration::from_secs(1));
        timer.tick().await;
        while round.phase == Phase::Betting {
            tokio::select! {
                Some(cmd) = rx.recv() => handle_command(&deps, room, &mut round, cmd).await,
                _ = timer.tick() => {
                    // The countdown only runs once two distinct users are in.
                    if round.distinct_users() < 2 {
                        continue;
                    }
                    round.countdown -= 1;
                    if round.countdown <= 0 {
                        match resolve(&deps, room, &mut round).await {
                            Ok(()) => round.phase = Phase::Spinning,
                            Err(err) => {
                                log::error!(
                                    "jackpot[{}]: resolve failed: {err}", room.as_str()
                                );
                                if round.resolving {
                                    // The spin already committed; never
                                    // resolve again. Fall through to reset.
                                    round.phase = Phase::Spinning;
                                } else {
                                    round.countdown = 1;
                                }
                            }
                        }
                    } else {
                        let payload = serde_json::json!({ "countdownSec": round.countdown });
                        emit(&deps, room, &mut round, "jackpot.timer", payload).await;
                    }
                }
            }
        }

        drain_spin_phase(&deps, room, &mut round, &mut rx).await;
    }
}

async fn handle_command(deps: &GameDeps, room: Room, round: &mut Round, cmd: Command) {
    match cmd {
        Command::Bet { user, amount, request_id, reply } => {
            let result = place_bet(deps, room, round, &user, amount, &request_id).await;
            send_reply(reply, result);
        }
        Command::Snapshot { reply } => send_reply(reply, round.snapshot(room)),
    }
}

async fn place_bet(
    deps: &GameDeps,
    room: Room,
    round: &mut Round,
    user: &AuthUser,
    amount: f64,
    request_id: &str,
) -> DomainResult<serde_json::Value> {
    if round.phase != Phase::Betting || round.resolving {
        return Err(DomainError::conflict("not accepting bets"));
    }
    let config = room_config(deps, room).await;
    if amount < config.min_bet || amount > config.max_bet {
        return Err(DomainError::validation(format!(
            "bet must be between {} and {}",
            config.min_bet, config.max_bet
        )));
    }
    let existing = round
        .bets
        .iter()
        .filter(|b| b.user_id == user.id)
        .count() as u32;
    if existing >= config.max_bets_per_user {
        return Err(DomainError::conflict("bet limit for this round reached"));
    }
    let amount = money::money_to_atomic(amount)?;

    let balance = deps
        .wallet
        .apply_mutation(MutationParams {
            user_id: user.id.clone(),
            request_id: Some(format!("{}:{request_id}:bet", user.id)),
            ledger_type: LedgerType::GameBet,
            delta_main: -amount,
            delta_bonus: 0,
            metadata: serde_json::json!({
                "game": "jackpot",
                "room": room.as_str(),
                "roundId": round.id,
            }),
        })
        .await?;

    // A user keeps one stable color for the whole round.
    let color = round
        .bets
        .iter()
        .find(|b| b.user_id == user.id)
        .map(|b| b.color.clone())
        .unwrap_or_else(|| {
            let used: Vec<&str> = round.bets.iter().map(|b| b.color.as_str()).collect();
            let free: Vec<&&str> = PLAYER_COLORS
                .iter()
                .filter(|c| !used.contains(*c))
                .collect();
            let pick = if free.is_empty() {
                PLAYER_COLORS[rand::thread_rng().gen_range(0..PLAYER_COLORS.len())]
            } else {
                free[rand::thread_rng().gen_range(0..free.len())]
            };
            pick.to_string()
        });

    round.bets.push(JackpotBet {
        user_id: user.id.clone(),
        username: user.username.clone(),
        color,
        amount,
        tickets: tickets_for_bet(amount),
    });
    let snapshot = round.snapshot(room);
    emit(deps, room, round, "jackpot.bet.placed", snapshot).await;

    Ok(serde_json::json!({
        "room": room.as_str(),
        "roundId": round.id,
        "amount": amount,
        "balance": balance,
    }))
}

async fn resolve(deps: &GameDeps, room: Room, round: &mut Round) -> DomainResult<()> {
    let ticket_counts: Vec<u64> = round.bets.iter().map(|b| b.tickets).collect();
    let total_tickets: u64 = ticket_counts.iter().sum();
    if total_tickets == 0 {
        return Err(DomainError::conflict("round has no tickets"));
    }
    let winner_ticket = rand::thread_rng().gen_range(1..=total_tickets);
    let winner_index = winning_bet_index(&ticket_counts, winner_ticket)
        .ok_or_else(|| DomainError::internal("winner ticket out of range"))?;
    let winner = round.bets[winner_index].clone();

    let settings = deps.settings.get().await?;
    let pot = round.pot();
    let payout = jackpot_payout(pot, settings.jackpot_commission_pct);

    let history = sqlx::query(
        "INSERT INTO jackpot_rounds
            (id, room, hash, pot, winner_user_id, winner_ticket, total_tickets,
             payout, bets, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&round.id)
    .bind(room.as_str())
    .bind(&round.hash)
    .bind(pot)
    .bind(&winner.user_id)
    .bind(winner_ticket as i64)
    .bind(total_tickets as i64)
    .bind(payout)
    .bind(serde_json::to_string(&round.bets).unwrap_or_else(|_| "[]".into()))
    .bind(now_ms())
    .execute(&deps.pool)
    .await;
    if let Err(err) = history {
        log::error!("jackpot[{}]: history append failed: {err}", room.as_str());
    }

    round.resolving = true;
    let payload = serde_json::json!({
        "room": room.as_str(),
        "winnerTicket": winner_ticket,
        "winnerUserId": winner.user_id,
        "winnerUsername": winner.username,
        "totalTickets": total_tickets,
        "pot": pot,
        "payout": payout,
        "hash": round.hash,
    });
    emit(deps, room, round, "jackpot.spin", payload).await;

    Ok(())
}

/// After the spin event: hold the winner's credit until the client
/// animation finishes, keep serving snapshots, then reset the room.
async fn drain_spin_phase(
    deps: &GameDeps,
    room: Room,
    round: &mut Round,
    rx: &mut mpsc::Receiver<Command>,
) {
    let winner = winner_of(deps, round).await;
    let mut pending = winner.map(|(user_id, amount)| PendingPayout {
        user_id,
        amount,
        due_at: tokio::time::Instant::now() + Duration::from_millis(WINNER_PAYOUT_DELAY_MS),
    });
    let reset_at = tokio::time::Instant::now() + Duration::from_millis(SPIN_RESET_DELAY_MS);

    loop {
        let next_wake = match &pending {
            Some(p) if p.due_at < reset_at => p.due_at,
            _ => reset_at,
        };
        tokio::select! {
            Some(cmd) = rx.recv() => handle_command(deps, room, round, cmd).await,
            _ = tokio::time::sleep_until(next_wake) => {
                let now = tokio::time::Instant::now();
                let due = pending.as_ref().map(|p| now >= p.due_at).unwrap_or(false);
                if due {
                    let mut payout = pending.take().expect("pending payout present");
                    match credit_winner(deps, room, round, &payout).await {
                        Ok(()) => {}
                        Err(err) if err.retryable => {
                            log::warn!(
                                "jackpot[{}]: payout retry in {PAYOUT_RETRY_MS}ms: {err}",
                                room.as_str()
                            );
                            payout.due_at = now + Duration::from_millis(PAYOUT_RETRY_MS);
                            pending = Some(payout);
                        }
                        Err(err) => {
                            log::error!("jackpot[{}]: payout dropped: {err}", room.as_str());
                        }
                    }
                    continue;
                }
                // Reset only once no payout is still queued.
                if now >= reset_at && pending.is_none() {
                    return;
                }
            }
        }
    }
}

async fn winner_of(deps: &GameDeps, round: &Round) -> Option<(String, i64)> {
    let row = sqlx::query_as::<_, (String, i64)>(
        "SELECT winner_user_id, payout FROM jackpot_rounds WHERE id = ?",
    )
    .bind(&round.id)
    .fetch_optional(&deps.pool)
    .await
    .ok()
    .flatten()?;
    Some(row)
}

async fn credit_winner(
    deps: &GameDeps,
    room: Room,
    round: &Round,
    pending: &PendingPayout,
) -> DomainResult<()> {
    let snapshot = deps
        .wallet
        .apply_mutation(MutationParams {
            user_id: pending.user_id.clone(),
            request_id: Some(format!("jackpot:{}:payout", round.id)),
            ledger_type: LedgerType::GamePayout,
            delta_main: pending.amount,
            delta_bonus: 0,
            metadata: serde_json::json!({
                "game": "jackpot",
                "room": room.as_str(),
                "roundId": round.id,
            }),
        })
        .await;
    snapshot?;

    let staked: i64 = round
        .bets
        .iter()
        .filter(|b| b.user_id == pending.user_id)
        .map(|b| b.amount)
        .sum();
    let profit = pending.amount - staked;
    if profit > 0 {
        let deps = deps.clone();
        let user_id = pending.user_id.clone();
        let event_key = format!("jackpot:{}", round.id);
        tokio::spawn(async move {
            deps.affiliate
                .credit_from_referral_win(&user_id, profit, &event_key)
                .await;
        });
    }
    Ok(())
}

async fn emit(
    deps: &GameDeps,
    room: Room,
    round: &mut Round,
    event_type: &str,
    payload: serde_json::Value,
) {
    round.version += 1;
    let appended = append_event(
        &deps.pool,
        NewEvent {
            event_type: event_type.to_string(),
            aggregate_type: "jackpot".to_string(),
            aggregate_id: round.id.clone(),
            version: round.version,
            user_id: None,
            payload,
        },
    )
    .await;
    if let Err(err) = appended {
        log::warn!("jackpot[{}]: failed to append {event_type}: {err}", room.as_str());
    }
}
