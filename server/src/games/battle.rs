use super::{channel_closed, checked_bet_atomic, new_round_hash, send_reply, GameDeps};
use crate::auth::AuthUser;
use crate::db::{new_id, now_ms};
use crate::error::{DomainError, DomainResult};
use crate::outbox::{append_event, NewEvent};
use crate::wallet::{BalanceKind, LedgerType, MutationParams};
use games::{battle_payout, battle_winner, red_ticket_end, BattleTeam};
use rand::Rng;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub const PAYOUT_DELAY_MS: u64 = 5_200;
pub const RESET_DELAY_MS: u64 = 7_000;
const MAX_BETS_PER_USER: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Phase {
    Betting,
    Resolved,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct BattleBet {
    user_id: String,
    username: String,
    team: BattleTeam,
    balance: BalanceKind,
    amount: i64,
}

struct Round {
    id: String,
    hash: String,
    phase: Phase,
    countdown: i64,
    countdown_started: bool,
    bets: Vec<BattleBet>,
    version: i64,
}

impl Round {
    fn new(countdown: i64) -> Self {
        Self {
            id: new_id(),
            hash: new_round_hash(),
            phase: Phase::Betting,
            countdown,
            countdown_started: false,
            bets: Vec::new(),
            version: 0,
        }
    }

    fn bank(&self, team: BattleTeam) -> i64 {
        self.bets
            .iter()
            .filter(|b| b.team == team)
            .map(|b| b.amount)
            .sum()
    }

    fn both_teams_present(&self) -> bool {
        self.bets.iter().any(|b| b.team == BattleTeam::Red)
            && self.bets.iter().any(|b| b.team == BattleTeam::Blue)
    }

    fn snapshot(&self) -> serde_json::Value {
        serde_json::json!({
            "roundId": self.id,
            "hash": self.hash,
            "phase": self.phase,
            "countdownSec": self.countdown,
            "redBank": self.bank(BattleTeam::Red),
            "blueBank": self.bank(BattleTeam::Blue),
            "bets": self.bets,
            "version": self.version,
        })
    }
}

pub enum Command {
    Bet {
        user: AuthUser,
        amount: f64,
        team: BattleTeam,
        balance: BalanceKind,
        request_id: String,
        reply: oneshot::Sender<DomainResult<serde_json::Value>>,
    },
    Snapshot {
        reply: oneshot::Sender<serde_json::Value>,
    },
}

#[derive(Clone)]
pub struct BattleHandle {
    tx: mpsc::Sender<Command>,
}

impl BattleHandle {
    pub async fn bet(
        &self,
        user: AuthUser,
        amount: f64,
        team: BattleTeam,
        balance: BalanceKind,
        request_id: String,
    ) -> DomainResult<serde_json::Value> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Bet { user, amount, team, balance, request_id, reply })
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

pub fn spawn(deps: GameDeps) -> BattleHandle {
    let (tx, rx) = mpsc::channel(256);
    tokio::spawn(run(deps, rx));
    BattleHandle { tx }
}

async fn run(deps: GameDeps, mut rx: mpsc::Receiver<Command>) {
    loop {
        let countdown = match deps.settings.get().await {
            Ok(s) => s.battle_countdown_seconds,
            Err(err) => {
                log::error!("battle: settings unavailable: {err}");
                20
            }
        };
        let mut round = Round::new(countdown);
        let reset = round.snapshot();
        emit(&deps, &mut round, "battle.reset", reset).await;

        let mut timer = tokio::time::interval(Duration::from_secs(1));
        timer.tick().await;
        while round.phase == Phase::Betting {
            tokio::select! {
                Some(cmd) = rx.recv() => handle_command(&deps, &mut round, cmd).await,
                _ = timer.tick() => {
                    // The countdown waits for at least one bettor per team.
                    if !round.countdown_started {
                        if round.both_teams_present() {
                            round.countdown_started = true;
                        } else {
                            continue;
                        }
                    }
                    round.countdown -= 1;
                    if round.countdown <= 0 {
                        round.phase = Phase::Resolved;
                        resolve(&deps, &mut round).await;
                    } else {
                        let payload = serde_json::json!({ "countdownSec": round.countdown });
                        emit(&deps, &mut round, "battle.timer", payload).await;
                    }
                }
            }
        }

        let reset_at = tokio::time::Instant::now() + Duration::from_millis(RESET_DELAY_MS);
        loop {
            tokio::select! {
                Some(cmd) = rx.recv() => handle_command(&deps, &mut round, cmd).await,
                _ = tokio::time::sleep_until(reset_at) => break,
            }
        }
    }
}

async fn handle_command(deps: &GameDeps, round: &mut Round, cmd: Command) {
    match cmd {
        Command::Bet { user, amount, team, balance, request_id, reply } => {
            let result = place_bet(deps, round, &user, amount, team, balance, &request_id).await;
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
    team: BattleTeam,
    balance: BalanceKind,
    request_id: &str,
) -> DomainResult<serde_json::Value> {
    if round.phase != Phase::Betting {
        return Err(DomainError::conflict("not accepting bets"));
    }
    let mine: Vec<&BattleBet> = round
        .bets
        .iter()
        .filter(|b| b.user_id == user.id)
        .collect();
    if mine.len() >= MAX_BETS_PER_USER {
        return Err(DomainError::conflict("bet limit for this round reached"));
    }
    // All of one user's bets ride the same team and the same sub-balance.
    if let Some(first) = mine.first() {
        if first.team != team {
            return Err(DomainError::conflict("already betting on the other team"));
        }
        if first.balance != balance {
            return Err(DomainError::conflict("already betting from the other balance"));
        }
    }
    let settings = deps.settings.get().await?;
    let amount = checked_bet_atomic(amount, &settings.battle)?;

    let (delta_main, delta_bonus) = match balance {
        BalanceKind::Main => (-amount, 0),
        BalanceKind::Bonus => (0, -amount),
    };
    let wallet_balance = deps
        .wallet
        .apply_mutation(MutationParams {
            user_id: user.id.clone(),
            request_id: Some(format!("{}:{request_id}:bet", user.id)),
            ledger_type: LedgerType::GameBet,
            delta_main,
            delta_bonus,
            metadata: serde_json::json!({
                "game": "battle",
                "roundId": round.id,
                "team": team.as_str(),
            }),
        })
        .await?;

    round.bets.push(BattleBet {
        user_id: user.id.clone(),
        username: user.username.clone(),
        team,
        balance,
        amount,
    });
    let snapshot = round.snapshot();
    emit(deps, round, "battle.bet.placed", snapshot).await;

    Ok(serde_json::json!({
        "roundId": round.id,
        "amount": amount,
        "team": team.as_str(),
        "balance": wallet_balance,
    }))
}

async fn resolve(deps: &GameDeps, round: &mut Round) {
    let red_bank = round.bank(BattleTeam::Red);
    let blue_bank = round.bank(BattleTeam::Blue);
    let total_bank = red_bank + blue_bank;
    if total_bank == 0 {
        return;
    }
    let red_chance_pct = red_bank as f64 / total_bank as f64 * 100.0;
    let red_end = red_ticket_end(red_chance_pct);
    let winner_ticket = rand::thread_rng().gen_range(1..=1_000);
    let winner_team = battle_winner(winner_ticket, red_end);
    let winner_bank = round.bank(winner_team);

    let history = sqlx::query(
        "INSERT INTO battle_rounds
            (id, hash, red_bank, blue_bank, winner_team, winner_ticket, bets, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&round.id)
    .bind(&round.hash)
    .bind(red_bank)
    .bind(blue_bank)
    .bind(winner_team.as_str())
    .bind(winner_ticket as i64)
    .bind(serde_json::to_string(&round.bets).unwrap_or_else(|_| "[]".into()))
    .bind(now_ms())
    .execute(&deps.pool)
    .await;
    if let Err(err) = history {
        log::error!("battle: history append failed for round {}: {err}", round.id);
    }

    let payload = serde_json::json!({
        "winnerTeam": winner_team.as_str(),
        "winnerTicket": winner_ticket,
        "redBank": red_bank,
        "blueBank": blue_bank,
        "hash": round.hash,
    });
    emit(deps, round, "battle.spin", payload).await;

    // Winners are credited after the client animation; payout failures are
    // logged, never fatal to the round loop.
    let settings = match deps.settings.get().await {
        Ok(s) => s,
        Err(err) => {
            log::error!("battle: settings unavailable for payout: {err}");
            return;
        }
    };
    let commission = settings.battle_commission_pct;

    let mut per_user: HashMap<String, (i64, BalanceKind)> = HashMap::new();
    for bet in round.bets.iter().filter(|b| b.team == winner_team) {
        let payout = battle_payout(bet.amount, total_bank, winner_bank, commission);
        let entry = per_user
            .entry(bet.user_id.clone())
            .or_insert((0, bet.balance));
        entry.0 += payout;
    }

    let deps = deps.clone();
    let round_id = round.id.clone();
    let stakes: HashMap<String, i64> = round
        .bets
        .iter()
        .filter(|b| b.team == winner_team)
        .fold(HashMap::new(), |mut acc, b| {
            *acc.entry(b.user_id.clone()).or_insert(0) += b.amount;
            acc
        });
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(PAYOUT_DELAY_MS)).await;
        for (user_id, (payout, balance)) in per_user {
            let (delta_main, delta_bonus) = match balance {
                BalanceKind::Main => (payout, 0),
                BalanceKind::Bonus => (0, payout),
            };
            let credited = deps
                .wallet
                .apply_mutation(MutationParams {
                    user_id: user_id.clone(),
                    request_id: Some(format!("battle:{round_id}:{user_id}")),
                    ledger_type: LedgerType::GamePayout,
                    delta_main,
                    delta_bonus,
                    metadata: serde_json::json!({ "game": "battle", "roundId": round_id }),
                })
                .await;
            match credited {
                Ok(_) => {
                    let profit = payout - stakes.get(&user_id).copied().unwrap_or(0);
                    if profit > 0 {
                        deps.affiliate
                            .credit_from_referral_win(
                                &user_id,
                                profit,
                                &format!("battle:{round_id}:{user_id}"),
                            )
                            .await;
                    }
                }
                Err(err) => log::error!("battle: payout to {user_id} failed: {err}"),
            }
        }
    });
}

async fn emit(deps: &GameDeps, round: &mut Round, event_type: &str, payload: serde_json::Value) {
    round.version += 1;
    let appended = append_event(
        &deps.pool,
        NewEvent {
            event_type: event_type.to_string(),
            aggregate_type: "battle".to_string(),
            aggregate_id: round.id.clone(),
            version: round.version,
            user_id: None,
            payload,
        },
    )
    .await;
    if let Err(err) = appended {
        log::warn!("battle: failed to append {event_type}: {err}");
    }
}
