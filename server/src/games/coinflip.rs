use super::{checked_bet_atomic, new_round_hash, GameDeps};
use crate::auth::AuthUser;
use crate::db::{new_id, now_ms};
use crate::error::{DomainError, DomainResult};
use crate::locks::{DEFAULT_TTL_MS, DEFAULT_WAIT_MS};
use crate::outbox::{append_event, NewEvent};
use crate::wallet::{LedgerType, MutationParams};
use games::{coinflip_payout, coinflip_winner, ticket_count, CoinflipSide};
use rand::Rng;
use serde::Deserialize;
use sqlx::Row;

#[derive(Debug, Deserialize)]
pub struct CoinflipCreateParams {
    pub amount: f64,
    pub side: CoinflipSide,
}

/// Open a game: debit the creator and park the stake until someone joins.
pub async fn create(
    deps: &GameDeps,
    user: &AuthUser,
    params: CoinflipCreateParams,
    request_id: &str,
) -> DomainResult<serde_json::Value> {
    let settings = deps.settings.get().await?;
    let amount = checked_bet_atomic(params.amount, &settings.coinflip)?;

    let balance = deps
        .wallet
        .apply_mutation(MutationParams {
            user_id: user.id.clone(),
            request_id: Some(format!("{}:{request_id}:bet", user.id)),
            ledger_type: LedgerType::GameBet,
            delta_main: -amount,
            delta_bonus: 0,
            metadata: serde_json::json!({ "game": "coinflip" }),
        })
        .await?;

    let game_id = new_id();
    let hash = new_round_hash();
    let side = match params.side {
        CoinflipSide::Heads => "heads",
        CoinflipSide::Tails => "tails",
    };
    let now = now_ms();
    let mut tx = deps.pool.begin().await?;
    sqlx::query(
        "INSERT INTO coinflip_games
            (id, hash, creator_id, amount, creator_side, status, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, 'open', ?, ?)",
    )
    .bind(&game_id)
    .bind(&hash)
    .bind(&user.id)
    .bind(amount)
    .bind(side)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?;
    append_event(
        &mut *tx,
        NewEvent {
            event_type: "coinflip.game.created".to_string(),
            aggregate_type: "coinflip".to_string(),
            aggregate_id: game_id.clone(),
            version: 1,
            user_id: None,
            payload: serde_json::json!({
                "gameId": game_id,
                "username": user.username,
                "amount": amount,
                "side": side,
            }),
        },
    )
    .await?;
    tx.commit().await?;

    Ok(serde_json::json!({
        "gameId": game_id,
        "hash": hash,
        "amount": amount,
        "side": side,
        "balance": balance,
    }))
}

#[derive(Debug, Deserialize)]
pub struct CoinflipJoinParams {
    pub game_id: String,
}

/// Close an open game: debit the joiner, draw the ticket, pay the winner.
/// The per-game lock serializes racing joiners; the wallet mutations take
/// one user lock at a time below it.
pub async fn join(
    deps: &GameDeps,
    user: &AuthUser,
    params: CoinflipJoinParams,
    request_id: &str,
) -> DomainResult<serde_json::Value> {
    let lock_key = format!("game:coinflip:{}", params.game_id);
    let lease = deps
        .locks
        .acquire(&lock_key, DEFAULT_WAIT_MS, DEFAULT_TTL_MS)
        .await?;
    let result = join_locked(deps, user, &params, request_id).await;
    if let Err(err) = deps.locks.release(&lease).await {
        log::warn!("failed to release {lock_key}: {err}");
    }

    let (response, winner_id, profit, game_id) = result?;
    if profit > 0 {
        let deps = deps.clone();
        tokio::spawn(async move {
            deps.affiliate
                .credit_from_referral_win(&winner_id, profit, &format!("coinflip:{game_id}"))
                .await;
        });
    }
    Ok(response)
}

async fn join_locked(
    deps: &GameDeps,
    user: &AuthUser,
    params: &CoinflipJoinParams,
    request_id: &str,
) -> DomainResult<(serde_json::Value, String, i64, String)> {
    let game = sqlx::query(
        "SELECT id, hash, creator_id, amount, creator_side, status FROM coinflip_games WHERE id = ?",
    )
    .bind(&params.game_id)
    .fetch_optional(&deps.pool)
    .await?
    .ok_or_else(|| DomainError::not_found("game not found"))?;

    let status: String = game.get("status");
    if status != "open" {
        return Err(DomainError::conflict("game is no longer open"));
    }
    let creator_id: String = game.get("creator_id");
    if creator_id == user.id {
        return Err(DomainError::conflict("cannot join your own game"));
    }
    let amount: i64 = game.get("amount");
    let hash: String = game.get("hash");
    let creator_side: String = game.get("creator_side");

    let joiner_balance = deps
        .wallet
        .apply_mutation(MutationParams {
            user_id: user.id.clone(),
            request_id: Some(format!("{}:{request_id}:bet", user.id)),
            ledger_type: LedgerType::GameBet,
            delta_main: -amount,
            delta_bonus: 0,
            metadata: serde_json::json!({ "game": "coinflip", "gameId": params.game_id }),
        })
        .await?;

    let creator_end = ticket_count(amount);
    let joiner_end = creator_end * 2;
    let winner_ticket = rand::thread_rng().gen_range(1..=joiner_end);
    let creator_wins = coinflip_winner(winner_ticket, creator_end);
    let winner_id = if creator_wins { creator_id.clone() } else { user.id.clone() };

    let settings = deps.settings.get().await?;
    let payout = coinflip_payout(amount, settings.coinflip_commission_pct);

    deps.wallet
        .apply_mutation(MutationParams {
            user_id: winner_id.clone(),
            request_id: Some(format!("coinflip:{}:payout", params.game_id)),
            ledger_type: LedgerType::GamePayout,
            delta_main: payout,
            delta_bonus: 0,
            metadata: serde_json::json!({ "game": "coinflip", "gameId": params.game_id }),
        })
        .await?;

    let now = now_ms();
    let mut tx = deps.pool.begin().await?;
    sqlx::query(
        "UPDATE coinflip_games
         SET joiner_id = ?, status = 'resolved', winner_ticket = ?, winner_user_id = ?,
             payout = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(&user.id)
    .bind(winner_ticket as i64)
    .bind(&winner_id)
    .bind(payout)
    .bind(now)
    .bind(&params.game_id)
    .execute(&mut *tx)
    .await?;
    append_event(
        &mut *tx,
        NewEvent {
            event_type: "coinflip.game.resolved".to_string(),
            aggregate_type: "coinflip".to_string(),
            aggregate_id: params.game_id.clone(),
            version: 2,
            user_id: None,
            payload: serde_json::json!({
                "gameId": params.game_id,
                "winnerTicket": winner_ticket,
                "winnerUserId": winner_id,
                "creatorWins": creator_wins,
                "creatorSide": creator_side,
                "payout": payout,
                "hash": hash,
            }),
        },
    )
    .await?;
    tx.commit().await?;

    let response = serde_json::json!({
        "gameId": params.game_id,
        "winnerTicket": winner_ticket,
        "creatorWins": creator_wins,
        "payout": payout,
        "hash": hash,
        "balance": joiner_balance,
    });
    Ok((response, winner_id, payout - amount, params.game_id.clone()))
}

/// Open games waiting for an opponent.
pub async fn list_open(deps: &GameDeps) -> DomainResult<serde_json::Value> {
    let rows = sqlx::query(
        "SELECT c.id, c.amount, c.creator_side, c.created_at, u.username
         FROM coinflip_games c JOIN users u ON u.id = c.creator_id
         WHERE c.status = 'open' ORDER BY c.created_at DESC LIMIT 50",
    )
    .fetch_all(&deps.pool)
    .await?;
    let open: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            serde_json::json!({
                "gameId": row.get::<String, _>("id"),
                "username": row.get::<String, _>("username"),
                "amount": row.get::<i64, _>("amount"),
                "side": row.get::<String, _>("creator_side"),
                "createdAt": row.get::<i64, _>("created_at"),
            })
        })
        .collect();
    Ok(serde_json::json!({ "games": open }))
}
