use super::{checked_bet_atomic, GameDeps};
use crate::auth::AuthUser;
use crate::db::{new_id, now_ms};
use crate::error::{DomainError, DomainResult};
use crate::outbox::{append_event, NewEvent};
use crate::wallet::{LedgerType, MutationParams};
use games::{dice_payout, dice_rate, dice_roll, dice_win, DiceDirection};
use rand::RngCore;
use serde::Deserialize;
use sqlx::Row;

const MIN_CHANCE: f64 = 1.0;
const MAX_CHANCE: f64 = 95.0;

#[derive(Debug, Deserialize)]
pub struct DiceBetParams {
    pub amount: f64,
    pub chance: f64,
    pub direction: DiceDirection,
    #[serde(default)]
    pub client_seed: Option<String>,
}

/// Request-driven dice: debit, derive the roll, credit on a win, all in
/// one transaction under the user's wallet lock. The two `:bet` and
/// `:payout` ledger request ids make the pair exactly-once.
pub async fn bet(
    deps: &GameDeps,
    user: &AuthUser,
    params: DiceBetParams,
    request_id: &str,
) -> DomainResult<serde_json::Value> {
    let settings = deps.settings.get().await?;
    let amount = checked_bet_atomic(params.amount, &settings.dice)?;
    if !(MIN_CHANCE..=MAX_CHANCE).contains(&params.chance) {
        return Err(DomainError::validation(format!(
            "chance must be between {MIN_CHANCE} and {MAX_CHANCE}"
        )));
    }
    let client_seed = params.client_seed.clone().unwrap_or_default();
    if client_seed.len() > 64 {
        return Err(DomainError::validation("clientSeed is too long"));
    }

    let lease = deps.wallet.lock_user(&user.id).await?;
    let result = bet_locked(deps, user, amount, &params, &client_seed, request_id).await;
    deps.wallet.unlock(&lease).await;

    let (response, profit, game_id) = result?;
    if profit > 0 {
        let deps = deps.clone();
        let user_id = user.id.clone();
        tokio::spawn(async move {
            deps.affiliate
                .credit_from_referral_win(&user_id, profit, &format!("dice:{game_id}"))
                .await;
        });
    }
    Ok(response)
}

async fn bet_locked(
    deps: &GameDeps,
    user: &AuthUser,
    amount: i64,
    params: &DiceBetParams,
    client_seed: &str,
    request_id: &str,
) -> DomainResult<(serde_json::Value, i64, String)> {
    let mut tx = deps.pool.begin().await?;

    // Client request ids are unique per user only; scope them before they
    // hit the globally-unique ledger column.
    let after_bet = deps
        .wallet
        .apply_mutation_in_session(
            &mut tx,
            MutationParams {
                user_id: user.id.clone(),
                request_id: Some(format!("{}:{request_id}:bet", user.id)),
                ledger_type: LedgerType::GameBet,
                delta_main: -amount,
                delta_bonus: 0,
                metadata: serde_json::json!({ "game": "dice" }),
            },
        )
        .await?;

    let nonce: i64 = sqlx::query(
        "INSERT INTO dice_nonces (user_id, nonce) VALUES (?, 1)
         ON CONFLICT (user_id) DO UPDATE SET nonce = nonce + 1
         RETURNING nonce",
    )
    .bind(&user.id)
    .fetch_one(&mut *tx)
    .await?
    .get("nonce");

    let mut server_seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut server_seed);
    let (hash, roll) = dice_roll(&server_seed, client_seed, nonce as u64);

    let rate = dice_rate(params.chance);
    let win = dice_win(roll, params.chance, params.direction);
    let payout = if win { dice_payout(amount, params.chance) } else { 0 };

    let balance = if win {
        deps.wallet
            .apply_mutation_in_session(
                &mut tx,
                MutationParams {
                    user_id: user.id.clone(),
                    request_id: Some(format!("{}:{request_id}:payout", user.id)),
                    ledger_type: LedgerType::GamePayout,
                    delta_main: payout,
                    delta_bonus: 0,
                    metadata: serde_json::json!({ "game": "dice" }),
                },
            )
            .await?
    } else {
        after_bet
    };

    let game_id = new_id();
    let direction = match params.direction {
        DiceDirection::Under => "under",
        DiceDirection::Over => "over",
    };
    sqlx::query(
        "INSERT INTO dice_games
            (id, user_id, amount, chance, direction, roll, win, payout, hash,
             client_seed, nonce, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&game_id)
    .bind(&user.id)
    .bind(amount)
    .bind(params.chance)
    .bind(direction)
    .bind(roll)
    .bind(win as i64)
    .bind(payout)
    .bind(&hash)
    .bind(client_seed)
    .bind(nonce)
    .bind(now_ms())
    .execute(&mut *tx)
    .await?;

    append_event(
        &mut *tx,
        NewEvent {
            event_type: "stream.bet.created".to_string(),
            aggregate_type: "dice".to_string(),
            aggregate_id: game_id.clone(),
            version: 1,
            user_id: None,
            payload: serde_json::json!({
                "game": "dice",
                "username": user.username,
                "amount": amount,
                "chance": params.chance,
                "direction": direction,
                "roll": roll,
                "win": win,
                "payout": payout,
            }),
        },
    )
    .await?;

    tx.commit().await?;

    let profit = payout - amount;
    let response = serde_json::json!({
        "gameId": game_id,
        "roll": roll,
        "win": win,
        "rate": rate,
        "payout": payout,
        "hash": hash,
        "nonce": nonce,
        "balance": balance,
    });
    Ok((response, profit, game_id))
}

/// Latest dice results for the public stream snapshot.
pub async fn recent(deps: &GameDeps, limit: i64) -> DomainResult<serde_json::Value> {
    let rows = sqlx::query(
        "SELECT d.id, d.amount, d.chance, d.direction, d.roll, d.win, d.payout,
                d.hash, d.created_at, u.username
         FROM dice_games d JOIN users u ON u.id = d.user_id
         ORDER BY d.created_at DESC LIMIT ?",
    )
    .bind(limit.clamp(1, 50))
    .fetch_all(&deps.pool)
    .await?;
    let games: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            serde_json::json!({
                "id": row.get::<String, _>("id"),
                "username": row.get::<String, _>("username"),
                "amount": row.get::<i64, _>("amount"),
                "chance": row.get::<f64, _>("chance"),
                "direction": row.get::<String, _>("direction"),
                "roll": row.get::<f64, _>("roll"),
                "win": row.get::<i64, _>("win") != 0,
                "payout": row.get::<i64, _>("payout"),
                "hash": row.get::<String, _>("hash"),
                "createdAt": row.get::<i64, _>("created_at"),
            })
        })
        .collect();
    Ok(serde_json::json!({ "games": games }))
}
