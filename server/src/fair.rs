use crate::error::{DomainError, DomainResult};
use sqlx::{Row, SqlitePool};

/// Resolve an opaque round hash to its game and resolved number, letting a
/// player look up any historical result they hold a hash for.
pub async fn fair_check(pool: &SqlitePool, hash: &str) -> DomainResult<serde_json::Value> {
    if hash.is_empty() {
        return Err(DomainError::validation("hash is required"));
    }

    if let Some(row) = sqlx::query("SELECT color FROM wheel_rounds WHERE hash = ?")
        .bind(hash)
        .fetch_optional(pool)
        .await?
    {
        let color: String = row.get("color");
        let number = match color.as_str() {
            "black" => 2,
            "red" => 3,
            "green" => 5,
            _ => 50,
        };
        return Ok(serde_json::json!({ "game": "wheel", "number": number, "color": color }));
    }

    if let Some(row) = sqlx::query("SELECT crash_point_cents FROM crash_rounds WHERE hash = ?")
        .bind(hash)
        .fetch_optional(pool)
        .await?
    {
        let cents: i64 = row.get("crash_point_cents");
        return Ok(serde_json::json!({ "game": "crash", "number": cents as f64 / 100.0 }));
    }

    if let Some(row) = sqlx::query("SELECT roll FROM dice_games WHERE hash = ?")
        .bind(hash)
        .fetch_optional(pool)
        .await?
    {
        let roll: f64 = row.get("roll");
        return Ok(serde_json::json!({ "game": "dice", "number": roll }));
    }

    if let Some(row) = sqlx::query("SELECT winner_ticket FROM jackpot_rounds WHERE hash = ?")
        .bind(hash)
        .fetch_optional(pool)
        .await?
    {
        let ticket: Option<i64> = row.get("winner_ticket");
        return Ok(serde_json::json!({ "game": "jackpot", "number": ticket }));
    }

    if let Some(row) = sqlx::query("SELECT winner_ticket FROM coinflip_games WHERE hash = ?")
        .bind(hash)
        .fetch_optional(pool)
        .await?
    {
        let ticket: Option<i64> = row.get("winner_ticket");
        return Ok(serde_json::json!({ "game": "coinflip", "number": ticket }));
    }

    if let Some(row) = sqlx::query("SELECT winner_ticket FROM battle_rounds WHERE hash = ?")
        .bind(hash)
        .fetch_optional(pool)
        .await?
    {
        let ticket: Option<i64> = row.get("winner_ticket");
        return Ok(serde_json::json!({ "game": "battle", "number": ticket }));
    }

    Err(DomainError::not_found("no round with this hash"))
}
