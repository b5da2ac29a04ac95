use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;

/// Milliseconds since the epoch; every timestamp column stores this.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub async fn connect(database_url: &str) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .busy_timeout(std::time::Duration::from_secs(5));
    SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(options)
        .await
}

/// A single-connection in-memory pool for tests. One connection keeps every
/// statement on the same in-memory database.
pub async fn connect_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id TEXT PRIMARY KEY,
        username TEXT NOT NULL,
        password_hash TEXT NOT NULL,
        roles TEXT NOT NULL DEFAULT '[\"user\"]',
        balance_main INTEGER NOT NULL DEFAULT 0,
        balance_bonus INTEGER NOT NULL DEFAULT 0,
        state_version INTEGER NOT NULL DEFAULT 0,
        token_version INTEGER NOT NULL DEFAULT 0,
        affiliate_code TEXT,
        referred_by TEXT,
        referral_count INTEGER NOT NULL DEFAULT 0,
        referral_earnings INTEGER NOT NULL DEFAULT 0,
        total_deposited INTEGER NOT NULL DEFAULT 0,
        total_withdrawn INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_username
        ON users (username COLLATE NOCASE)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_users_affiliate_code
        ON users (affiliate_code) WHERE affiliate_code IS NOT NULL",
    "CREATE TABLE IF NOT EXISTS sessions (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        refresh_token_hash TEXT NOT NULL,
        expires_at INTEGER NOT NULL,
        revoked INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_refresh_hash
        ON sessions (refresh_token_hash)",
    "CREATE TABLE IF NOT EXISTS request_ledger (
        user_id TEXT NOT NULL,
        request_id TEXT NOT NULL,
        type TEXT NOT NULL,
        status TEXT NOT NULL,
        response TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, request_id)
    )",
    "CREATE TABLE IF NOT EXISTS locks (
        key TEXT PRIMARY KEY,
        owner_id TEXT NOT NULL,
        expires_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS event_outbox (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        event_id TEXT NOT NULL UNIQUE,
        type TEXT NOT NULL,
        aggregate_type TEXT NOT NULL,
        aggregate_id TEXT NOT NULL,
        version INTEGER NOT NULL,
        user_id TEXT,
        payload TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS wallet_ledger (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        request_id TEXT,
        type TEXT NOT NULL,
        amount_main INTEGER NOT NULL,
        amount_bonus INTEGER NOT NULL,
        balance_main_after INTEGER NOT NULL,
        balance_bonus_after INTEGER NOT NULL,
        metadata TEXT NOT NULL DEFAULT '{}',
        created_at INTEGER NOT NULL
    )",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_wallet_ledger_request
        ON wallet_ledger (request_id) WHERE request_id IS NOT NULL",
    "CREATE INDEX IF NOT EXISTS idx_wallet_ledger_user
        ON wallet_ledger (user_id, created_at)",
    "CREATE TABLE IF NOT EXISTS wallet_deposits (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        track_id TEXT NOT NULL,
        tx_id TEXT NOT NULL,
        currency TEXT NOT NULL,
        amount INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS wallet_static_addresses (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        currency TEXT NOT NULL,
        network TEXT NOT NULL,
        address TEXT NOT NULL,
        track_id TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        UNIQUE (user_id, currency, network)
    )",
    "CREATE TABLE IF NOT EXISTS wallet_provider_currencies (
        currency TEXT NOT NULL,
        network TEXT NOT NULL,
        withdraw_min INTEGER NOT NULL,
        withdraw_max INTEGER NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        updated_at INTEGER NOT NULL,
        PRIMARY KEY (currency, network)
    )",
    "CREATE TABLE IF NOT EXISTS promocodes (
        id TEXT PRIMARY KEY,
        code TEXT NOT NULL UNIQUE,
        reward_type TEXT NOT NULL,
        reward_amount INTEGER NOT NULL,
        max_redemptions INTEGER NOT NULL,
        current_redemptions INTEGER NOT NULL DEFAULT 0,
        active INTEGER NOT NULL DEFAULT 1,
        starts_at INTEGER,
        expires_at INTEGER,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS promo_redemptions (
        user_id TEXT NOT NULL,
        promo_id TEXT NOT NULL,
        amount INTEGER NOT NULL,
        request_id TEXT,
        created_at INTEGER NOT NULL,
        PRIMARY KEY (user_id, promo_id)
    )",
    "CREATE TABLE IF NOT EXISTS dice_games (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        amount INTEGER NOT NULL,
        chance REAL NOT NULL,
        direction TEXT NOT NULL,
        roll REAL NOT NULL,
        win INTEGER NOT NULL,
        payout INTEGER NOT NULL,
        hash TEXT NOT NULL,
        client_seed TEXT NOT NULL,
        nonce INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS dice_nonces (
        user_id TEXT PRIMARY KEY,
        nonce INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS crash_rounds (
        id TEXT PRIMARY KEY,
        hash TEXT NOT NULL,
        crash_point_cents INTEGER NOT NULL,
        bets TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS wheel_rounds (
        id TEXT PRIMARY KEY,
        hash TEXT NOT NULL,
        color TEXT NOT NULL,
        angle REAL NOT NULL,
        bets TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS jackpot_rounds (
        id TEXT PRIMARY KEY,
        room TEXT NOT NULL,
        hash TEXT NOT NULL,
        pot INTEGER NOT NULL,
        winner_user_id TEXT,
        winner_ticket INTEGER,
        total_tickets INTEGER NOT NULL,
        payout INTEGER NOT NULL,
        bets TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS coinflip_games (
        id TEXT PRIMARY KEY,
        hash TEXT NOT NULL,
        creator_id TEXT NOT NULL,
        joiner_id TEXT,
        amount INTEGER NOT NULL,
        creator_side TEXT NOT NULL,
        status TEXT NOT NULL,
        winner_ticket INTEGER,
        winner_user_id TEXT,
        payout INTEGER NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS battle_rounds (
        id TEXT PRIMARY KEY,
        hash TEXT NOT NULL,
        red_bank INTEGER NOT NULL,
        blue_bank INTEGER NOT NULL,
        winner_team TEXT,
        winner_ticket INTEGER,
        bets TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS chat_messages (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        username TEXT NOT NULL,
        text TEXT NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS bonus_spins (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        prize INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS affiliate_earnings (
        id TEXT PRIMARY KEY,
        event_key TEXT NOT NULL UNIQUE,
        user_id TEXT NOT NULL,
        source_user_id TEXT NOT NULL,
        amount INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS settings (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )",
];

pub async fn init_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    for ddl in SCHEMA {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

/// Replacement for the TTL indexes the document store gave us for free:
/// drop week-old request-ledger rows and long-expired lock rows.
pub async fn sweep_expired(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let now = now_ms();
    let week_ago = now - 7 * 24 * 3600 * 1000;
    sqlx::query("DELETE FROM request_ledger WHERE created_at < ?")
        .bind(week_ago)
        .execute(pool)
        .await?;
    sqlx::query("DELETE FROM locks WHERE expires_at < ?")
        .bind(now - 60_000)
        .execute(pool)
        .await?;
    Ok(())
}
