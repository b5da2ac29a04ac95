#![allow(dead_code)]

use kazino_server::affiliate::AffiliateHook;
use kazino_server::auth::AuthService;
use kazino_server::config::Config;
use kazino_server::db;
use kazino_server::games::GameDeps;
use kazino_server::locks::LockManager;
use kazino_server::promo::PromoService;
use kazino_server::request_ledger::RequestLedger;
use kazino_server::settings::SettingsCache;
use kazino_server::wallet::WalletService;
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct TestCtx {
    pub pool: SqlitePool,
    pub locks: LockManager,
    pub wallet: WalletService,
    pub ledger: RequestLedger,
    pub settings: Arc<SettingsCache>,
    pub affiliate: AffiliateHook,
    pub auth: AuthService,
    pub promo: PromoService,
    pub deps: GameDeps,
}

pub async fn ctx() -> TestCtx {
    let pool = db::connect_in_memory().await.expect("in-memory pool");
    db::init_schema(&pool).await.expect("schema");

    let locks = LockManager::new(pool.clone());
    let wallet = WalletService::new(pool.clone(), locks.clone());
    let ledger = RequestLedger::new(pool.clone());
    let settings = Arc::new(SettingsCache::new(pool.clone()));
    let affiliate = AffiliateHook::new(pool.clone(), settings.clone());
    let config = Config::for_tests("sqlite::memory:");
    let auth = AuthService::new(pool.clone(), &config);
    let promo = PromoService::new(pool.clone(), wallet.clone());
    let deps = GameDeps {
        pool: pool.clone(),
        wallet: wallet.clone(),
        locks: locks.clone(),
        settings: settings.clone(),
        affiliate: affiliate.clone(),
    };

    TestCtx {
        pool,
        locks,
        wallet,
        ledger,
        settings,
        affiliate,
        auth,
        promo,
        deps,
    }
}

/// Insert a user directly with a seeded balance and the matching ledger
/// row, skipping the bcrypt cost of a real registration.
pub async fn seed_user(pool: &SqlitePool, username: &str, main_atomic: i64) -> String {
    let user_id = db::new_id();
    let now = db::now_ms();
    sqlx::query(
        "INSERT INTO users
            (id, username, password_hash, roles, balance_main, balance_bonus,
             state_version, token_version, created_at, updated_at)
         VALUES (?, ?, 'seeded', '[\"user\"]', ?, 0, 1, 0, ?, ?)",
    )
    .bind(&user_id)
    .bind(username)
    .bind(main_atomic)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .expect("seed user");

    sqlx::query(
        "INSERT INTO wallet_ledger
            (id, user_id, request_id, type, amount_main, amount_bonus,
             balance_main_after, balance_bonus_after, metadata, created_at)
         VALUES (?, ?, NULL, 'deposit', ?, 0, ?, 0, '{}', ?)",
    )
    .bind(db::new_id())
    .bind(&user_id)
    .bind(main_atomic)
    .bind(main_atomic)
    .bind(now)
    .execute(pool)
    .await
    .expect("seed ledger");

    user_id
}

pub async fn balance_main(pool: &SqlitePool, user_id: &str) -> i64 {
    use sqlx::Row;
    sqlx::query("SELECT balance_main FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("balance read")
        .get("balance_main")
}

pub async fn balance_bonus(pool: &SqlitePool, user_id: &str) -> i64 {
    use sqlx::Row;
    sqlx::query("SELECT balance_bonus FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .expect("balance read")
        .get("balance_bonus")
}

pub async fn ledger_rows(pool: &SqlitePool, user_id: &str, ledger_type: &str) -> i64 {
    use sqlx::Row;
    sqlx::query("SELECT COUNT(*) AS n FROM wallet_ledger WHERE user_id = ? AND type = ?")
        .bind(user_id)
        .bind(ledger_type)
        .fetch_one(pool)
        .await
        .expect("ledger count")
        .get("n")
}

/// Check the conservation invariant: balances equal the ledger sums.
pub async fn assert_ledger_conserved(pool: &SqlitePool, user_id: &str) {
    use sqlx::Row;
    let sums = sqlx::query(
        "SELECT COALESCE(SUM(amount_main), 0) AS main, COALESCE(SUM(amount_bonus), 0) AS bonus
         FROM wallet_ledger WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .expect("ledger sums");
    let main: i64 = sums.get("main");
    let bonus: i64 = sums.get("bonus");
    assert_eq!(main, balance_main(pool, user_id).await, "main balance drifted from ledger");
    assert_eq!(bonus, balance_bonus(pool, user_id).await, "bonus balance drifted from ledger");
    assert!(main >= 0 && bonus >= 0);
}
