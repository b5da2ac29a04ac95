use clap::Parser;

/// Environment-derived configuration, the dealer-daemon way: every knob has
/// an env var and a default so a bare `kazino-server` starts against a
/// local database. Game parameters live in the settings table instead (see
/// `settings.rs`), editable at runtime.
#[derive(Parser, Debug, Clone)]
#[command(name = "kazino-server", about = "Kazino realtime casino gateway")]
pub struct Config {
    #[arg(long, env = "PORT", default_value = "8080")]
    pub port: u16,

    #[arg(long, env = "WS_PATH", default_value = "/ws")]
    pub ws_path: String,

    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://kazino.db?mode=rwc")]
    pub database_url: String,

    /// HS256 secret for access tokens
    #[arg(long, env = "JWT_ACCESS_SECRET", default_value = "dev-access-secret")]
    pub jwt_access_secret: String,

    /// HS256 secret for refresh tokens
    #[arg(long, env = "JWT_REFRESH_SECRET", default_value = "dev-refresh-secret")]
    pub jwt_refresh_secret: String,

    #[arg(long, env = "ACCESS_TTL_SECONDS", default_value = "900")]
    pub access_ttl_seconds: i64,

    #[arg(long, env = "REFRESH_TTL_SECONDS", default_value = "604800")]
    pub refresh_ttl_seconds: i64,

    #[arg(long, env = "LOCK_TTL_MS", default_value = "30000")]
    pub lock_ttl_ms: i64,

    #[arg(long, env = "LOCK_WAIT_MS", default_value = "8000")]
    pub lock_wait_ms: i64,

    /// Rolling dedupe window of the in-process event bus
    #[arg(long, env = "OUTBOX_DEDUPE_WINDOW", default_value = "10000")]
    pub outbox_dedupe_window: usize,

    #[arg(long, env = "OXAPAY_BASE_URL", default_value = "https://api.oxapay.com")]
    pub provider_base_url: String,

    #[arg(long, env = "OXAPAY_MERCHANT_KEY", default_value = "")]
    pub provider_merchant_key: String,

    #[arg(long, env = "OXAPAY_API_KEY", default_value = "")]
    pub provider_api_key: String,

    #[arg(long, env = "PROVIDER_TIMEOUT_SECONDS", default_value = "15")]
    pub provider_timeout_seconds: u64,

    /// Demo coins credited to a fresh account
    #[arg(long, env = "DEMO_START_BALANCE", default_value = "100")]
    pub demo_start_balance: i64,

    /// Bonus coins credited when registering with a valid referral code
    #[arg(long, env = "REFERRAL_BONUS", default_value = "5")]
    pub referral_bonus: i64,
}

impl Config {
    /// Defaults for tests; clap only parses argv in the binary.
    pub fn for_tests(database_url: &str) -> Self {
        let mut config = Config::parse_from(["kazino-server"]);
        config.database_url = database_url.to_string();
        config
    }

    pub fn demo_start_atomic(&self) -> i64 {
        self.demo_start_balance * money::SCALE
    }

    pub fn referral_bonus_atomic(&self) -> i64 {
        self.referral_bonus * money::SCALE
    }
}
