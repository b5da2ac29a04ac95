use crate::admin::AdminService;
use crate::affiliate::AffiliateHook;
use crate::auth::AuthService;
use crate::bonus::BonusService;
use crate::chat::ChatService;
use crate::config::Config;
use crate::db;
use crate::error::DomainResult;
use crate::games::battle::BattleHandle;
use crate::games::crash::CrashHandle;
use crate::games::jackpot::{JackpotHandle, Room};
use crate::games::wheel::WheelHandle;
use crate::games::GameDeps;
use crate::gateway::connection::Registry;
use crate::locks::LockManager;
use crate::metrics::Metrics;
use crate::outbox::{spawn_tailer, EventBus};
use crate::promo::PromoService;
use crate::provider::{DisabledProvider, OxapayClient, ProviderClient};
use crate::request_ledger::RequestLedger;
use crate::settings::SettingsCache;
use crate::wallet::WalletService;
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;

const SWEEP_INTERVAL: Duration = Duration::from_secs(600);

/// Every service the gateway dispatches into, wired once at startup so
/// tests can substitute fakes (the provider in particular).
pub struct App {
    pub config: Config,
    pub pool: SqlitePool,
    pub locks: LockManager,
    pub wallet: WalletService,
    pub request_ledger: RequestLedger,
    pub bus: Arc<EventBus>,
    pub settings: Arc<SettingsCache>,
    pub metrics: Arc<Metrics>,
    pub auth: AuthService,
    pub promo: PromoService,
    pub chat: ChatService,
    pub admin: AdminService,
    pub bonus: BonusService,
    pub affiliate: AffiliateHook,
    pub provider: Arc<dyn ProviderClient>,
    pub registry: Arc<Registry>,
    pub game_deps: GameDeps,
    pub crash: CrashHandle,
    pub wheel: WheelHandle,
    pub battle: BattleHandle,
    jackpot_easy: JackpotHandle,
    jackpot_medium: JackpotHandle,
    jackpot_hard: JackpotHandle,
}

impl App {
    pub fn jackpot(&self, room: Room) -> &JackpotHandle {
        match room {
            Room::Easy => &self.jackpot_easy,
            Room::Medium => &self.jackpot_medium,
            Room::Hard => &self.jackpot_hard,
        }
    }
}

/// Connect to the configured database and bring the whole system up.
pub async fn bootstrap(config: Config) -> DomainResult<Arc<App>> {
    let pool = db::connect(&config.database_url).await?;
    db::init_schema(&pool).await?;

    let provider: Arc<dyn ProviderClient> = if config.provider_merchant_key.is_empty() {
        log::warn!("no merchant key configured, payments disabled");
        Arc::new(DisabledProvider)
    } else {
        Arc::new(OxapayClient::new(&config)?)
    };
    bootstrap_with(config, pool, provider).await
}

/// Bootstrap against an existing pool and provider, the test entry point.
pub async fn bootstrap_with(
    config: Config,
    pool: SqlitePool,
    provider: Arc<dyn ProviderClient>,
) -> DomainResult<Arc<App>> {
    let locks = LockManager::new(pool.clone());
    let wallet = WalletService::new(pool.clone(), locks.clone());
    let request_ledger = RequestLedger::new(pool.clone());
    let bus = Arc::new(EventBus::new(config.outbox_dedupe_window));
    let settings = Arc::new(SettingsCache::new(pool.clone()));
    let metrics = Arc::new(Metrics::new());
    let auth = AuthService::new(pool.clone(), &config);
    let promo = PromoService::new(pool.clone(), wallet.clone());
    let chat = ChatService::new(pool.clone());
    let admin = AdminService::new(pool.clone(), settings.clone());
    let bonus = BonusService::new(pool.clone(), wallet.clone(), settings.clone());
    let affiliate = AffiliateHook::new(pool.clone(), settings.clone());
    let registry = Registry::new();

    let game_deps = GameDeps {
        pool: pool.clone(),
        wallet: wallet.clone(),
        locks: locks.clone(),
        settings: settings.clone(),
        affiliate: affiliate.clone(),
    };

    let crash = crate::games::crash::spawn(game_deps.clone());
    let wheel = crate::games::wheel::spawn(game_deps.clone());
    let battle = crate::games::battle::spawn(game_deps.clone());
    let jackpot_easy = crate::games::jackpot::spawn(game_deps.clone(), Room::Easy);
    let jackpot_medium = crate::games::jackpot::spawn(game_deps.clone(), Room::Medium);
    let jackpot_hard = crate::games::jackpot::spawn(game_deps.clone(), Room::Hard);

    spawn_tailer(pool.clone(), bus.clone());
    spawn_broadcast_pump(bus.clone(), registry.clone(), metrics.clone());
    spawn_sweeper(pool.clone());

    Ok(Arc::new(App {
        config,
        pool,
        locks,
        wallet,
        request_ledger,
        bus,
        settings,
        metrics,
        auth,
        promo,
        chat,
        admin,
        bonus,
        affiliate,
        provider,
        registry,
        game_deps,
        crash,
        wheel,
        battle,
        jackpot_easy,
        jackpot_medium,
        jackpot_hard,
    }))
}

/// Bridge bus events into socket frames. Per-subscriber failures are
/// logged, never fatal.
fn spawn_broadcast_pump(bus: Arc<EventBus>, registry: Arc<Registry>, metrics: Arc<Metrics>) {
    tokio::spawn(async move {
        let mut rx = bus.subscribe();
        loop {
            match rx.recv().await {
                Ok(event) => registry.broadcast_event(&event, &metrics),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("broadcast pump lagged, {n} events dropped");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}

fn spawn_sweeper(pool: SqlitePool) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(SWEEP_INTERVAL).await;
            if let Err(err) = db::sweep_expired(&pool).await {
                log::warn!("expiry sweep failed: {err}");
            }
        }
    });
}
