use clap::Parser;
use kazino_server::app;
use kazino_server::config::Config;
use kazino_server::gateway::http::build_router;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    dotenvy::dotenv().ok();

    let config = Config::parse();
    let port = config.port;
    let ws_path = config.ws_path.clone();

    let app = match app::bootstrap(config).await {
        Ok(app) => app,
        Err(err) => {
            log::error!("bootstrap failed: {err}");
            std::process::exit(1);
        }
    };

    let router = build_router(app);
    let addr = format!("0.0.0.0:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            log::error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };
    log::info!("listening on {addr}, websocket at {ws_path}");

    if let Err(err) = axum::serve(listener, router).await {
        log::error!("server stopped: {err}");
        std::process::exit(1);
    }
}
