// src/main.rs
// Entry point: parses CLI args, wires config/store/auth/hub registry into
// an `AppState`, and serves the Gateway router (§4.8).
//
// Grounded on the teacher's `crates/mira-server/src/main.rs` (clap `Cli`
// wrapping an optional subcommand, level-appropriate tracing subscriber
// setup) and `crates/mira-server/src/proxy/server.rs::run()` for the
// `TcpListener::bind` + `axum::serve` bootstrap — the only place in the
// teacher pack that bootstraps an axum HTTP server this way.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hub_gateway::auth::AuthService;
use hub_gateway::config::AppConfig;
use hub_gateway::gateway::{create_router, AppState};
use hub_gateway::hub::HubRegistry;
use hub_gateway::ratelimit::RateLimiterRegistry;
use hub_gateway::store::Store;

#[derive(Parser)]
#[command(name = "hub-gateway")]
#[command(about = "Cloud-side control plane bridging agent plugins and clients")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WebSocket gateway (default).
    Serve {
        /// Override `GATEWAY_HOST:GATEWAY_PORT`.
        #[arg(long)]
        bind: Option<String>,
    },
    /// Validate configuration and exit without binding a listener.
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&hub_gateway::config::CONFIG.logging.level)))
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    hub_gateway::config::CONFIG.validate()?;

    match cli.command.unwrap_or(Commands::Serve { bind: None }) {
        Commands::CheckConfig => {
            println!("config OK, would bind to {}", hub_gateway::config::CONFIG.bind_address());
            Ok(())
        }
        Commands::Serve { bind } => run_server(bind).await,
    }
}

async fn run_server(bind_override: Option<String>) -> anyhow::Result<()> {
    let config: &AppConfig = &hub_gateway::config::CONFIG;

    hub_gateway::metrics::init_metrics();

    let store = Store::connect(
        &config.database.url,
        config.database.max_connections,
        config.media_root.clone(),
        config.media.clone(),
    )
    .await
    .map_err(|e| anyhow::anyhow!(e))?;

    let auth = Arc::new(AuthService::new(store.users.clone(), config.auth.clone()));
    let hubs = HubRegistry::new(store.clone(), config.socket.clone(), config.hub.clone(), config.auth.clone());
    let ratelimit = Arc::new(RateLimiterRegistry::new(config.auth_rate_limit_per_min));

    let state = AppState {
        store,
        hubs,
        auth,
        auth_config: config.auth.clone(),
        ratelimit,
    };

    let app = create_router(state, &config.cors.allowed_origins);

    let addr = bind_override.unwrap_or_else(|| config.bind_address());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, "hub gateway listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
