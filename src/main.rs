mod config;
mod entities;
mod http;
mod models;
mod state;
mod voting;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use migration::MigratorTrait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{ApiConfig, DatabaseConfig};
use crate::state::{ApiCache, AppState, BoardVoteService};
use crate::voting::VoteService;
use crate::voting::notify::LogNotifier;
use crate::voting::postgres::PgVotingRepository;

const POOL_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_POOL_SIZE: u32 = 128;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = ApiConfig::load().context("Failed to load board API configuration")?;
    let database = open_pool(&config.database).await?;
    migration::Migrator::up(&database, None)
        .await
        .context("Applying voting schema migrations failed")?;

    let votes = Arc::new(vote_service(&database, &config).await);
    let cache = Arc::new(ApiCache::new(&config.cache));
    let app = http::router(AppState::new(
        database,
        cache,
        votes,
        config.voting.clone(),
    ));

    let listener = TcpListener::bind(config.server.address())
        .await
        .with_context(|| format!("Cannot bind {}", config.server.address()))?;
    info!(
        addr = %listener.local_addr().context("Listener has no local address")?,
        roles = ?config.voting.eligible_roles,
        "Board voting API ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Board voting API stopped with an error")
}

/// `RUST_LOG` selects the filter; `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

async fn open_pool(settings: &DatabaseConfig) -> Result<DatabaseConnection> {
    let min_connections = settings.min_connections.unwrap_or(1);
    assert!(
        (min_connections..=MAX_POOL_SIZE).contains(&settings.max_connections),
        "Pool size must lie between min_connections and {MAX_POOL_SIZE}"
    );

    let mut options = ConnectOptions::new(settings.url.clone());
    options
        .max_connections(settings.max_connections)
        .min_connections(min_connections)
        .acquire_timeout(POOL_ACQUIRE_TIMEOUT)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug);

    Database::connect(options)
        .await
        .context("Cannot reach the board database")
}

async fn vote_service(database: &DatabaseConnection, config: &ApiConfig) -> BoardVoteService {
    let service = VoteService::new(
        PgVotingRepository::new(database.clone()),
        LogNotifier,
        config.voting.eligible_roles.clone(),
    );

    // Completions committed before a crash may still be waiting for delivery.
    match service.redeliver_pending(Utc::now().fixed_offset()).await {
        Ok(0) => {}
        Ok(delivered) => info!(delivered, "Pending voting completions delivered"),
        Err(err) => warn!("Pending completion redelivery failed: {err}"),
    }
    service
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down board voting API"),
        Err(err) => warn!("Shutdown signal listener failed: {err}"),
    }
}
