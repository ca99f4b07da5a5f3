//! Revisit — venue loyalty rewards that decay with time between visits.
//!
//! Main entry point that wires the store, redemption services, and the
//! HTTP API together.

use clap::Parser;
use revisit_api::ApiServer;
use revisit_core::config::{AppConfig, StoreBackend};
use revisit_core::rewards::VenueRecord;
use revisit_core::RewardStore;
use revisit_loyalty::{ConfirmationHandler, RedemptionCoordinator, SystemClock};
use revisit_store::{LocalStore, RedisStore};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "revisit")]
#[command(about = "Time-decaying visit rewards for restaurants and bars")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "REVISIT__NODE_ID")]
    node_id: Option<String>,

    /// HTTP port (overrides config)
    #[arg(long, env = "REVISIT__API__HTTP_PORT")]
    http_port: Option<u16>,

    /// Storage backend: memory or redis (overrides config)
    #[arg(long, env = "REVISIT__STORE__BACKEND")]
    store: Option<StoreBackend>,

    /// Register a venue with default tiers at startup (memory backend only)
    #[arg(long)]
    seed_venue: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "revisit=info,tower_http=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Revisit starting up");

    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(port) = cli.http_port {
        config.api.http_port = port;
    }
    if let Some(backend) = cli.store {
        config.store.backend = backend;
    }

    info!(
        node_id = %config.node_id,
        http_port = config.api.http_port,
        store = ?config.store.backend,
        max_redeem_attempts = config.rewards.max_redeem_attempts,
        "Configuration loaded"
    );

    let store: Arc<dyn RewardStore> = match config.store.backend {
        StoreBackend::Memory => {
            let local = Arc::new(LocalStore::new());
            for venue_id in &cli.seed_venue {
                local
                    .put_venue(VenueRecord::new(venue_id.as_str(), venue_id.as_str()))
                    .await?;
                info!(venue_id = %venue_id, "Seeded venue");
            }
            local as Arc<dyn RewardStore>
        }
        StoreBackend::Redis => {
            if !cli.seed_venue.is_empty() {
                warn!("Ignoring --seed-venue with the redis backend");
            }
            Arc::new(RedisStore::new(&config.redis).await.map_err(|e| {
                error!(error = %e, "Failed to connect to Redis");
                e
            })?)
        }
    };

    let clock = Arc::new(SystemClock);
    let coordinator = Arc::new(RedemptionCoordinator::new(
        store.clone(),
        clock.clone(),
        config.rewards.clone(),
    ));
    let confirmations = Arc::new(ConfirmationHandler::new(
        store,
        clock,
        config.rewards.max_redeem_attempts,
    ));

    let api_server = ApiServer::new(config, coordinator, confirmations);

    // Start metrics exporter
    if let Err(e) = api_server.start_metrics().await {
        error!(error = %e, "Failed to start metrics exporter");
    }

    info!("Revisit is ready to serve traffic");

    // Start HTTP server (blocks until shutdown)
    api_server.start_http().await?;

    Ok(())
}
