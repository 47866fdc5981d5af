// src/main.rs
mod auth;
mod config;
mod crypto;
mod errors;
mod logging;
mod net;
mod relay;
mod state;
mod station;
mod store;


use anyhow::Result;
use store::seed::{MemoryStores, SeedFile};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // -------- config + logging ----------
    let cfg = config::Cli::parse_and_build_config()?;
    let _log_guard = logging::init_tracing(&cfg);
    if cfg.audit {
        logging::csv::init(&cfg.log_dir);
    }
    info!(?cfg, "telemetry relay starting");

    // -------- stores ----------
    let stores = match &cfg.seed {
        Some(path) => MemoryStores::from_seed(SeedFile::load(path)?)?,
        None => MemoryStores::default(),
    };
    if stores.secrets.is_empty() {
        warn!(seed = ?cfg.seed, "no stations seeded; every station will be denied");
    }
    let state = state::AppState::new(&cfg, &stores);

    // -------- listeners ----------
    let (stations, observers) = net::tcp::bind(&cfg).await?;
    info!(
        stations = %stations.local_addr()?,
        observers = %observers.local_addr()?,
        "listening"
    );
    tokio::spawn(net::tcp::serve_stations(stations, state.clone()));
    tokio::spawn(net::tcp::serve_observers(observers, state.topics.clone()));

    info!("relay running. Press Ctrl+C to stop");

    // -------- graceful shutdown ----------
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(?e, "failed to install Ctrl+C handler");
    }
    info!("shutdown signal received; exiting.");
    Ok(())
}
