use crate::config::Config;
use crate::relay::{observer, topics::MissionTopics};
use crate::state::AppState;
use crate::station;
use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Bind the ground-station and web-observer namespaces.
pub async fn bind(cfg: &Config) -> Result<(TcpListener, TcpListener)> {
    let stations = TcpListener::bind(&cfg.station_addr)
        .await
        .with_context(|| format!("binding station listener {}", cfg.station_addr))?;
    let observers = TcpListener::bind(&cfg.observer_addr)
        .await
        .with_context(|| format!("binding observer listener {}", cfg.observer_addr))?;
    Ok((stations, observers))
}

/// One task per station connection; connections share nothing but `state`.
pub async fn serve_stations(listener: TcpListener, state: AppState) {
    loop {
        match listener.accept().await {
            Ok((sock, addr)) => {
                let _ = sock.set_nodelay(true);
                info!(peer = %addr, "station connected");
                tokio::spawn(station::run(sock, addr.to_string(), state.clone()));
            }
            Err(e) => warn!(?e, "station accept error"),
        }
    }
}

pub async fn serve_observers(listener: TcpListener, topics: MissionTopics) {
    loop {
        match listener.accept().await {
            Ok((sock, addr)) => {
                info!(peer = %addr, "observer connected");
                tokio::spawn(observer::run(sock, addr.to_string(), topics.clone()));
            }
            Err(e) => warn!(?e, "observer accept error"),
        }
    }
}
