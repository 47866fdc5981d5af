// src/logging/mod.rs
pub mod csv;

use crate::config::Config;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Stdout (compact) plus a daily-rolling `relay.log` under the log dir.
/// Keep the guard alive for the process lifetime so the file writer flushes.
pub fn init_tracing(cfg: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("telemetry_relay=info,station_protocol=info,tokio=warn"));

    let (file_layer, guard) = match std::fs::create_dir_all(&cfg.log_dir) {
        Ok(()) => {
            let appender = tracing_appender::rolling::daily(&cfg.log_dir, "relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .with(file_layer)
        .init();
    guard
}
