//Command line interface
// runtime configuration (listeners, seed file, log dir)
use anyhow::{Result, bail};
use clap::Parser;
use station_protocol::{
    CHALLENGE_BYTES, DEFAULT_OBSERVER_PORT, DEFAULT_STATION_PORT, MAX_CHALLENGE_BYTES,
    MIN_CHALLENGE_BYTES,
};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub station_addr: String,
    pub observer_addr: String,
    pub seed: Option<PathBuf>,
    pub challenge_bytes: usize,
    pub log_dir: PathBuf,
    pub audit: bool,
    pub topic_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            station_addr: default_station_addr(),
            observer_addr: default_observer_addr(),
            seed: None,
            challenge_bytes: CHALLENGE_BYTES,
            log_dir: PathBuf::from("logs"),
            audit: true,
            topic_capacity: 256,
        }
    }
}

fn default_station_addr() -> String {
    format!("0.0.0.0:{DEFAULT_STATION_PORT}")
}

fn default_observer_addr() -> String {
    format!("0.0.0.0:{DEFAULT_OBSERVER_PORT}")
}

#[derive(Parser, Debug, Clone)]
#[command(name = "telemetry_relay", about = "Ground-station telemetry/command relay")]
pub struct Cli {
    #[arg(long, default_value_t = default_station_addr())]   pub station_addr: String,
    #[arg(long, default_value_t = default_observer_addr())]  pub observer_addr: String,
    /// TOML file with stations, packet types and queued commands
    #[arg(long)]                                  pub seed: Option<PathBuf>,
    #[arg(long, default_value_t = CHALLENGE_BYTES)]
    pub challenge_bytes: usize,
    #[arg(long, default_value = "logs")]          pub log_dir: PathBuf,
    /// Disable the CSV audit trail
    #[arg(long, default_value_t = false)]         pub no_audit: bool,
    #[arg(long, default_value_t = 256)]           pub topic_capacity: usize,
}

impl Cli {
    pub fn parse_and_build_config() -> Result<Config> {
        <Cli as Parser>::parse().into_config()
    }

    pub fn into_config(self) -> Result<Config> {
        if !(MIN_CHALLENGE_BYTES..=MAX_CHALLENGE_BYTES).contains(&self.challenge_bytes) {
            bail!(
                "--challenge-bytes must be within {MIN_CHALLENGE_BYTES}..={MAX_CHALLENGE_BYTES} (got {})",
                self.challenge_bytes
            );
        }
        if self.topic_capacity == 0 {
            bail!("--topic-capacity must be positive");
        }
        Ok(Config {
            station_addr: self.station_addr,
            observer_addr: self.observer_addr,
            seed: self.seed,
            challenge_bytes: self.challenge_bytes,
            log_dir: self.log_dir,
            audit: !self.no_audit,
            topic_capacity: self.topic_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_ports() {
        let cfg = Cli::try_parse_from(["telemetry_relay"]).unwrap().into_config().unwrap();
        assert_eq!(cfg.station_addr, "0.0.0.0:7891");
        assert_eq!(cfg.observer_addr, "0.0.0.0:7892");
        assert_eq!(cfg.station_addr, Config::default().station_addr);
        assert_eq!(cfg.challenge_bytes, 256);
        assert!(cfg.audit);
    }

    #[test]
    fn rejects_short_challenges() {
        let cli = Cli::try_parse_from(["telemetry_relay", "--challenge-bytes", "8"]).unwrap();
        assert!(cli.into_config().is_err());
    }

    #[test]
    fn rejects_challenges_that_cannot_fit_a_frame() {
        let cli = Cli::try_parse_from(["telemetry_relay", "--challenge-bytes", "600000"]).unwrap();
        assert!(cli.into_config().is_err());

        let max = MAX_CHALLENGE_BYTES.to_string();
        let cli = Cli::try_parse_from(["telemetry_relay", "--challenge-bytes", max.as_str()]).unwrap();
        assert_eq!(cli.into_config().unwrap().challenge_bytes, MAX_CHALLENGE_BYTES);
    }

    #[test]
    fn no_audit_flag() {
        let cfg = Cli::try_parse_from(["telemetry_relay", "--no-audit", "--seed", "seed.toml"])
            .unwrap()
            .into_config()
            .unwrap();
        assert!(!cfg.audit);
        assert_eq!(cfg.seed, Some(PathBuf::from("seed.toml")));
    }
}
