//! CLI argument parsing for the fanout broker.

use crate::config::Config;
use clap::Parser;
use std::time::Duration;

/// fanoutd - work-item fan-out broker
///
/// Accepts work items from one exclusive producer and fans them out to
/// dynamically connecting workers according to their declared stride/offset
/// filters and queue policies. Completions are reported back to the
/// producer exactly once per item.
#[derive(Parser, Debug)]
#[command(name = "fanoutd")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Endpoint the exclusive producer connects to
    #[arg(
        long,
        default_value = "tcp://127.0.0.1:5557",
        env = "FANOUT_PRODUCER_ENDPOINT"
    )]
    pub producer_endpoint: String,

    /// Endpoint workers connect to
    #[arg(
        long,
        default_value = "tcp://127.0.0.1:5558",
        env = "FANOUT_WORKER_ENDPOINT"
    )]
    pub worker_endpoint: String,

    /// Heartbeat interval for idle workers, in milliseconds
    #[arg(long, default_value = "500", env = "FANOUT_HEARTBEAT_MS")]
    pub heartbeat_ms: u64,

    /// Event-loop poll timeout, in milliseconds
    #[arg(long, default_value = "1000", env = "FANOUT_POLL_TIMEOUT_MS")]
    pub poll_timeout_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,
}

impl Cli {
    /// Convert CLI args to broker config
    pub fn to_config(&self) -> Config {
        Config {
            producer_endpoint: self.producer_endpoint.clone(),
            worker_endpoint: self.worker_endpoint.clone(),
            heartbeat_interval: Duration::from_millis(self.heartbeat_ms),
            poll_timeout: Duration::from_millis(self.poll_timeout_ms),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.heartbeat_ms == 0 {
            return Err("heartbeat_ms must be positive".to_string());
        }

        // Workers declare the broker dead after this long without traffic;
        // heartbeats slower than that would cause spurious reconnects.
        let dead_peer_ms = fanout_protocol::WORKER_DEAD_PEER_TIMEOUT.as_millis() as u64;
        if self.heartbeat_ms >= dead_peer_ms {
            return Err(format!(
                "heartbeat_ms ({}) must be below the worker dead-peer timeout ({} ms)",
                self.heartbeat_ms, dead_peer_ms
            ));
        }

        if self.poll_timeout_ms == 0 {
            return Err("poll_timeout_ms must be positive".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cli() {
        let cli = Cli::parse_from(["fanoutd"]);
        assert_eq!(cli.producer_endpoint, "tcp://127.0.0.1:5557");
        assert_eq!(cli.worker_endpoint, "tcp://127.0.0.1:5558");
        assert_eq!(cli.heartbeat_ms, 500);
        assert!(cli.validate().is_ok());
    }

    #[test]
    fn test_config_generation() {
        let cli = Cli::parse_from([
            "fanoutd",
            "--producer-endpoint",
            "tcp://0.0.0.0:7001",
            "--heartbeat-ms",
            "250",
        ]);
        let config = cli.to_config();
        assert_eq!(config.producer_endpoint, "tcp://0.0.0.0:7001");
        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
    }

    #[test]
    fn test_validation_rejects_slow_heartbeat() {
        let cli = Cli::parse_from(["fanoutd", "--heartbeat-ms", "60000"]);
        assert!(cli.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_zero_timings() {
        assert!(Cli::parse_from(["fanoutd", "--heartbeat-ms", "0"])
            .validate()
            .is_err());
        assert!(Cli::parse_from(["fanoutd", "--poll-timeout-ms", "0"])
            .validate()
            .is_err());
    }
}
