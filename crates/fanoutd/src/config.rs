//! Broker configuration.

use fanout_protocol::{HEARTBEAT_INTERVAL, POLL_TIMEOUT};
use std::time::Duration;

/// Configuration for a [`Distributor`](crate::Distributor).
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint the exclusive producer connects to.
    pub producer_endpoint: String,
    /// Endpoint workers connect to.
    pub worker_endpoint: String,
    /// Interval between heartbeats to an idle worker. Must stay below the
    /// worker-side dead-peer timeout.
    pub heartbeat_interval: Duration,
    /// Poll timeout of the event loop; bounds how stale heartbeat deadlines
    /// can get while no traffic arrives.
    pub poll_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            producer_endpoint: "tcp://127.0.0.1:5557".to_string(),
            worker_endpoint: "tcp://127.0.0.1:5558".to_string(),
            heartbeat_interval: HEARTBEAT_INTERVAL,
            poll_timeout: POLL_TIMEOUT,
        }
    }
}
