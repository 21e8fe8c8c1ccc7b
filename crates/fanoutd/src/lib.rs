//! Fanout Broker Daemon (fanoutd)
//!
//! A single-process broker that accepts a stream of work items from one
//! exclusive producer and fans them out to dynamically connecting workers.
//! Each worker declares a stride/offset filter and a queueing discipline at
//! registration; the broker enforces per-worker ordering and at most one
//! outstanding item per worker, detects worker death through the transport,
//! and reports exactly one completion per item back to the producer once the
//! last worker holding it has released it.
//!
//! ## Quick Start
//!
//! ```bash
//! # Default endpoints
//! fanoutd
//!
//! # Explicit endpoints and faster heartbeats
//! fanoutd --producer-endpoint tcp://0.0.0.0:5557 \
//!         --worker-endpoint tcp://0.0.0.0:5558 \
//!         --heartbeat-ms 250
//! ```

pub mod cli;
pub mod config;
pub mod distributor;
pub mod item;
pub mod session;
pub mod transport;

pub use cli::Cli;
pub use config::Config;
pub use distributor::{Distributor, ShutdownHandle};
pub use item::{CompletionSink, Item};
pub use session::WorkerSession;
pub use transport::{Identity, RouterEvent, TransportError};
