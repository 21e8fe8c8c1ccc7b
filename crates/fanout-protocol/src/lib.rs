//! Fanout Wire Protocol
//!
//! This crate defines the wire protocol shared between `fanout-client` and
//! `fanoutd`. All protocol payloads are ASCII text lines carried as the
//! first frame of a multipart message, with an optional second binary frame
//! for work-item payloads.
//!
//! # Wire Format
//!
//! One message on the wire:
//!
//! ```text
//! ┌─────────────────┬─────────────────┬──────────────────────────────┐
//! │ Length (4 bytes)│ Count (4 bytes) │ Parts (count times)          │
//! │ Big-endian u32  │ Big-endian u32  │ u32 BE length + raw bytes    │
//! └─────────────────┴─────────────────┴──────────────────────────────┘
//! ```
//!
//! The length covers everything after itself and is validated against
//! [`MAX_MESSAGE_SIZE`] before the body is read.
//!
//! # Payloads
//!
//! Broker → worker: `WORK_ITEM <id>` (optional payload frame), `HEARTBEAT`,
//! `DISCONNECT`. Worker → broker: `REGISTER <stride> <offset> <policy>
//! <client_name>`, `COMPLETE <id>`. Producer → broker: `[decimal id]` or
//! `[decimal id, payload]`; broker → producer: `[decimal id]` per completed
//! item. Numbers are ASCII decimal throughout; unknown verbs are protocol
//! errors.

mod error;
pub mod framing;
mod messages;
mod types;

pub use error::{ProtocolError, Result};
pub use messages::{
    encode_completion, encode_item, parse_completion, parse_item, BrokerMessage, Registration,
    WorkerMessage,
};
pub use types::{ItemId, QueuePolicy};

use std::time::Duration;

/// Interval between heartbeats sent to an idle worker.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_millis(500);

/// Poll timeout of the broker event loop.
pub const POLL_TIMEOUT: Duration = Duration::from_millis(1000);

/// A worker that receives no frame for this long must assume the broker is
/// dead, close its connection and re-register on a fresh one. Four heartbeat
/// intervals.
pub const WORKER_DEAD_PEER_TIMEOUT: Duration = Duration::from_millis(2000);

/// Maximum size of one wire message (64 MiB).
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;
