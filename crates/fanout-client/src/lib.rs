//! # fanout-client
//!
//! Native async client libraries for the fanout broker:
//!
//! - [`Producer`] — the exclusive producer: sends `(id, payload)` work
//!   items and receives one completion id per item once every worker that
//!   got it has finished (or released) it.
//! - [`Worker`] — registers a stride/offset filter and a queue policy,
//!   receives work items, and reports completions. A broker that stays
//!   silent past the dead-peer timeout surfaces as [`Error::DeadBroker`] so
//!   the caller can reconnect and re-register.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fanout_client::{Producer, Worker, BrokerMessage, QueuePolicy, Registration};
//! use bytes::Bytes;
//!
//! # async fn example() -> fanout_client::Result<()> {
//! let mut producer = Producer::connect("tcp://127.0.0.1:5557").await?;
//! let registration = Registration::new(2, 0, QueuePolicy::ReceiveAll, "analyzer")?;
//! let mut worker = Worker::connect("tcp://127.0.0.1:5558", registration).await?;
//!
//! producer.send_item(4, &Bytes::from_static(b"payload")).await?;
//!
//! if let BrokerMessage::WorkItem { id, .. } = worker.next().await? {
//!     worker.complete(id).await?;
//! }
//!
//! assert_eq!(producer.recv_completion().await?, 4);
//! # Ok(())
//! # }
//! ```

mod error;
mod producer;
mod worker;

pub use error::{Error, Result};
pub use producer::Producer;
pub use worker::Worker;

// Re-export the protocol types clients handle directly.
pub use fanout_protocol::{BrokerMessage, ItemId, QueuePolicy, Registration};

pub(crate) fn endpoint_addr(endpoint: &str) -> Result<&str> {
    endpoint.strip_prefix("tcp://").ok_or_else(|| {
        Error::Connection(format!("invalid endpoint {endpoint:?}: expected tcp://host:port"))
    })
}
