//! Worker client: register, receive work, report completions.

use crate::error::{Error, Result};
use crate::endpoint_addr;
use bytes::BytesMut;
use fanout_protocol::{
    framing, BrokerMessage, ItemId, Registration, WorkerMessage, WORKER_DEAD_PEER_TIMEOUT,
};
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Client for the broker's worker endpoint.
///
/// Connecting sends the `REGISTER` message immediately; there is no
/// acknowledgment. The broker heartbeats idle workers, so a healthy
/// connection always carries frames: when nothing arrives for the
/// dead-peer timeout, [`Worker::next`] returns [`Error::DeadBroker`] and
/// the caller drops the client and connects again.
pub struct Worker {
    stream: TcpStream,
    buffer: BytesMut,
    dead_peer_timeout: Duration,
}

impl Worker {
    /// Connect to the broker's worker endpoint (`tcp://host:port`) and
    /// register.
    pub async fn connect(endpoint: &str, registration: Registration) -> Result<Self> {
        let addr = endpoint_addr(endpoint)?;
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        let mut worker = Self {
            stream,
            buffer: BytesMut::with_capacity(8192),
            dead_peer_timeout: WORKER_DEAD_PEER_TIMEOUT,
        };
        info!("registering with {endpoint} as {registration}");
        framing::write_message(
            &mut worker.stream,
            &WorkerMessage::Register(registration).to_frames(),
        )
        .await?;
        Ok(worker)
    }

    /// Override the dead-peer timeout. Must stay above the broker's
    /// heartbeat interval.
    pub fn set_dead_peer_timeout(&mut self, timeout: Duration) {
        self.dead_peer_timeout = timeout;
    }

    /// Receive the next broker message. Heartbeats are surfaced so the
    /// caller's receive loop doubles as the liveness clock.
    pub async fn next(&mut self) -> Result<BrokerMessage> {
        let read = framing::read_message(&mut self.stream, &mut self.buffer);
        let frames = match tokio::time::timeout(self.dead_peer_timeout, read).await {
            Ok(result) => result?.ok_or(Error::Disconnected)?,
            Err(_) => return Err(Error::DeadBroker(self.dead_peer_timeout)),
        };
        let message = BrokerMessage::from_frames(&frames)?;
        debug!(?message, "broker message");
        Ok(message)
    }

    /// Report completion of an outstanding item. The broker responds with
    /// the next waiting item, if any.
    pub async fn complete(&mut self, id: ItemId) -> Result<()> {
        framing::write_message(&mut self.stream, &WorkerMessage::Complete(id).to_frames())
            .await?;
        debug!(id, "completion sent");
        Ok(())
    }
}
