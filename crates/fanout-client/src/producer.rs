//! Exclusive producer client.

use crate::error::{Error, Result};
use crate::endpoint_addr;
use bytes::{Bytes, BytesMut};
use fanout_protocol::{encode_item, framing, parse_completion, ItemId};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Client for the broker's producer endpoint.
///
/// The broker serves exactly one producer at a time; a second connection
/// while one is live is refused. Items are identified by a caller-assigned
/// [`ItemId`]; one completion id comes back per item, in the order the
/// broker released them.
pub struct Producer {
    stream: TcpStream,
    buffer: BytesMut,
}

impl Producer {
    /// Connect to the broker's producer endpoint (`tcp://host:port`).
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let addr = endpoint_addr(endpoint)?;
        info!("connecting producer to {endpoint}");
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| Error::Connection(e.to_string()))?;
        Ok(Self {
            stream,
            buffer: BytesMut::with_capacity(8192),
        })
    }

    /// Send one work item. An empty payload is sent as a bare id frame.
    pub async fn send_item(&mut self, id: ItemId, payload: &Bytes) -> Result<()> {
        framing::write_message(&mut self.stream, &encode_item(id, payload)).await?;
        debug!(id, "work item sent");
        Ok(())
    }

    /// Await the next completion notification.
    pub async fn recv_completion(&mut self) -> Result<ItemId> {
        let frames = framing::read_message(&mut self.stream, &mut self.buffer)
            .await?
            .ok_or(Error::Disconnected)?;
        let id = parse_completion(&frames)?;
        debug!(id, "completion received");
        Ok(id)
    }
}
