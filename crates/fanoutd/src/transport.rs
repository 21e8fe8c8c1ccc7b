//! TCP transport for the broker's two channels.
//!
//! The distributor needs two properties the raw stream does not give it:
//! a point-to-point channel for the exclusive producer, and a router-style
//! channel for workers where every connection carries an opaque identity,
//! sends are addressed by identity and fail if the identity is unknown
//! (mandatory routing), and the loss of a peer surfaces as an explicit
//! disconnect event. Both are built from the shared multipart codec in
//! [`fanout_protocol::framing`]: a listener bound at construction, one
//! reader and one writer task per connection, unbounded channels into the
//! event loop.

use bytes::{Bytes, BytesMut};
use fanout_protocol::framing;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One message: an ordered sequence of frames.
pub type Multipart = Vec<Bytes>;

/// Errors from the broker-side transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid endpoint {0:?}: expected tcp://host:port")]
    InvalidEndpoint(String),

    #[error("bind {endpoint} failed: {source}")]
    Bind {
        endpoint: String,
        source: std::io::Error,
    },

    #[error("no producer connected")]
    NoProducer,

    #[error("unknown peer identity {0}")]
    UnknownPeer(Identity),

    #[error("peer {0} is gone")]
    PeerGone(Identity),
}

fn endpoint_addr(endpoint: &str) -> Result<&str, TransportError> {
    endpoint
        .strip_prefix("tcp://")
        .ok_or_else(|| TransportError::InvalidEndpoint(endpoint.to_string()))
}

async fn bind(endpoint: &str) -> Result<(TcpListener, SocketAddr), TransportError> {
    let addr = endpoint_addr(endpoint)?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        })?;
    let local_addr = listener
        .local_addr()
        .map_err(|source| TransportError::Bind {
            endpoint: endpoint.to_string(),
            source,
        })?;
    Ok((listener, local_addr))
}

// ============================================================================
// Producer channel
// ============================================================================

/// Point-to-point channel to the exclusive producer.
///
/// The broker binds; one producer is served at a time, and a second
/// connection while one is live is refused.
pub struct ProducerChannel {
    local_addr: SocketAddr,
    link: ProducerLink,
    inbox: mpsc::UnboundedReceiver<Multipart>,
}

impl ProducerChannel {
    pub async fn bind(endpoint: &str) -> Result<Self, TransportError> {
        let (listener, local_addr) = bind(endpoint).await?;
        let link = ProducerLink::new();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        tokio::spawn(accept_producers(listener, link.clone(), inbox_tx));
        Ok(Self::from_parts(local_addr, link, inbox))
    }

    pub(crate) fn from_parts(
        local_addr: SocketAddr,
        link: ProducerLink,
        inbox: mpsc::UnboundedReceiver<Multipart>,
    ) -> Self {
        Self {
            local_addr,
            link,
            inbox,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn link(&self) -> ProducerLink {
        self.link.clone()
    }

    pub async fn recv(&mut self) -> Option<Multipart> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Multipart> {
        self.inbox.try_recv().ok()
    }
}

/// Send half of the producer channel; clonable, usable while the accept
/// loop runs in the background.
#[derive(Clone)]
pub struct ProducerLink {
    peer: Arc<Mutex<Option<mpsc::UnboundedSender<Multipart>>>>,
}

impl ProducerLink {
    pub(crate) fn new() -> Self {
        Self {
            peer: Arc::new(Mutex::new(None)),
        }
    }

    /// Install a connected producer. Returns false (refusing the peer) if
    /// one is already live.
    pub(crate) fn attach(&self, tx: mpsc::UnboundedSender<Multipart>) -> bool {
        let mut peer = self.peer.lock();
        if peer.as_ref().is_some_and(|live| !live.is_closed()) {
            return false;
        }
        *peer = Some(tx);
        true
    }

    /// Clear the slot, but only if `tx` is still the installed peer; a
    /// newer producer may have replaced it already.
    pub(crate) fn detach(&self, tx: &mpsc::UnboundedSender<Multipart>) {
        let mut peer = self.peer.lock();
        if peer.as_ref().is_some_and(|live| live.same_channel(tx)) {
            *peer = None;
        }
    }

    /// Send one message to the connected producer.
    pub fn send(&self, frames: Multipart) -> Result<(), TransportError> {
        let mut peer = self.peer.lock();
        let Some(tx) = peer.as_ref() else {
            return Err(TransportError::NoProducer);
        };
        if tx.send(frames).is_err() {
            *peer = None;
            return Err(TransportError::NoProducer);
        }
        Ok(())
    }
}

async fn accept_producers(
    listener: TcpListener,
    link: ProducerLink,
    inbox: mpsc::UnboundedSender<Multipart>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("producer accept failed: {e}");
                continue;
            }
        };

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        if !link.attach(tx.clone()) {
            warn!("refusing second producer connection from {addr}");
            continue;
        }
        info!("producer connected from {addr}");

        tokio::spawn(write_loop(write_half, rx));

        let link = link.clone();
        let inbox = inbox.clone();
        tokio::spawn(async move {
            read_producer(read_half, &inbox).await;
            link.detach(&tx);
            info!("producer disconnected");
        });
    }
}

async fn read_producer(mut stream: OwnedReadHalf, inbox: &mpsc::UnboundedSender<Multipart>) {
    let mut buffer = BytesMut::with_capacity(8192);
    loop {
        match framing::read_message(&mut stream, &mut buffer).await {
            Ok(Some(frames)) => {
                if inbox.send(frames).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("producer read error: {e}");
                return;
            }
        }
    }
}

// ============================================================================
// Worker (router) channel
// ============================================================================

/// Opaque per-connection token assigned by the router channel. Monotonic
/// and never reused, so a map ordered by identity iterates sessions in
/// insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Identity(pub(crate) u64);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{:06}", self.0)
    }
}

/// One event from the worker channel.
#[derive(Debug)]
pub enum RouterEvent {
    /// Application message from a connected worker.
    Message {
        identity: Identity,
        frames: Multipart,
    },
    /// The transport lost this peer.
    Disconnected { identity: Identity },
}

/// Router-style channel the workers connect to.
pub struct RouterChannel {
    local_addr: SocketAddr,
    link: RouterLink,
    inbox: mpsc::UnboundedReceiver<RouterEvent>,
}

impl RouterChannel {
    pub async fn bind(endpoint: &str) -> Result<Self, TransportError> {
        let (listener, local_addr) = bind(endpoint).await?;
        let link = RouterLink::new();
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        tokio::spawn(accept_workers(listener, link.clone(), inbox_tx));
        Ok(Self::from_parts(local_addr, link, inbox))
    }

    pub(crate) fn from_parts(
        local_addr: SocketAddr,
        link: RouterLink,
        inbox: mpsc::UnboundedReceiver<RouterEvent>,
    ) -> Self {
        Self {
            local_addr,
            link,
            inbox,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn link(&self) -> RouterLink {
        self.link.clone()
    }

    pub async fn recv(&mut self) -> Option<RouterEvent> {
        self.inbox.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RouterEvent> {
        self.inbox.try_recv().ok()
    }
}

/// Send half of the worker channel, addressed by identity.
#[derive(Clone)]
pub struct RouterLink {
    peers: Arc<Mutex<HashMap<Identity, mpsc::UnboundedSender<Multipart>>>>,
}

impl RouterLink {
    pub(crate) fn new() -> Self {
        Self {
            peers: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(crate) fn attach(&self, identity: Identity, tx: mpsc::UnboundedSender<Multipart>) {
        self.peers.lock().insert(identity, tx);
    }

    /// Mandatory routing: sending to an identity with no live connection
    /// fails instead of being silently dropped.
    pub fn send(&self, identity: Identity, frames: Multipart) -> Result<(), TransportError> {
        let peers = self.peers.lock();
        let tx = peers
            .get(&identity)
            .ok_or(TransportError::UnknownPeer(identity))?;
        tx.send(frames)
            .map_err(|_| TransportError::PeerGone(identity))
    }

    /// Drop the connection to `identity`. Queued outbound frames are still
    /// written, then the write half shuts down; the reader's disconnect
    /// notice follows once the peer closes its side.
    pub fn close(&self, identity: Identity) {
        self.peers.lock().remove(&identity);
    }
}

async fn accept_workers(
    listener: TcpListener,
    link: RouterLink,
    inbox: mpsc::UnboundedSender<RouterEvent>,
) {
    let mut next_identity = 1u64;
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(connection) => connection,
            Err(e) => {
                warn!("worker accept failed: {e}");
                continue;
            }
        };

        let identity = Identity(next_identity);
        next_identity += 1;
        debug!("worker connection from {addr} as {identity}");

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::unbounded_channel();
        link.attach(identity, tx);
        tokio::spawn(write_loop(write_half, rx));

        let link = link.clone();
        let inbox = inbox.clone();
        tokio::spawn(async move {
            read_worker(identity, read_half, &inbox).await;
            link.close(identity);
            let _ = inbox.send(RouterEvent::Disconnected { identity });
        });
    }
}

async fn read_worker(
    identity: Identity,
    mut stream: OwnedReadHalf,
    inbox: &mpsc::UnboundedSender<RouterEvent>,
) {
    let mut buffer = BytesMut::with_capacity(8192);
    loop {
        match framing::read_message(&mut stream, &mut buffer).await {
            Ok(Some(frames)) => {
                if inbox.send(RouterEvent::Message { identity, frames }).is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                warn!("read error from {identity}: {e}");
                return;
            }
        }
    }
}

/// Drain outbound messages onto the socket until the sender side is
/// dropped, then shut the write half down.
async fn write_loop(mut stream: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Multipart>) {
    while let Some(frames) = rx.recv().await {
        if let Err(e) = framing::write_message(&mut stream, &frames).await {
            warn!("write failed: {e}");
            break;
        }
    }
    let _ = stream.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_parsing() {
        assert_eq!(endpoint_addr("tcp://127.0.0.1:5557").unwrap(), "127.0.0.1:5557");
        assert!(matches!(
            endpoint_addr("ipc:///tmp/sock"),
            Err(TransportError::InvalidEndpoint(_))
        ));
        assert!(matches!(
            endpoint_addr("127.0.0.1:5557"),
            Err(TransportError::InvalidEndpoint(_))
        ));
    }

    #[test]
    fn test_producer_link_exclusive_attach() {
        let link = ProducerLink::new();
        let (first_tx, first_rx) = mpsc::unbounded_channel();
        let (second_tx, _second_rx) = mpsc::unbounded_channel();

        assert!(link.attach(first_tx.clone()));
        assert!(!link.attach(second_tx.clone()), "live producer must be exclusive");

        // Once the first peer is gone its slot frees up.
        drop(first_rx);
        link.detach(&first_tx);
        assert!(link.attach(second_tx));
    }

    #[test]
    fn test_producer_send_without_peer_fails() {
        let link = ProducerLink::new();
        assert!(matches!(
            link.send(vec![Bytes::from_static(b"1")]),
            Err(TransportError::NoProducer)
        ));

        let (tx, mut rx) = mpsc::unbounded_channel();
        assert!(link.attach(tx));
        link.send(vec![Bytes::from_static(b"1")]).unwrap();
        assert_eq!(rx.try_recv().unwrap(), vec![Bytes::from_static(b"1")]);
    }

    #[test]
    fn test_router_mandatory_routing() {
        let link = RouterLink::new();
        let unknown = Identity(9);
        assert!(matches!(
            link.send(unknown, vec![Bytes::from_static(b"x")]),
            Err(TransportError::UnknownPeer(_))
        ));

        let identity = Identity(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        link.attach(identity, tx);
        link.send(identity, vec![Bytes::from_static(b"x")]).unwrap();
        assert!(rx.try_recv().is_ok());

        link.close(identity);
        assert!(matches!(
            link.send(identity, vec![Bytes::from_static(b"x")]),
            Err(TransportError::UnknownPeer(_))
        ));
    }
}
