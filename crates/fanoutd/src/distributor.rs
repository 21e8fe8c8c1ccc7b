//! The distributor: event loop, dispatch, and completion plumbing.

use crate::config::Config;
use crate::item::{CompletionSink, Item};
use crate::session::WorkerSession;
use crate::transport::{
    Identity, Multipart, ProducerChannel, ProducerLink, RouterChannel, RouterEvent, RouterLink,
};
use fanout_protocol::{
    encode_completion, parse_item, BrokerMessage, ItemId, QueuePolicy, Registration, WorkerMessage,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Requests termination of a running [`Distributor`]; clonable and safe to
/// call from anywhere, including signal handlers.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// What woke the event loop this turn.
enum Turn {
    Producer(Multipart),
    Worker(RouterEvent),
    Tick,
    Shutdown,
    ChannelClosed(&'static str),
}

/// The broker core. Owns the producer channel, the worker channel, the
/// session table and the completion sink; all state is confined to the one
/// task running [`Distributor::run`], so dispatch needs no locking.
pub struct Distributor {
    config: Config,
    producer: ProducerChannel,
    producer_link: ProducerLink,
    router: RouterChannel,
    router_link: RouterLink,
    sessions: BTreeMap<Identity, WorkerSession>,
    completed: CompletionSink,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Distributor {
    /// Bind both endpoints. A bind failure is fatal and surfaced here.
    pub async fn bind(config: Config) -> anyhow::Result<Self> {
        let producer = ProducerChannel::bind(&config.producer_endpoint).await?;
        let router = RouterChannel::bind(&config.worker_endpoint).await?;
        info!(
            producer = %producer.local_addr(),
            workers = %router.local_addr(),
            "distributor listening"
        );
        Ok(Self::assemble(config, producer, router))
    }

    fn assemble(config: Config, producer: ProducerChannel, router: RouterChannel) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let producer_link = producer.link();
        let router_link = router.link();
        Self {
            config,
            producer,
            producer_link,
            router,
            router_link,
            sessions: BTreeMap::new(),
            completed: CompletionSink::new(),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
        }
    }

    /// Address the producer endpoint is bound to. Useful for tests where
    /// port 0 is used for random port selection.
    pub fn producer_addr(&self) -> SocketAddr {
        self.producer.local_addr()
    }

    /// Address the worker endpoint is bound to.
    pub fn worker_addr(&self) -> SocketAddr {
        self.router.local_addr()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown_tx.clone(),
        }
    }

    /// Run the event loop until [`ShutdownHandle::shutdown`] is called.
    ///
    /// Each turn: wait for traffic (bounded by the poll timeout), drain
    /// whatever both channels already have queued, emit due heartbeats,
    /// then flush pending completions to the producer.
    pub async fn run(mut self) -> anyhow::Result<()> {
        loop {
            let turn = tokio::select! {
                _ = self.shutdown_rx.changed() => Turn::Shutdown,
                message = self.producer.recv() => match message {
                    Some(frames) => Turn::Producer(frames),
                    None => Turn::ChannelClosed("producer"),
                },
                event = self.router.recv() => match event {
                    Some(event) => Turn::Worker(event),
                    None => Turn::ChannelClosed("worker"),
                },
                _ = tokio::time::sleep(self.config.poll_timeout) => Turn::Tick,
            };

            let shutdown = match turn {
                Turn::Producer(frames) => {
                    self.on_producer_message(frames);
                    false
                }
                Turn::Worker(event) => {
                    self.on_worker_event(event);
                    false
                }
                Turn::Tick => false,
                Turn::Shutdown => true,
                Turn::ChannelClosed(name) => {
                    anyhow::bail!("{name} channel task ended unexpectedly")
                }
            };

            while let Some(frames) = self.producer.try_recv() {
                self.on_producer_message(frames);
            }
            while let Some(event) = self.router.try_recv() {
                self.on_worker_event(event);
            }

            self.send_heartbeats(Instant::now());
            self.flush_completions();

            if shutdown {
                break;
            }
        }
        self.disconnect_all();
        Ok(())
    }

    /// Handle one frame from the producer: construct the shared item and
    /// offer it to every matching session.
    fn on_producer_message(&mut self, frames: Multipart) {
        let (id, payload) = match parse_item(&frames) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("dropping malformed producer frame: {e}");
                return;
            }
        };
        debug!(id, "work item from producer");
        let item = Item::new(self.completed.clone(), id, payload);

        for (identity, session) in self.sessions.iter_mut() {
            if !session.wants(id) {
                continue;
            }
            if session.policy() == QueuePolicy::PrebufferOne {
                // Only the newest matching item survives while busy; a
                // superseded one may complete right here.
                session.clear_waiting();
            }
            if session.is_idle() {
                session.add_outstanding(item.clone());
                send_work_item(&self.router_link, *identity, &item);
            } else if session.policy() != QueuePolicy::Skip {
                session.push_waiting(item.clone());
            }
        }

        // If no session kept a reference, this drop completes the item and
        // the flush below notifies the producer in the same turn.
        drop(item);
        self.flush_completions();
    }

    /// Handle one event from the worker channel.
    fn on_worker_event(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::Disconnected { identity } => {
                info!("disconnect notice from {identity}");
                // Dropping the session releases its item references;
                // anything held only here completes immediately.
                if self.sessions.remove(&identity).is_none() {
                    warn!("disconnect notice from unknown identity {identity}");
                }
            }
            RouterEvent::Message { identity, frames } => {
                match WorkerMessage::from_frames(&frames) {
                    Ok(WorkerMessage::Register(registration)) => {
                        self.register(identity, registration)
                    }
                    Ok(WorkerMessage::Complete(id)) => self.complete(identity, id),
                    Err(e) => {
                        warn!("protocol error from {identity}: {e}");
                        self.force_disconnect(identity);
                    }
                }
            }
        }
        self.flush_completions();
    }

    fn register(&mut self, identity: Identity, registration: Registration) {
        info!("registered {identity} as {registration}");
        // A repeated REGISTER replaces the session; the old one drops its
        // item references on the way out.
        self.sessions
            .insert(identity, WorkerSession::new(registration));
    }

    fn complete(&mut self, identity: Identity, id: ItemId) {
        match self.sessions.get_mut(&identity) {
            None => {
                warn!("completion from unregistered identity {identity}");
                self.force_disconnect(identity);
            }
            Some(session) => match session.complete(id) {
                Err(e) => {
                    warn!("protocol error from {identity}: {e}");
                    self.force_disconnect(identity);
                }
                Ok(()) => {
                    debug!(id, %identity, "item completed");
                    if let Some(item) = session.pop_waiting() {
                        session.add_outstanding(item.clone());
                        send_work_item(&self.router_link, identity, &item);
                    }
                }
            },
        }
    }

    /// Close a misbehaving connection: best-effort DISCONNECT, then drop
    /// the peer and its session. The session's item references return to
    /// the pool through the normal shared-release path.
    fn force_disconnect(&mut self, identity: Identity) {
        if let Err(e) = self
            .router_link
            .send(identity, BrokerMessage::Disconnect.to_frames())
        {
            debug!("disconnect send to {identity} failed: {e}");
        }
        self.router_link.close(identity);
        self.sessions.remove(&identity);
    }

    /// Emit heartbeats to idle sessions past their deadline.
    fn send_heartbeats(&mut self, now: Instant) {
        for (identity, session) in self.sessions.iter_mut() {
            if !session.heartbeat_due(now) {
                continue;
            }
            if let Err(e) = self
                .router_link
                .send(*identity, BrokerMessage::Heartbeat.to_frames())
            {
                error!("heartbeat send to {identity} failed: {e}");
            }
            session.schedule_heartbeat(now + self.config.heartbeat_interval);
        }
    }

    /// Drain the completion sink to the producer in release order. On a
    /// transport error the flush aborts; the remainder stays queued and is
    /// retried next turn.
    fn flush_completions(&mut self) {
        while let Some(id) = self.completed.front() {
            if let Err(e) = self.producer_link.send(encode_completion(id)) {
                warn!("completion flush stopped: {e}");
                return;
            }
            self.completed.pop_front();
            debug!(id, "completion sent to producer");
        }
    }

    /// Shutdown path: tell every worker to go away, release all sessions,
    /// and flush whatever completions that produced.
    fn disconnect_all(&mut self) {
        let identities: Vec<Identity> = self.sessions.keys().copied().collect();
        for identity in identities {
            if let Err(e) = self
                .router_link
                .send(identity, BrokerMessage::Disconnect.to_frames())
            {
                debug!("disconnect send to {identity} failed: {e}");
            }
            self.router_link.close(identity);
        }
        self.sessions.clear();
        self.flush_completions();
        info!("distributor stopped");
    }
}

fn send_work_item(link: &RouterLink, identity: Identity, item: &Item) {
    let message = BrokerMessage::WorkItem {
        id: item.id(),
        payload: item.payload().clone(),
    };
    if let Err(e) = link.send(identity, message.to_frames()) {
        // Keep the session's queues untouched; the disconnect notice that
        // follows cleans up.
        error!("work item send to {identity} failed: {e}");
    }
}
