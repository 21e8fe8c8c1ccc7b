//! Per-worker broker-side state.

use crate::item::Item;
use fanout_protocol::{ItemId, QueuePolicy, Registration};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// A `COMPLETE` named an id that is not outstanding for the session.
/// Fatal for that connection.
#[derive(Debug, Error)]
#[error("completion for unknown item {0}")]
pub struct UnknownCompletion(pub ItemId);

/// Broker-side state of one registered worker: the declared filter and
/// policy plus the waiting and outstanding queues.
///
/// Pure data and the filter predicate; all mutation is driven by the
/// distributor's event loop.
pub struct WorkerSession {
    registration: Registration,
    waiting: VecDeque<Arc<Item>>,
    outstanding: VecDeque<Arc<Item>>,
    next_heartbeat: Instant,
}

impl WorkerSession {
    /// The first heartbeat is due immediately; the distributor emits it on
    /// the next turn unless a work item arrives first.
    pub fn new(registration: Registration) -> Self {
        Self {
            registration,
            waiting: VecDeque::new(),
            outstanding: VecDeque::new(),
            next_heartbeat: Instant::now(),
        }
    }

    /// Whether an item with this id matches the session's stride/offset.
    pub fn wants(&self, id: ItemId) -> bool {
        self.registration.wants(id)
    }

    pub fn policy(&self) -> QueuePolicy {
        self.registration.policy()
    }

    pub fn client_name(&self) -> &str {
        self.registration.client_name()
    }

    /// Idle means no outstanding item.
    pub fn is_idle(&self) -> bool {
        self.outstanding.is_empty()
    }

    pub fn clear_waiting(&mut self) {
        self.waiting.clear();
    }

    pub fn push_waiting(&mut self, item: Arc<Item>) {
        self.waiting.push_back(item);
    }

    pub fn pop_waiting(&mut self) -> Option<Arc<Item>> {
        self.waiting.pop_front()
    }

    pub fn add_outstanding(&mut self, item: Arc<Item>) {
        self.outstanding.push_back(item);
    }

    /// Remove the outstanding item with this id, releasing the session's
    /// reference to it.
    pub fn complete(&mut self, id: ItemId) -> Result<(), UnknownCompletion> {
        let index = self
            .outstanding
            .iter()
            .position(|item| item.id() == id)
            .ok_or(UnknownCompletion(id))?;
        self.outstanding.remove(index);
        Ok(())
    }

    /// A heartbeat is due when the session is idle and past its deadline.
    /// A busy worker has implicit liveness from the outstanding item.
    pub fn heartbeat_due(&self, now: Instant) -> bool {
        self.is_idle() && now >= self.next_heartbeat
    }

    pub fn schedule_heartbeat(&mut self, deadline: Instant) {
        self.next_heartbeat = deadline;
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn outstanding_len(&self) -> usize {
        self.outstanding.len()
    }
}
