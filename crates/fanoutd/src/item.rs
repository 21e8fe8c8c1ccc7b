//! Shared work items and the completion sink.

use bytes::Bytes;
use fanout_protocol::ItemId;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Collects the ids of items whose last shared reference was released.
///
/// The distributor owns the sink and drains it at the end of every event
/// loop turn; every [`Item`] holds a clone of this handle, so releasing the
/// last reference records the completion no matter which queue held it.
/// Entries stay in last-release order.
#[derive(Clone, Default)]
pub struct CompletionSink {
    inner: Arc<Mutex<VecDeque<ItemId>>>,
}

impl CompletionSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, id: ItemId) {
        self.inner.lock().push_back(id);
    }

    /// Oldest undelivered completion, if any. Entries are removed only
    /// after a successful producer send so an aborted flush retries the
    /// remainder on the next turn.
    pub fn front(&self) -> Option<ItemId> {
        self.inner.lock().front().copied()
    }

    pub fn pop_front(&self) -> Option<ItemId> {
        self.inner.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

/// One unit of work flowing from the producer to any number of workers.
///
/// Items are shared as `Arc<Item>` between session queues; no session owns
/// an item. Dropping the last reference records the completion on the sink,
/// which makes the notification exactly-once per item by construction,
/// regardless of fan-out.
pub struct Item {
    id: ItemId,
    payload: Bytes,
    sink: CompletionSink,
}

impl Item {
    pub fn new(sink: CompletionSink, id: ItemId, payload: Bytes) -> Arc<Self> {
        Arc::new(Self { id, payload, sink })
    }

    pub fn id(&self) -> ItemId {
        self.id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

impl Drop for Item {
    fn drop(&mut self) {
        self.sink.push(self.id);
    }
}
