//! Protocol messages and their frame encodings.
//!
//! Every message is a multipart frame sequence. The first frame is an ASCII
//! text line; `WORK_ITEM` and producer items may carry one additional binary
//! payload frame. An empty payload is encoded by omitting the frame.

use crate::error::{ProtocolError, Result};
use crate::types::{ItemId, QueuePolicy};
use bytes::Bytes;
use std::fmt;

// ============================================================================
// Registration
// ============================================================================

/// Parameters a worker declares in its `REGISTER` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    stride: u64,
    offset: u64,
    policy: QueuePolicy,
    client_name: String,
}

impl Registration {
    /// Build a registration, enforcing `stride >= 1 && offset < stride`.
    pub fn new(
        stride: u64,
        offset: u64,
        policy: QueuePolicy,
        client_name: impl Into<String>,
    ) -> Result<Self> {
        if stride == 0 || offset >= stride {
            return Err(ProtocolError::InvalidRegistration { stride, offset });
        }
        Ok(Self {
            stride,
            offset,
            policy,
            client_name: client_name.into(),
        })
    }

    /// Whether an item with this id matches the declared filter.
    pub fn wants(&self, id: ItemId) -> bool {
        id % self.stride == self.offset
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn policy(&self) -> QueuePolicy {
        self.policy
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }
}

impl fmt::Display for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (stride {}, offset {}, {})",
            self.client_name, self.stride, self.offset, self.policy
        )
    }
}

// ============================================================================
// Broker → worker
// ============================================================================

/// Messages sent from the broker to a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerMessage {
    /// A work item dispatched to this worker.
    WorkItem { id: ItemId, payload: Bytes },
    /// Liveness signal while the worker has no outstanding item.
    Heartbeat,
    /// The broker is closing this connection.
    Disconnect,
}

impl BrokerMessage {
    /// Encode as wire frames.
    pub fn to_frames(&self) -> Vec<Bytes> {
        match self {
            BrokerMessage::WorkItem { id, payload } => {
                let mut frames = vec![Bytes::from(format!("WORK_ITEM {id}"))];
                if !payload.is_empty() {
                    frames.push(payload.clone());
                }
                frames
            }
            BrokerMessage::Heartbeat => vec![Bytes::from_static(b"HEARTBEAT")],
            BrokerMessage::Disconnect => vec![Bytes::from_static(b"DISCONNECT")],
        }
    }

    /// Parse from wire frames.
    pub fn from_frames(frames: &[Bytes]) -> Result<Self> {
        let line = first_text_frame(frames)?;
        let (verb, rest) = split_verb(line);
        match verb {
            "WORK_ITEM" => {
                let id = parse_decimal("item id", rest.trim())?;
                let payload = frames.get(1).cloned().unwrap_or_default();
                Ok(BrokerMessage::WorkItem { id, payload })
            }
            "HEARTBEAT" => Ok(BrokerMessage::Heartbeat),
            "DISCONNECT" => Ok(BrokerMessage::Disconnect),
            other => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }
}

// ============================================================================
// Worker → broker
// ============================================================================

/// Messages sent from a worker to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerMessage {
    /// Declare filter and queue policy; creates (or replaces) the session.
    Register(Registration),
    /// Acknowledge the outstanding item with this id.
    Complete(ItemId),
}

impl WorkerMessage {
    /// Encode as wire frames.
    pub fn to_frames(&self) -> Vec<Bytes> {
        match self {
            WorkerMessage::Register(r) => vec![Bytes::from(format!(
                "REGISTER {} {} {} {}",
                r.stride, r.offset, r.policy, r.client_name
            ))],
            WorkerMessage::Complete(id) => vec![Bytes::from(format!("COMPLETE {id}"))],
        }
    }

    /// Parse from wire frames.
    pub fn from_frames(frames: &[Bytes]) -> Result<Self> {
        let line = first_text_frame(frames)?;
        let (verb, rest) = split_verb(line);
        match verb {
            "REGISTER" => {
                let mut fields = rest.split_whitespace();
                let stride =
                    parse_decimal("stride", field(&mut fields, "REGISTER", "missing stride")?)?;
                let offset =
                    parse_decimal("offset", field(&mut fields, "REGISTER", "missing offset")?)?;
                let policy: QueuePolicy =
                    field(&mut fields, "REGISTER", "missing policy")?.parse()?;
                let name_tokens: Vec<&str> = fields.collect();
                if name_tokens.is_empty() {
                    return Err(ProtocolError::Malformed {
                        verb: "REGISTER",
                        reason: "missing client name",
                    });
                }
                let registration =
                    Registration::new(stride, offset, policy, name_tokens.join(" "))?;
                Ok(WorkerMessage::Register(registration))
            }
            "COMPLETE" => {
                let id = parse_decimal("item id", rest.trim())?;
                Ok(WorkerMessage::Complete(id))
            }
            other => Err(ProtocolError::UnknownVerb(other.to_string())),
        }
    }
}

// ============================================================================
// Producer channel frames
// ============================================================================

/// Encode a producer work item: `[decimal id]` or `[decimal id, payload]`.
pub fn encode_item(id: ItemId, payload: &Bytes) -> Vec<Bytes> {
    let mut frames = vec![Bytes::from(id.to_string())];
    if !payload.is_empty() {
        frames.push(payload.clone());
    }
    frames
}

/// Parse a producer work item.
pub fn parse_item(frames: &[Bytes]) -> Result<(ItemId, Bytes)> {
    let first = frames.first().ok_or(ProtocolError::EmptyMessage)?;
    let id = parse_decimal("item id", frame_text(first)?)?;
    let payload = frames.get(1).cloned().unwrap_or_default();
    Ok((id, payload))
}

/// Encode a completion notification: one `[decimal id]` frame.
pub fn encode_completion(id: ItemId) -> Vec<Bytes> {
    vec![Bytes::from(id.to_string())]
}

/// Parse a completion notification.
pub fn parse_completion(frames: &[Bytes]) -> Result<ItemId> {
    let first = frames.first().ok_or(ProtocolError::EmptyMessage)?;
    parse_decimal("completion id", frame_text(first)?)
}

// ============================================================================
// Helpers
// ============================================================================

fn frame_text(frame: &Bytes) -> Result<&str> {
    std::str::from_utf8(frame).map_err(|_| ProtocolError::NonUtf8Frame)
}

fn first_text_frame(frames: &[Bytes]) -> Result<&str> {
    frames
        .first()
        .ok_or(ProtocolError::EmptyMessage)
        .and_then(frame_text)
}

fn split_verb(line: &str) -> (&str, &str) {
    match line.split_once(' ') {
        Some((verb, rest)) => (verb, rest),
        None => (line, ""),
    }
}

fn parse_decimal(field: &'static str, value: &str) -> Result<u64> {
    value.parse().map_err(|_| ProtocolError::InvalidNumber {
        field,
        value: value.to_string(),
    })
}

fn field<'a>(
    fields: &mut std::str::SplitWhitespace<'a>,
    verb: &'static str,
    reason: &'static str,
) -> Result<&'a str> {
    fields.next().ok_or(ProtocolError::Malformed { verb, reason })
}
