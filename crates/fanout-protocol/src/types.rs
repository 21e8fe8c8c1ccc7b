//! Core wire types shared by the broker and its clients.

use crate::error::ProtocolError;
use std::fmt;
use std::str::FromStr;

/// Identifier of one work item, assigned by the producer. Unique within a
/// producer session; the broker does not require monotonicity.
pub type ItemId = u64;

/// Queueing discipline a worker declares at registration.
///
/// The variants are also the exact wire tokens of the `REGISTER` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueuePolicy {
    /// Every matching item is delivered, in arrival order.
    #[default]
    ReceiveAll,
    /// While the worker is busy, only the newest matching item is kept; it
    /// is delivered once the outstanding completion arrives.
    PrebufferOne,
    /// Items that arrive while the worker is busy are never delivered.
    Skip,
}

impl QueuePolicy {
    /// Wire token for this policy.
    pub const fn as_str(self) -> &'static str {
        match self {
            QueuePolicy::ReceiveAll => "ReceiveAll",
            QueuePolicy::PrebufferOne => "PrebufferOne",
            QueuePolicy::Skip => "Skip",
        }
    }
}

impl fmt::Display for QueuePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueuePolicy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ReceiveAll" => Ok(QueuePolicy::ReceiveAll),
            "PrebufferOne" => Ok(QueuePolicy::PrebufferOne),
            "Skip" => Ok(QueuePolicy::Skip),
            other => Err(ProtocolError::InvalidPolicy(other.to_string())),
        }
    }
}
