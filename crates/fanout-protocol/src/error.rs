//! Protocol error types

use thiserror::Error;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Message carried no frames at all
    #[error("empty message")]
    EmptyMessage,

    /// First token of the payload is not a known verb
    #[error("unknown verb: {0}")]
    UnknownVerb(String),

    /// A field that must be ASCII decimal was not
    #[error("invalid number in {field}: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    /// Policy token is none of ReceiveAll, PrebufferOne, Skip
    #[error("unknown queue policy: {0:?}")]
    InvalidPolicy(String),

    /// Registration violates `stride >= 1 && offset < stride`
    #[error("invalid registration: stride {stride}, offset {offset}")]
    InvalidRegistration { stride: u64, offset: u64 },

    /// Verb recognized but the rest of the line does not parse
    #[error("malformed {verb} message: {reason}")]
    Malformed {
        verb: &'static str,
        reason: &'static str,
    },

    /// Text frame is not valid UTF-8
    #[error("frame is not valid UTF-8")]
    NonUtf8Frame,

    /// Message size exceeds the framing limit
    #[error("message size {0} exceeds maximum {1}")]
    MessageTooLarge(usize, usize),

    /// Framing structure is inconsistent with the outer length
    #[error("invalid framing: {0}")]
    InvalidFraming(&'static str),

    /// I/O error while reading or writing a framed message
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
