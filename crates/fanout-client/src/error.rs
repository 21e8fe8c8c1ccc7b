use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] fanout_protocol::ProtocolError),

    #[error("broker closed the connection")]
    Disconnected,

    #[error("no frame from broker within {0:?}")]
    DeadBroker(std::time::Duration),
}

pub type Result<T> = std::result::Result<T, Error>;
