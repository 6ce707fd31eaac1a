use crate::protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NodeError {
    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind router port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("No route to {0}")]
    UnknownPeer(String),

    #[error("Node {0} has been released")]
    Released(String),
}

pub type Result<T> = std::result::Result<T, NodeError>;
