use thiserror::Error;

/// Protocol-level errors for envelope framing and addressing
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid frame: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("Route must contain at least one hop")]
    EmptyRoute,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
