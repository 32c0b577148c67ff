use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("peer not found or did not answer in time")]
    NotFound,

    #[error("no audio/video ports available")]
    ResourceExhausted,

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("fatal initialisation error: {0}")]
    Fatal(String),

    #[error(transparent)]
    Core(#[from] leelen_core::error::CoreError),

    #[error(transparent)]
    Discovery(#[from] leelen_discovery::DiscoveryError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type BridgeResult<T> = Result<T, BridgeError>;
