use thiserror::Error;

use crate::number::NumberError;

/// Error taxonomy shared by the wire, net and dialog modules.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("malformed phone number: {0}")]
    Number(#[from] NumberError),

    #[error("malformed LEELEN frame: {0}")]
    MalformedFrame(String),

    #[error("frame shorter than the {min} byte minimum ({actual} bytes)")]
    FrameTooShort { min: usize, actual: usize },

    #[error("frame exceeds the {max} byte maximum ({actual} bytes)")]
    FrameTooLong { max: usize, actual: usize },

    #[error("invalid address literal: {0}")]
    InvalidAddress(String),

    #[error("dialog rejected message in state {state:?}: {reason}")]
    DialogProtocolViolation { state: String, reason: String },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
