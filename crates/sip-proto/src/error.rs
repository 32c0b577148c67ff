use thiserror::Error;

#[derive(Debug, Error)]
pub enum SipError {
    #[error("failed to parse SIP message")]
    Malformed,
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),
    #[error("unsupported method: {0}")]
    UnsupportedMethod(String),
}

pub type SipResult<T> = Result<T, SipError>;
