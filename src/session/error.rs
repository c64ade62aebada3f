use thiserror::Error;

use crate::crypto::CryptoError;
use crate::error::ErrorCode;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("malformed protocol message: {0}")]
    BadMessage(String),

    #[error("authentication failed")]
    AuthFail,

    #[error("message ignored (duplicate or stale step)")]
    IgnoreMsg,

    #[error("session timed out")]
    TimedOut,

    #[error("request id {0} is already in use")]
    DuplicateRequest(i64),

    #[error("no session for request id {0}")]
    TaskIdMismatch(i64),

    #[error("channel unavailable")]
    ChannelUnavailable,

    #[error("transmit failed: {0}")]
    TransmitFailed(String),

    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

impl SessionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SessionError::BadMessage(_) => ErrorCode::BadMessage,
            SessionError::AuthFail => ErrorCode::AuthFail,
            SessionError::IgnoreMsg => ErrorCode::IgnoreMsg,
            SessionError::TimedOut => ErrorCode::TimedOut,
            SessionError::DuplicateRequest(_) => ErrorCode::DuplicateRequest,
            SessionError::TaskIdMismatch(_) => ErrorCode::TaskIdMismatch,
            SessionError::ChannelUnavailable => ErrorCode::ChannelUnavailable,
            SessionError::TransmitFailed(_) => ErrorCode::TransmitFailed,
            SessionError::Crypto(_) => ErrorCode::BadMessage,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
