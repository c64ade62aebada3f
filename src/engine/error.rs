use thiserror::Error;

use crate::error::ErrorCode;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum GroupError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("operation not supported by this group variant")]
    NotSupported,

    #[error("group count limit reached for this owner")]
    BeyondLimit,

    #[error("access denied: {0}")]
    AccessDenied(String),
}

impl GroupError {
    pub fn code(&self) -> ErrorCode {
        match self {
            GroupError::Store(e) => e.code(),
            GroupError::InvalidParams(_) => ErrorCode::InvalidParams,
            GroupError::NotSupported => ErrorCode::NotSupported,
            GroupError::BeyondLimit => ErrorCode::BeyondLimit,
            GroupError::AccessDenied(_) => ErrorCode::AccessDenied,
        }
    }
}
