use thiserror::Error;

use crate::error::ErrorCode;
use crate::tlv::TlvError;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("group already exists: {0}")]
    GroupDuplicate(String),

    #[error("group not found: {0}")]
    GroupNotFound(String),

    #[error("device already exists: {0}")]
    DeviceDuplicate(String),

    #[error("device not found: {0}")]
    DeviceNotFound(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("database corrupt: {0}")]
    Tlv(#[from] TlvError),

    #[error("i/o error: {0}")]
    Io(String),
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::GroupDuplicate(_) => ErrorCode::GroupDuplicate,
            StoreError::GroupNotFound(_) => ErrorCode::GroupNotFound,
            StoreError::DeviceDuplicate(_) => ErrorCode::DeviceDuplicate,
            StoreError::DeviceNotFound(_) => ErrorCode::DeviceNotFound,
            StoreError::AccessDenied(_) => ErrorCode::AccessDenied,
            StoreError::Tlv(_) => ErrorCode::BadMessage,
            StoreError::Io(_) => ErrorCode::PersistFailed,
        }
    }
}
