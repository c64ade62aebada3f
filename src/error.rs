//! Crate-wide error taxonomy.
//!
//! Every fallible internal function returns a typed [`Error`] built from a
//! module-local `thiserror` enum via `#[from]`. The Public API facade
//! (`api.rs`) is the only place that ever collapses an [`Error`] down to a
//! numeric [`ErrorCode`] — internal code always matches on the typed enum.

use thiserror::Error;

use crate::engine::GroupError;
use crate::session::SessionError;
use crate::store::StoreError;
use crate::tlv::TlvError;

/// Numeric error taxonomy from the public wire/API contract. Groupings
/// matter more than the specific values; callers should match on
/// [`ErrorCode`], not hardcode the discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,

    // input
    InvalidParams = -1,
    NullPtr = -2,
    JsonMissingField = -3,
    JsonBadType = -4,

    // resource
    OutOfMemory = -10,
    PersistFailed = -11,
    ChannelUnavailable = -12,
    TransmitFailed = -13,

    // state
    GroupNotFound = -20,
    DeviceNotFound = -21,
    GroupDuplicate = -22,
    DeviceDuplicate = -23,
    BeyondLimit = -24,
    AccessDenied = -25,
    NotSupported = -26,

    // protocol
    BadMessage = -30,
    AuthFail = -31,
    IgnoreMsg = -32,
    TimedOut = -33,
    DuplicateRequest = -34,
    TaskIdMismatch = -35,

    // fatal
    ServiceNeedsRestart = -40,
}

/// The crate's aggregate error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Tlv(#[from] TlvError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("invalid parameters: {0}")]
    InvalidParams(String),

    #[error("required field missing: {0}")]
    JsonMissingField(&'static str),

    #[error("field had unexpected JSON type: {0}")]
    JsonBadType(&'static str),

    #[error("service needs restart: {0}")]
    ServiceNeedsRestart(String),
}

impl Error {
    /// Map this error to its public numeric code (spec §7). `IgnoreMsg` is
    /// deliberately never surfaced through this path — the session engine
    /// swallows it before it ever becomes an `Error` the caller sees.
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Tlv(_) => ErrorCode::BadMessage,
            Error::Store(e) => e.code(),
            Error::Group(e) => e.code(),
            Error::Session(e) => e.code(),
            Error::InvalidParams(_) => ErrorCode::InvalidParams,
            Error::JsonMissingField(_) => ErrorCode::JsonMissingField,
            Error::JsonBadType(_) => ErrorCode::JsonBadType,
            Error::ServiceNeedsRestart(_) => ErrorCode::ServiceNeedsRestart,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
