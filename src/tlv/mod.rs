//! Binary on-disk database format: nested length-tagged records.
//!
//! Each record is `<u16 tag, u32 length, payload>`. Composite records
//! contain child records in declared order; primitive records carry
//! fixed-width integers (big-endian on the wire, for cross-platform
//! stability). Strings are length-prefixed and additionally
//! NUL-terminated inside their payload. Unknown tags inside a composite
//! are tolerated and skipped by length — this is the database's only
//! forward-compatibility story, and decoding must keep honoring it.
//!
//! Decoding is all-or-nothing: a partial/failed decode never mutates
//! caller state.

mod reader;
mod schema;
mod writer;

pub use reader::TlvReader;
pub use schema::{decode_database, encode_database, Database, DeviceRecord, GroupRecord};
pub use writer::TlvWriter;

use thiserror::Error;

/// Records larger than this are rejected before any allocation happens,
/// so a corrupted length field can't be used to drive an OOM.
pub const MAX_RECORD_LEN: u32 = 4 * 1024 * 1024;

pub const TAG_DB: u16 = 0x0001;
pub const TAG_DB_VERSION: u16 = 0x6001;
pub const TAG_DB_GROUPS: u16 = 0x6002;
pub const TAG_DB_DEVICES: u16 = 0x6003;

pub const TAG_GROUP: u16 = 0x0001;
pub const TAG_DEVICE: u16 = 0x0002;

pub const TAG_GROUP_NAME: u16 = 0x0101;
pub const TAG_GROUP_ID: u16 = 0x0102;
pub const TAG_GROUP_TYPE: u16 = 0x0103;
pub const TAG_GROUP_VISIBILITY: u16 = 0x0104;
pub const TAG_GROUP_EXPIRE_TIME: u16 = 0x0105;
pub const TAG_GROUP_USER_ID_HASH: u16 = 0x0106;
pub const TAG_GROUP_SHARED_USER_ID_HASHES: u16 = 0x0107;
pub const TAG_GROUP_MANAGERS: u16 = 0x0108;
pub const TAG_GROUP_FRIENDS: u16 = 0x0109;
pub const TAG_GROUP_OWNER_APP_ID: u16 = 0x010A;

pub const TAG_DEVICE_GROUP_ID: u16 = 0x0201;
pub const TAG_DEVICE_UDID: u16 = 0x0202;
pub const TAG_DEVICE_AUTH_ID: u16 = 0x0203;
pub const TAG_DEVICE_USER_ID_HASH: u16 = 0x0204;
pub const TAG_DEVICE_SERVICE_TYPE: u16 = 0x0205;
pub const TAG_DEVICE_EXT: u16 = 0x0206;
pub const TAG_DEVICE_INFO: u16 = 0x0207;

pub const DB_VERSION: u32 = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TlvError {
    #[error("buffer truncated while decoding tag {tag:#06x}")]
    TlvTruncated { tag: u16 },
    #[error("record length {len} exceeds remaining buffer or max {max}")]
    TlvBadLength { len: u32, max: u32 },
    #[error("string record missing NUL terminator")]
    TlvBadString,
    #[error("expected tag {expected:#06x}, found {found:#06x}")]
    TlvUnexpectedTag { expected: u16, found: u16 },
    #[error("database version {0} is not supported")]
    TlvUnsupportedVersion(u32),
}

pub type Result<T> = std::result::Result<T, TlvError>;
