//! Wire message shape for the bind/auth handshake (spec.md §6). One JSON
//! object per message; binary fields travel hex-encoded, matching how the
//! teacher's `network/packet.rs` puts signatures and ciphertext on the wire
//! as hex rather than raw bytes.

use serde::{Deserialize, Serialize};

use super::error::SessionError;

/// Matches spec.md §6's `groupOp` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum GroupOp {
    GroupCreate = 0,
    GroupDisband = 1,
    MemberInvite = 2,
    MemberJoin = 3,
    MemberDelete = 4,
    Authenticate = 5,
}

impl GroupOp {
    pub fn from_i32(v: i32) -> Option<Self> {
        match v {
            0 => Some(GroupOp::GroupCreate),
            1 => Some(GroupOp::GroupDisband),
            2 => Some(GroupOp::MemberInvite),
            3 => Some(GroupOp::MemberJoin),
            4 => Some(GroupOp::MemberDelete),
            5 => Some(GroupOp::Authenticate),
            _ => None,
        }
    }
}

pub const STEP_M1: u32 = 1;
pub const STEP_M2: u32 = 2;
pub const STEP_M3: u32 = 3;
pub const STEP_M4: u32 = 4;

/// One message of the four-step handshake. The same shape serves both the
/// PIN bind and the stored-key re-auth; unused fields are simply absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(rename = "requestId")]
    pub request_id: i64,
    #[serde(rename = "groupOp")]
    pub group_op: i32,
    pub step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "authId")]
    pub auth_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub udid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "ephemeralPk")]
    pub ephemeral_pk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "staticPk")]
    pub static_pk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "signPk")]
    pub sign_pk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commitment: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "groupErrorMsg")]
    pub group_error_msg: Option<i32>,
}

impl WireMessage {
    pub fn to_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("wire message fields always serialize")
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SessionError> {
        serde_json::from_slice(bytes).map_err(|e| SessionError::BadMessage(e.to_string()))
    }

    pub fn hex_field_32(&self, get: impl Fn(&Self) -> &Option<String>, name: &'static str) -> Result<[u8; 32], SessionError> {
        let s = get(self).as_deref().ok_or_else(|| SessionError::BadMessage(format!("missing field {name}")))?;
        let bytes = hex::decode(s).map_err(|e| SessionError::BadMessage(format!("{name} not valid hex: {e}")))?;
        bytes.try_into().map_err(|_| SessionError::BadMessage(format!("{name} must be 32 bytes")))
    }

    pub fn hex_field_64(&self, get: impl Fn(&Self) -> &Option<String>, name: &'static str) -> Result<[u8; 64], SessionError> {
        let s = get(self).as_deref().ok_or_else(|| SessionError::BadMessage(format!("missing field {name}")))?;
        let bytes = hex::decode(s).map_err(|e| SessionError::BadMessage(format!("{name} not valid hex: {e}")))?;
        bytes.try_into().map_err(|_| SessionError::BadMessage(format!("{name} must be 64 bytes")))
    }

    pub fn required_str(&self, get: impl Fn(&Self) -> &Option<String>, name: &'static str) -> Result<String, SessionError> {
        get(self).clone().ok_or_else(|| SessionError::BadMessage(format!("missing field {name}")))
    }
}
