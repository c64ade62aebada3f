use serde::{Deserialize, Serialize};

/// How this device's long-term auth secret is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum CredentialType {
    /// Shared secret, derived during a PIN bind (DAS device-PAKE).
    Symmetric = 1,
    /// Keypair, used by account variants (Ed25519 signing key).
    Asymmetric = 2,
}

impl CredentialType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(CredentialType::Symmetric),
            2 => Some(CredentialType::Asymmetric),
            _ => None,
        }
    }
}

/// Role this device plays relative to its peer in the pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum DeviceType {
    Accessory = 1,
    Controller = 2,
    Proxy = 3,
}

impl DeviceType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(DeviceType::Accessory),
            2 => Some(DeviceType::Controller),
            3 => Some(DeviceType::Proxy),
            _ => None,
        }
    }
}

/// A trusted device bound into a [`crate::model::Group`]. Devices hold a
/// back-*reference* to their group (`group_id`), never a back-pointer —
/// groups live in a stable map keyed by `group_id` and device rows look
/// the owning group up on use (spec.md §9 redesign notes).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub group_id: String,
    /// 64-char hex hardware id.
    pub udid: String,
    /// Service-scoped id presented in the protocol; defaults to `udid`.
    pub auth_id: String,
    /// Present for account variants.
    pub user_id_hash: String,
    /// For `AcrossAccount`, holds the derived per-pair group id.
    pub service_type: String,
    pub credential_type: CredentialType,
    pub device_type: DeviceType,
    /// Unix seconds of last successful authentication.
    pub last_tm: i64,
    /// Opaque application-defined bytes, round-tripped verbatim.
    pub ext: Vec<u8>,
}

impl Device {
    pub fn key(&self) -> (String, String) {
        (self.group_id.clone(), self.udid.clone())
    }
}
