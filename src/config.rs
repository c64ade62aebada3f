//! Subsystem configuration, constructed by the embedding application and
//! passed to [`crate::Subsystem::init`].

use std::path::PathBuf;
use std::time::Duration;

/// Full-system default storage path (spec.md §6).
pub const STORAGE_PATH_FULL: &str = "/data/data/deviceauth/hcgroup.dat";
/// Lite-system default storage path (spec.md §6).
pub const STORAGE_PATH_LITE: &str = "/storage/deviceauth/hcgroup.dat";

const DEFAULT_BIND_TIMEOUT_SECS: u64 = 20;
const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 30;

/// Per-owner group count ceiling for peer-to-peer groups (spec.md §4.3).
pub const MAX_GROUPS_PER_OWNER: usize = 100;

#[derive(Debug, Clone)]
pub struct TrustConfig {
    /// Where the TLV database blob lives on disk.
    pub storage_path: PathBuf,
    /// Deadline for a bind session from creation to `finished`.
    pub bind_timeout: Duration,
    /// Deadline for an auth (STS re-auth) session.
    pub auth_timeout: Duration,
}

impl Default for TrustConfig {
    fn default() -> Self {
        TrustConfig {
            storage_path: PathBuf::from(STORAGE_PATH_FULL),
            bind_timeout: Duration::from_secs(DEFAULT_BIND_TIMEOUT_SECS),
            auth_timeout: Duration::from_secs(DEFAULT_AUTH_TIMEOUT_SECS),
        }
    }
}

impl TrustConfig {
    /// Convenience constructor matching the lite-system storage path.
    pub fn lite() -> Self {
        TrustConfig {
            storage_path: PathBuf::from(STORAGE_PATH_LITE),
            ..Default::default()
        }
    }
}
