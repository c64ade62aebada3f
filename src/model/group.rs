use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Never-expires sentinel for [`Group::expire_time`].
pub const EXPIRE_TIME_NEVER: i64 = -1;
/// Upper bound (in days) for an explicit expiry.
pub const MAX_EXPIRE_TIME_DAYS: i64 = 90;

/// The three group flavors. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u32)]
pub enum GroupType {
    /// Multiple devices controlled by one cloud identity.
    IdenticalAccount = 1,
    /// Two devices that PIN-confirmed each other.
    PeerToPeer = 256,
    /// Two identities that mutually authorize their devices.
    AcrossAccount = 1282,
}

impl GroupType {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            1 => Some(GroupType::IdenticalAccount),
            256 => Some(GroupType::PeerToPeer),
            1282 => Some(GroupType::AcrossAccount),
            _ => None,
        }
    }
}

/// Visibility is a bit set; [`compare_visibility`](crate::store::TrustStore::compare_visibility)
/// is `(group.visibility & required) != 0`.
pub mod visibility {
    pub const PUBLIC: i32 = 0b001;
    pub const PRIVATE: i32 = 0b010;
    pub const ALLOW_LIST: i32 = 0b100;
    /// Sentinel accepted only as a *creation* parameter, meaning "use the
    /// default visibility" (public) — mirrors the original implementation's
    /// use of `-1` as the uninitialized/default value for this field.
    pub const UNSPECIFIED: i32 = -1;
}

/// Opaque bitset wrapper so callers don't pass a raw `i32` around.
pub type Visibility = i32;

/// A trust group: the unit of mutual authentication between devices.
///
/// See spec.md §3 for the full invariant list; enforcement lives in
/// [`crate::engine`], not here — this type is a plain data holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub group_id: String,
    pub name: String,
    pub owner_app_id: String,
    pub group_type: GroupType,
    pub visibility: Visibility,
    /// Seconds; `-1` = never, else `1..=90*86400`.
    pub expire_time: i64,
    /// Present for `IdenticalAccount`/`AcrossAccount`; empty otherwise.
    pub user_id_hash: String,
    /// `AcrossAccount` only. Stored as a secondary collection — most
    /// queries still want the flattened per-shared-user view, exposed
    /// separately by the store (Open Questions, spec.md §9).
    pub shared_user_id_hashes: BTreeSet<String>,
    /// Ordered; `managers[0]` is the owner and is immutable.
    pub managers: Vec<String>,
    /// Only meaningful when `visibility & ALLOW_LIST != 0`.
    pub friends: BTreeSet<String>,
}

impl Group {
    pub fn owner(&self) -> &str {
        &self.managers[0]
    }

    pub fn is_manager(&self, app_id: &str) -> bool {
        self.managers.iter().any(|m| m == app_id)
    }

    pub fn is_friend(&self, app_id: &str) -> bool {
        self.friends.contains(app_id)
    }

    /// Across-account rows are stored keyed by `user_id_hash`, with every
    /// partner identity the caller shares trust with collapsed into
    /// `shared_user_id_hashes` (spec.md §9 Open Questions: "the database
    /// row keys off a synthetic id plus the set of shared hashes"). Most
    /// callers want the per-pair view instead: one `Group` per partner,
    /// `group_id` re-derived to the pairwise hash every time. This builds
    /// that view for a single partner.
    pub fn flatten_across_account(&self, shared_user_id_hash: &str) -> Group {
        let mut view = self.clone();
        view.group_id = crate::model::across_account_group_id(&self.user_id_hash, shared_user_id_hash);
        view.shared_user_id_hashes = std::iter::once(shared_user_id_hash.to_string()).collect();
        view
    }
}
