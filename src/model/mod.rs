//! Core data model: groups, devices, and the group-id derivation rules
//! that tie them together (spec.md §3).

mod device;
mod group;
mod ids;

pub use device::{CredentialType, Device, DeviceType};
pub use group::{Group, GroupType, Visibility, EXPIRE_TIME_NEVER, MAX_EXPIRE_TIME_DAYS};
pub use ids::{
    across_account_group_id, identical_account_group_id, peer_to_peer_group_id,
};
