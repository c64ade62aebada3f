//! The group lifecycle engine (spec.md §4.3): three group variants sharing
//! one base contract, dispatched on `GroupType` rather than through a
//! function-pointer vtable (redesign flag, spec.md §9: "re-architect as
//! tagged variants").

mod across_account;
mod error;
mod identical_account;
mod peer_to_peer;
mod validation;

pub use error::GroupError;

use std::sync::Arc;

use serde_json::Value;

use crate::broadcast::Broadcaster;
use crate::crypto::CryptoAdapter;
use crate::model::{Device, Group, GroupType};
use crate::store::{Role, TrustStore};

pub type Result<T> = std::result::Result<T, GroupError>;

/// Shared handles every per-variant implementation needs: the trust
/// tables, the event fan-out, and the key-store collaborator (for
/// best-effort credential erasure on delete).
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<TrustStore>,
    pub broadcaster: Arc<Broadcaster>,
    pub crypto: Arc<dyn CryptoAdapter>,
}

/// Contract every group variant implements (spec.md §4.3: "Three variant
/// implementations share a base contract `{create, delete}`").
pub trait GroupVariant: Send + Sync {
    fn group_type(&self) -> GroupType;
    fn create(&self, ctx: &EngineContext, app_id: &str, params: &Value) -> Result<Group>;
    fn delete(&self, ctx: &EngineContext, group_id: &str, app_id: &str) -> Result<()>;
}

/// The group lifecycle engine. One instance per subsystem; cheap to
/// clone (everything it holds is already `Arc`).
pub struct GroupEngine {
    ctx: EngineContext,
    peer_to_peer: peer_to_peer::PeerToPeerGroup,
    identical_account: identical_account::IdenticalAccountGroup,
    across_account: across_account::AcrossAccountGroup,
}

impl GroupEngine {
    pub fn new(store: Arc<TrustStore>, broadcaster: Arc<Broadcaster>, crypto: Arc<dyn CryptoAdapter>) -> Self {
        GroupEngine {
            ctx: EngineContext { store, broadcaster, crypto },
            peer_to_peer: peer_to_peer::PeerToPeerGroup,
            identical_account: identical_account::IdenticalAccountGroup,
            across_account: across_account::AcrossAccountGroup,
        }
    }

    fn variant(&self, group_type: GroupType) -> &dyn GroupVariant {
        match group_type {
            GroupType::PeerToPeer => &self.peer_to_peer,
            GroupType::IdenticalAccount => &self.identical_account,
            GroupType::AcrossAccount => &self.across_account,
        }
    }

    /// `params` must carry a `groupType` field (spec.md §6: the Public
    /// API passes the whole creation blob as one JSON value); this is the
    /// single dispatch point onto the three variants.
    pub fn create(&self, app_id: &str, params: &Value) -> Result<Group> {
        let group_type = validation::read_group_type(params)?;
        self.variant(group_type).create(&self.ctx, app_id, params)
    }

    /// Resolves `group_id` to a variant and deletes it. Plain row lookups
    /// cover peer-to-peer and identical-account (their row key *is* the
    /// exposed id); across-account ids are pairwise and never a row key,
    /// so a miss falls through to the pairwise search.
    pub fn delete(&self, group_id: &str, app_id: &str) -> Result<()> {
        if let Some(group) = self.ctx.store.get_group_by_id(group_id) {
            return self.variant(group.group_type).delete(&self.ctx, group_id, app_id);
        }
        if self.ctx.store.find_across_account_pair(group_id).is_some() {
            return self.across_account.delete(&self.ctx, group_id, app_id);
        }
        Err(GroupError::Store(crate::store::StoreError::GroupNotFound(group_id.to_string())))
    }

    // ---- peer-to-peer-only operations (spec.md §4.3) ----

    /// Validates the caller may start a bind into `group_id` and that the
    /// group accepts new members; the actual device row is only written
    /// once the bind session reaches `finished` (see `complete_bind`).
    pub fn prepare_bind(&self, group_id: &str, app_id: &str) -> Result<Group> {
        let group = self
            .ctx
            .store
            .get_group_by_id(group_id)
            .ok_or_else(|| GroupError::Store(crate::store::StoreError::GroupNotFound(group_id.to_string())))?;
        if group.group_type != GroupType::PeerToPeer {
            return Err(GroupError::NotSupported);
        }
        if !self.ctx.store.is_group_edit_allowed(group_id, app_id)? {
            return Err(GroupError::AccessDenied(format!("{app_id} may not add members to {group_id}")));
        }
        Ok(group)
    }

    /// Called by the session engine once a bind handshake reaches
    /// `finished` on either side: persists the new device row and
    /// broadcasts `on_device_bound`.
    pub fn complete_bind(&self, device: Device) -> Result<()> {
        let group_id = device.group_id.clone();
        let udid = device.udid.clone();
        self.ctx.store.add_trusted_device(device)?;
        self.ctx.broadcaster.post_device_bound(&group_id, &udid);
        Ok(())
    }

    /// Removes one device row, regardless of whether a peer round-trip
    /// happened first (spec.md §4.5: the `isIgnoreChannel` force-unbind
    /// path removes the row with no bytes sent at all).
    pub fn unbind_device(&self, group_id: &str, udid: &str) -> Result<()> {
        let still_trusted = self.ctx.store.delete_trusted_device(group_id, udid)?;
        self.ctx.broadcaster.post_device_unbound(group_id, udid);
        if !still_trusted {
            self.ctx.broadcaster.post_device_not_trusted(udid);
            self.ctx
                .broadcaster
                .post_trusted_device_num_changed(self.ctx.store.count_devices_in_group(group_id));
        }
        Ok(())
    }

    pub fn add_role(&self, group_id: &str, role: Role, caller_app_id: &str, target_app_id: &str) -> Result<()> {
        match role {
            Role::Manager => {
                if !self.ctx.store.is_group_owner(group_id, caller_app_id)? {
                    return Err(GroupError::AccessDenied("only the owner may add a manager".into()));
                }
            }
            Role::Friend => {
                if !self.ctx.store.is_group_edit_allowed(group_id, caller_app_id)? {
                    return Err(GroupError::AccessDenied("caller may not edit this group".into()));
                }
                if !self.ctx.store.compare_visibility(group_id, crate::model::group::visibility::ALLOW_LIST)? {
                    return Err(GroupError::InvalidParams("group is not allow-list visible".into()));
                }
            }
        }
        Ok(self.ctx.store.add_role(group_id, role, target_app_id)?)
    }

    pub fn remove_role(&self, group_id: &str, role: Role, caller_app_id: &str, target_app_id: &str) -> Result<()> {
        if !self.ctx.store.is_group_edit_allowed(group_id, caller_app_id)? {
            return Err(GroupError::AccessDenied("caller may not edit this group".into()));
        }
        Ok(self.ctx.store.remove_role(group_id, role, target_app_id)?)
    }

    pub fn list_roles(&self, group_id: &str, role: Role) -> Result<Vec<String>> {
        Ok(self.ctx.store.list_roles(group_id, role)?)
    }

    // ---- account-variant-only operations ----

    /// `sync_shared_user_ids`: merges a newly learned partner hash into
    /// an existing across-account row (spec.md §4.3).
    pub fn sync_shared_user_ids(&self, user_id_hash: &str, shared_user_id_hash: &str) -> Result<()> {
        let row_id = crate::model::identical_account_group_id(user_id_hash);
        if self.ctx.store.get_group_by_id(&row_id).is_none() {
            return Err(GroupError::Store(crate::store::StoreError::GroupNotFound(user_id_hash.to_string())));
        }
        // The across-account row is keyed by `user_id_hash` itself, not
        // the identical-account row id; see `AcrossAccountGroup::create`.
        Ok(self.ctx.store.merge_shared_user_ids(user_id_hash, shared_user_id_hash)?)
    }

    pub fn ctx(&self) -> &EngineContext {
        &self.ctx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrustConfig;
    use crate::crypto::SoftwareCryptoAdapter;
    use serde_json::json;

    fn engine_in(dir: &std::path::Path) -> GroupEngine {
        let mut cfg = TrustConfig::default();
        cfg.storage_path = dir.join("hcgroup.dat");
        let store = TrustStore::new(&cfg).unwrap();
        let broadcaster = Arc::new(Broadcaster::new());
        let crypto = Arc::new(SoftwareCryptoAdapter::new());
        GroupEngine::new(store, broadcaster, crypto)
    }

    #[test]
    fn peer_to_peer_create_and_same_name_rejection() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());
        let params = json!({
            "groupType": 256,
            "groupName": "livingroom",
            "groupVisibility": -1,
        });
        let group = engine.create("com.huawei.devauth.test", &params).unwrap();
        assert_eq!(
            group.group_id,
            crate::model::peer_to_peer_group_id("livingroom", "com.huawei.devauth.test")
        );

        let err = engine.create("com.huawei.devauth.test", &params).unwrap_err();
        assert!(matches!(err, GroupError::InvalidParams(_)));
    }

    #[test]
    fn across_account_requires_identical_first() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());
        let params = json!({"groupType": 1282, "userId": "UID_AAAA", "sharedUserId": "UID_BBBB"});
        let err = engine.create("app", &params).unwrap_err();
        assert!(matches!(err, GroupError::Store(crate::store::StoreError::GroupNotFound(_))));
    }

    #[test]
    fn identical_then_across_account_then_cascade_delete() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_in(dir.path());
        let identical_params = json!({
            "groupType": 1,
            "userId": "UID_AAAA",
            "credentialType": 1,
            "serverPk": "aa",
            "pkInfoSignature": "bb",
            "pkInfo": "cc",
        });
        let identical = engine.create("app", &identical_params).unwrap();

        let across_params = json!({"groupType": 1282, "userId": "UID_AAAA", "sharedUserId": "UID_BBBB"});
        let across = engine.create("app", &across_params).unwrap();
        let user_id_hash = crate::crypto::SoftwareCryptoAdapter::new().sha256(b"UID_AAAA");
        let user_id_hash = hex::encode(user_id_hash);
        let shared_hash = hex::encode(crate::crypto::SoftwareCryptoAdapter::new().sha256(b"UID_BBBB"));
        assert_eq!(across.group_id, crate::model::across_account_group_id(&user_id_hash, &shared_hash));

        engine.delete(&identical.group_id, "app").unwrap();
        assert!(engine.ctx.store.get_group_by_id(&identical.group_id).is_none());
        assert!(engine.ctx.store.find_across_account_pair(&across.group_id).is_none());
    }
}
