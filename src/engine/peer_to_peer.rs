//! Peer-to-peer groups: two devices that PIN-confirmed each other, no
//! cloud identity involved. Grounded in
//! `original_source/services/impl/src/group_operation/peer_to_peer_group.c`.

use serde_json::Value;

use crate::config::MAX_GROUPS_PER_OWNER;
use crate::model::{group::visibility, peer_to_peer_group_id, Group, GroupType};

use super::error::GroupError;
use super::validation::{optional_i64, require_str};
use super::{EngineContext, GroupVariant, Result};

pub struct PeerToPeerGroup;

impl GroupVariant for PeerToPeerGroup {
    fn group_type(&self) -> GroupType {
        GroupType::PeerToPeer
    }

    fn create(&self, ctx: &EngineContext, app_id: &str, params: &Value) -> Result<Group> {
        let name = require_str(params, "groupName")?;

        if ctx.store.find_peer_to_peer_by_name(app_id, name).is_some() {
            return Err(GroupError::InvalidParams(format!("group named {name} already exists for {app_id}")));
        }
        if ctx.store.count_by_owner(app_id, GroupType::PeerToPeer) >= MAX_GROUPS_PER_OWNER {
            return Err(GroupError::BeyondLimit);
        }

        let requested_visibility = params.get("groupVisibility").and_then(Value::as_i64).unwrap_or(visibility::UNSPECIFIED as i64) as i32;
        let visibility = super::validation::validate_creation_visibility(requested_visibility)?;
        let expire_time = optional_i64(params, "expireTime", crate::model::EXPIRE_TIME_NEVER);
        super::validation::validate_expire_time(expire_time)?;

        let group = Group {
            group_id: peer_to_peer_group_id(name, app_id),
            name: name.to_string(),
            owner_app_id: app_id.to_string(),
            group_type: GroupType::PeerToPeer,
            visibility,
            expire_time,
            user_id_hash: String::new(),
            shared_user_id_hashes: Default::default(),
            managers: vec![app_id.to_string()],
            friends: Default::default(),
        };

        ctx.store.add_group(group.clone())?;
        ctx.broadcaster.post_group_created(&group.group_id);
        Ok(group)
    }

    fn delete(&self, ctx: &EngineContext, group_id: &str, app_id: &str) -> Result<()> {
        if !ctx.store.is_group_edit_allowed(group_id, app_id)? {
            return Err(GroupError::AccessDenied(format!("{app_id} may not delete {group_id}")));
        }
        let (_group, devices) = ctx.store.delete_group_by_id(group_id)?;
        for device in &devices {
            ctx.broadcaster.post_device_unbound(group_id, &device.udid);
            if !ctx.store.is_trusted(&device.udid) {
                ctx.broadcaster.post_device_not_trusted(&device.udid);
                ctx.broadcaster.post_trusted_device_num_changed(0);
            }
            // Best-effort: erase the asymmetric key pair tied to this
            // group (spec.md §4.3). Failure is silent by design — the
            // adapter has no "key never existed" signal worth surfacing.
            ctx.crypto.erase_key(&format!("{group_id}:{}", device.udid));
        }
        ctx.broadcaster.post_group_deleted(group_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::config::TrustConfig;
    use crate::crypto::SoftwareCryptoAdapter;
    use crate::store::TrustStore;
    use serde_json::json;
    use std::sync::Arc;

    fn ctx_in(dir: &std::path::Path) -> EngineContext {
        let mut cfg = TrustConfig::default();
        cfg.storage_path = dir.join("hcgroup.dat");
        EngineContext {
            store: TrustStore::new(&cfg).unwrap(),
            broadcaster: Arc::new(Broadcaster::new()),
            crypto: Arc::new(SoftwareCryptoAdapter::new()),
        }
    }

    #[test]
    fn group_count_limit_enforced() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        let variant = PeerToPeerGroup;
        for i in 0..MAX_GROUPS_PER_OWNER {
            let params = json!({"groupType": 256, "groupName": format!("room{i}")});
            variant.create(&ctx, "app", &params).unwrap();
        }
        let params = json!({"groupType": 256, "groupName": "one-too-many"});
        assert!(matches!(variant.create(&ctx, "app", &params), Err(GroupError::BeyondLimit)));
    }

    #[test]
    fn allow_list_visibility_rejected_at_creation() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        let variant = PeerToPeerGroup;
        let params = json!({"groupType": 256, "groupName": "room", "groupVisibility": visibility::ALLOW_LIST});
        assert!(matches!(variant.create(&ctx, "app", &params), Err(GroupError::InvalidParams(_))));
    }
}
