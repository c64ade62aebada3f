//! Across-account groups: directed trust between two distinct cloud
//! identities. Grounded in
//! `original_source/services/impl/src/group_operation/across_account_group.c`.
//!
//! Storage shape (spec.md §9 Open Questions, preserved rather than
//! "fixed"): the row lives at `user_id_hash` — the same key an
//! identical-account row would occupy for a *different* derivation, so no
//! collision — and accumulates every partner this identity trusts in
//! `shared_user_id_hashes`. The pairwise id callers actually see
//! (`sha256_hex(sorted(user_id_hash, shared_user_id_hash))`) is re-derived
//! on every read via [`Group::flatten_across_account`].

use serde_json::Value;

use crate::model::{group::visibility, identical_account_group_id, Group, GroupType};

use super::error::GroupError;
use super::validation::{optional_i64, require_str};
use super::{EngineContext, GroupVariant, Result};

pub struct AcrossAccountGroup;

impl GroupVariant for AcrossAccountGroup {
    fn group_type(&self) -> GroupType {
        GroupType::AcrossAccount
    }

    fn create(&self, ctx: &EngineContext, app_id: &str, params: &Value) -> Result<Group> {
        let user_id = require_str(params, "userId")?;
        let shared_user_id = require_str(params, "sharedUserId")?;

        let user_id_hash = hex::encode(ctx.crypto.sha256(user_id.as_bytes()));
        let identical_id = identical_account_group_id(&user_id_hash);
        let identical = ctx
            .store
            .get_group_by_id(&identical_id)
            .filter(|g| g.group_type == GroupType::IdenticalAccount)
            .ok_or_else(|| GroupError::Store(crate::store::StoreError::GroupNotFound(identical_id.clone())))?;

        let shared_user_id_hash = hex::encode(ctx.crypto.sha256(shared_user_id.as_bytes()));
        let pairwise_id = crate::model::across_account_group_id(&user_id_hash, &shared_user_id_hash);

        let requested_visibility = params.get("groupVisibility").and_then(Value::as_i64).unwrap_or(visibility::UNSPECIFIED as i64) as i32;
        let visibility = super::validation::validate_creation_visibility(requested_visibility)?;
        let expire_time = optional_i64(params, "expireTime", crate::model::EXPIRE_TIME_NEVER);
        super::validation::validate_expire_time(expire_time)?;

        match ctx.store.get_group_by_id(&user_id_hash) {
            Some(row) if row.group_type == GroupType::AcrossAccount => {
                if row.shared_user_id_hashes.contains(&shared_user_id_hash) {
                    return Err(GroupError::Store(crate::store::StoreError::GroupDuplicate(pairwise_id)));
                }
                ctx.store.merge_shared_user_ids(&user_id_hash, &shared_user_id_hash)?;
            }
            Some(_) => {
                // The identity's namespace is occupied by something
                // else — shouldn't happen given disjoint id derivations,
                // but fail closed rather than silently overwrite.
                return Err(GroupError::InvalidParams(format!("{user_id_hash} is not an across-account row")));
            }
            None => {
                let row = Group {
                    group_id: user_id_hash.clone(),
                    name: identical.name.clone(),
                    owner_app_id: app_id.to_string(),
                    group_type: GroupType::AcrossAccount,
                    visibility,
                    expire_time,
                    user_id_hash: user_id_hash.clone(),
                    shared_user_id_hashes: std::iter::once(shared_user_id_hash.clone()).collect(),
                    managers: vec![app_id.to_string()],
                    friends: Default::default(),
                };
                ctx.store.add_group(row)?;
            }
        }

        let row = ctx.store.get_group_by_id(&user_id_hash).expect("just inserted or merged");
        let view = row.flatten_across_account(&shared_user_id_hash);
        ctx.broadcaster.post_group_created(&view.group_id);
        Ok(view)
    }

    /// Deletes one pairwise relationship. If it was the identity's last
    /// partner the whole row (and every device still attached to it) is
    /// cascaded; otherwise only devices scoped to this partner
    /// (`Device.service_type == pairwise_id`, spec.md §3) are removed.
    fn delete(&self, ctx: &EngineContext, group_id: &str, app_id: &str) -> Result<()> {
        let (row, shared_hash) = ctx
            .store
            .find_across_account_pair(group_id)
            .ok_or_else(|| GroupError::Store(crate::store::StoreError::GroupNotFound(group_id.to_string())))?;
        if !row.is_manager(app_id) {
            return Err(GroupError::AccessDenied(format!("{app_id} may not delete {group_id}")));
        }

        let remaining: Vec<String> = row.shared_user_id_hashes.iter().filter(|s| *s != &shared_hash).cloned().collect();

        if remaining.is_empty() {
            let (_row, devices) = ctx.store.delete_group_by_id(&row.group_id)?;
            for device in &devices {
                ctx.broadcaster.post_device_unbound(group_id, &device.udid);
                if !ctx.store.is_trusted(&device.udid) {
                    ctx.broadcaster.post_device_not_trusted(&device.udid);
                    ctx.broadcaster.post_trusted_device_num_changed(0);
                }
            }
        } else {
            ctx.store.replace_shared_user_ids(&row.group_id, remaining)?;
            let partner_devices: Vec<_> = ctx
                .store
                .list_devices(&row.group_id)
                .into_iter()
                .filter(|d| d.service_type == group_id)
                .collect();
            for device in partner_devices {
                let still_trusted = ctx.store.delete_trusted_device(&row.group_id, &device.udid)?;
                ctx.broadcaster.post_device_unbound(group_id, &device.udid);
                if !still_trusted {
                    ctx.broadcaster.post_device_not_trusted(&device.udid);
                    ctx.broadcaster
                        .post_trusted_device_num_changed(ctx.store.count_devices_in_group(&row.group_id));
                }
            }
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
    use crate::engine::identical_account::IdenticalAccountGroup;
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
    fn two_partners_share_one_row_but_distinct_pairwise_ids() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        IdenticalAccountGroup
            .create(
                &ctx,
                "app",
                &json!({"groupType": 1, "userId": "UID_AAAA", "credentialType": 1, "serverPk": "a", "pkInfoSignature": "b", "pkInfo": "c"}),
            )
            .unwrap();

        let variant = AcrossAccountGroup;
        let g1 = variant.create(&ctx, "app", &json!({"userId": "UID_AAAA", "sharedUserId": "UID_BBBB"})).unwrap();
        let g2 = variant.create(&ctx, "app", &json!({"userId": "UID_AAAA", "sharedUserId": "UID_CCCC"})).unwrap();
        assert_ne!(g1.group_id, g2.group_id);

        // Deleting one partner leaves the other intact.
        variant.delete(&ctx, &g1.group_id, "app").unwrap();
        assert!(ctx.store.find_across_account_pair(&g1.group_id).is_none());
        assert!(ctx.store.find_across_account_pair(&g2.group_id).is_some());
    }
}
