//! Identical-account groups: every member device is controlled by one
//! cloud identity. Grounded in
//! `original_source/services/impl/src/group_operation/identical_account_group.c`
//! and `account_module.c` for the credential-bundle shape.

use serde_json::Value;

use crate::model::{group::visibility, identical_account_group_id, Group, GroupType};

use super::error::GroupError;
use super::validation::{optional_i64, require_str};
use super::{EngineContext, GroupVariant, Result};

pub struct IdenticalAccountGroup;

impl GroupVariant for IdenticalAccountGroup {
    fn group_type(&self) -> GroupType {
        GroupType::IdenticalAccount
    }

    fn create(&self, ctx: &EngineContext, app_id: &str, params: &Value) -> Result<Group> {
        let user_id = require_str(params, "userId")?;
        // Credential bundle presence check (spec.md §4.3). This crate
        // validates structure only — no cloud account verification or CA
        // operation is in scope (spec.md §1 Non-goals).
        if params.get("credentialType").and_then(Value::as_u64).is_none() {
            return Err(GroupError::InvalidParams("missing or non-numeric credentialType".into()));
        }
        require_str(params, "serverPk")?;
        require_str(params, "pkInfoSignature")?;
        require_str(params, "pkInfo")?;

        let user_id_hash = hex::encode(ctx.crypto.sha256(user_id.as_bytes()));
        let group_id = identical_account_group_id(&user_id_hash);

        let requested_visibility = params.get("groupVisibility").and_then(Value::as_i64).unwrap_or(visibility::UNSPECIFIED as i64) as i32;
        let visibility = super::validation::validate_creation_visibility(requested_visibility)?;
        let expire_time = optional_i64(params, "expireTime", crate::model::EXPIRE_TIME_NEVER);
        super::validation::validate_expire_time(expire_time)?;

        let group = Group {
            group_id,
            name: user_id.to_string(),
            owner_app_id: app_id.to_string(),
            group_type: GroupType::IdenticalAccount,
            visibility,
            expire_time,
            user_id_hash,
            shared_user_id_hashes: Default::default(),
            managers: vec![app_id.to_string()],
            friends: Default::default(),
        };

        ctx.store.add_group(group.clone())?;
        ctx.broadcaster.post_group_created(&group.group_id);
        Ok(group)
    }

    /// First erases every across-account group sharing this `user_id`
    /// (each as a full cascade), then the identical group and its
    /// credential (spec.md §4.3).
    fn delete(&self, ctx: &EngineContext, group_id: &str, app_id: &str) -> Result<()> {
        if !ctx.store.is_group_edit_allowed(group_id, app_id)? {
            return Err(GroupError::AccessDenied(format!("{app_id} may not delete {group_id}")));
        }
        let identical = ctx
            .store
            .get_group_by_id(group_id)
            .ok_or_else(|| GroupError::Store(crate::store::StoreError::GroupNotFound(group_id.to_string())))?;
        let user_id_hash = identical.user_id_hash.clone();

        // Across-account rows are keyed by `user_id_hash`, not the
        // pairwise id (spec.md §9); there is at most one such row for
        // this identity.
        if let Some(across_row) = ctx.store.get_group_by_id(&user_id_hash) {
            if across_row.group_type == GroupType::AcrossAccount {
                let partner_hashes: Vec<String> = across_row.shared_user_id_hashes.iter().cloned().collect();
                let (_row, devices) = ctx.store.delete_group_by_id(&user_id_hash)?;
                for device in &devices {
                    ctx.broadcaster.post_device_unbound(&user_id_hash, &device.udid);
                    if !ctx.store.is_trusted(&device.udid) {
                        ctx.broadcaster.post_device_not_trusted(&device.udid);
                        ctx.broadcaster.post_trusted_device_num_changed(0);
                    }
                }
                // "one per shared hash" (spec.md §4.2 cascade delete).
                for partner in partner_hashes {
                    let pairwise_id = crate::model::across_account_group_id(&user_id_hash, &partner);
                    ctx.broadcaster.post_group_deleted(&pairwise_id);
                }
            }
        }

        let (_group, devices) = ctx.store.delete_group_by_id(group_id)?;
        for device in &devices {
            ctx.broadcaster.post_device_unbound(group_id, &device.udid);
            if !ctx.store.is_trusted(&device.udid) {
                ctx.broadcaster.post_device_not_trusted(&device.udid);
                ctx.broadcaster.post_trusted_device_num_changed(0);
            }
        }
        ctx.crypto.erase_key(&format!("identical-credential:{user_id_hash}"));
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

    fn credential_params(user_id: &str) -> Value {
        json!({
            "groupType": 1,
            "userId": user_id,
            "credentialType": 1,
            "serverPk": "aa",
            "pkInfoSignature": "bb",
            "pkInfo": "cc",
        })
    }

    #[test]
    fn missing_credential_field_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        let params = json!({"groupType": 1, "userId": "UID_AAAA"});
        assert!(matches!(IdenticalAccountGroup.create(&ctx, "app", &params), Err(GroupError::InvalidParams(_))));
    }

    #[test]
    fn second_identical_group_for_same_user_is_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = ctx_in(dir.path());
        let variant = IdenticalAccountGroup;
        variant.create(&ctx, "app", &credential_params("UID_AAAA")).unwrap();
        let err = variant.create(&ctx, "app", &credential_params("UID_AAAA")).unwrap_err();
        assert!(matches!(err, GroupError::Store(crate::store::StoreError::GroupDuplicate(_))));
    }
}
