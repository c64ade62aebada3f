//! Public API facade (spec.md §6): lifecycle, group management, role
//! management, queries, listener registration, and auth. Every function
//! here is the one place numeric error codes appear — internal code
//! always works with the typed [`crate::Error`] and only collapses to
//! `i32` at the boundary (SPEC_FULL.md §7).

use serde_json::Value;

use crate::engine::GroupError;
use crate::error::{Error, ErrorCode, Result as CrateResult};
use crate::model::{Device, DeviceType, Group, GroupType};
use crate::session::{AutoCreate, Channel, GroupOp, SessionError, WireMessage};
use crate::store::{Role, StoreError};
use crate::Subsystem;

fn ok_code() -> i32 {
    ErrorCode::Success as i32
}

fn as_code(e: Error) -> i32 {
    e.code() as i32
}

fn run(f: impl FnOnce() -> CrateResult<()>) -> i32 {
    match f() {
        Ok(()) => ok_code(),
        Err(e) => as_code(e),
    }
}

fn query<T>(f: impl FnOnce() -> CrateResult<T>) -> std::result::Result<T, i32> {
    f().map_err(as_code)
}

fn parse_params(params_json: &str) -> CrateResult<Value> {
    serde_json::from_str(params_json).map_err(|e| Error::InvalidParams(format!("malformed JSON params: {e}")))
}

fn require_str<'a>(params: &'a Value, field: &'static str) -> CrateResult<&'a str> {
    params
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or(Error::JsonMissingField(field))
}

fn optional_str<'a>(params: &'a Value, field: &'static str) -> Option<&'a str> {
    params.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn optional_bool(params: &Value, field: &'static str, default: bool) -> bool {
    params.get(field).and_then(Value::as_bool).unwrap_or(default)
}

fn optional_device_type(params: &Value, field: &'static str, default: DeviceType) -> CrateResult<DeviceType> {
    match params.get(field).and_then(Value::as_u64) {
        None => Ok(default),
        Some(raw) => DeviceType::from_u32(raw as u32).ok_or_else(|| Error::InvalidParams(format!("unknown {field} {raw}"))),
    }
}

/// The two long-term public keys a bind exchange stashes in a peer
/// device's `ext` bytes (x25519 static || ed25519 static), read back for
/// STS re-auth. See `session::task::Session::build_peer_device`.
fn extract_longterm_keys(ext: &[u8]) -> CrateResult<([u8; 32], [u8; 32])> {
    if ext.len() < 64 {
        return Err(SessionError::BadMessage("peer device has no stored long-term keys".into()).into());
    }
    let mut x = [0u8; 32];
    let mut ed = [0u8; 32];
    x.copy_from_slice(&ext[0..32]);
    ed.copy_from_slice(&ext[32..64]);
    Ok((x, ed))
}

/// Flattened view returned by [`Subsystem::get_pk_info_list`]: every
/// credential-bearing group id sharing one cloud identity's PK material.
/// Deliberately narrow — this crate validates a presented credential blob
/// but does no cloud account verification (spec.md §1 Non-goals), so the
/// only thing worth reporting back is which local groups trust that PK.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkInfo {
    pub group_id: String,
    pub user_id_hash: String,
}

impl Subsystem {
    // ---- group management ----

    pub fn create_group(&self, request_id: i64, app_id: &str, params_json: &str) -> i32 {
        run(|| {
            log::debug!("create_group: request {request_id} from {app_id}");
            let params = parse_params(params_json)?;
            self.engine.create(app_id, &params)?;
            Ok(())
        })
    }

    pub fn delete_group(&self, request_id: i64, group_id: &str, app_id: &str) -> i32 {
        run(|| {
            log::debug!("delete_group: request {request_id} for {group_id}");
            self.engine.delete(group_id, app_id)?;
            Ok(())
        })
    }

    /// Starts a client-side bind: sends `M1` over `channel` and registers
    /// the session under `request_id` (spec.md §4.5, §8 scenario 5).
    pub fn add_member(&self, request_id: i64, group_id: &str, app_id: &str, params_json: &str, channel: &mut dyn Channel) -> i32 {
        run(|| {
            self.engine.prepare_bind(group_id, app_id)?;
            let params = parse_params(params_json)?;
            let pin = require_str(&params, "pin")?.to_string();
            let peer_auth_id = require_str(&params, "peerAuthId")?;
            let peer_device_type = optional_device_type(&params, "peerDeviceType", DeviceType::Controller)?;

            let local_udid = self.local_udid();
            let local_auth_id = optional_str(&params, "authId").unwrap_or(&local_udid).to_string();

            self.sessions
                .start_client_bind(request_id, group_id, &local_udid, &local_auth_id, peer_auth_id, peer_device_type, pin, channel)?;
            Ok(())
        })
    }

    /// Removes a trusted device. `isIgnoreChannel` (spec.md §4.5, §8
    /// scenario 6) skips any peer round-trip entirely; otherwise a
    /// best-effort `MEMBER_DELETE` notice goes out over `channel` before
    /// the local row is dropped.
    pub fn delete_member(&self, request_id: i64, group_id: &str, app_id: &str, params_json: &str, channel: &mut dyn Channel) -> i32 {
        run(|| {
            if !self.store.is_group_edit_allowed(group_id, app_id)? {
                return Err(GroupError::AccessDenied(format!("{app_id} may not edit {group_id}")).into());
            }
            let params = parse_params(params_json)?;
            let delete_id = require_str(&params, "deleteId")?;
            let ignore_channel = optional_bool(&params, "isIgnoreChannel", false);

            if !ignore_channel {
                let notice = WireMessage {
                    request_id,
                    group_op: GroupOp::MemberDelete as i32,
                    auth_id: Some(delete_id.to_string()),
                    ..Default::default()
                };
                channel.send(request_id, &notice.to_bytes())?;
            }

            self.engine.unbind_device(group_id, delete_id)?;
            Ok(())
        })
    }

    /// Delivers inbound channel bytes for an existing bind session, or
    /// lazily registers a server-side session on first contact if this
    /// device is a manager of `group_id` (spec.md §4.6).
    pub fn process_data(&self, request_id: i64, group_id: &str, app_id: &str, bytes: &[u8], channel: &mut dyn Channel) -> i32 {
        run(|| {
            let local_udid = self.local_udid();
            let auto_create = if self.store.is_group_edit_allowed(group_id, app_id)? {
                Some(AutoCreate::Bind {
                    group_id: group_id.to_string(),
                    local_udid: local_udid.clone(),
                    local_auth_id: local_udid.clone(),
                    peer_device_type: DeviceType::Controller,
                })
            } else {
                None
            };
            self.sessions.handle_inbound(request_id, bytes, channel, auto_create)?;
            Ok(())
        })
    }

    /// Supplies the PIN for a server-side bind request that is waiting on
    /// confirmation (supplemented feature, SPEC_FULL.md "Supplemented
    /// features").
    pub fn confirm_request(&self, request_id: i64, params_json: &str, channel: &mut dyn Channel) -> i32 {
        run(|| {
            let params = parse_params(params_json)?;
            let pin = require_str(&params, "pin")?.to_string();
            self.sessions.confirm_request(request_id, pin, channel)?;
            Ok(())
        })
    }

    // ---- role management (peer-to-peer only, spec.md §4.3) ----

    pub fn add_manager(&self, group_id: &str, caller_app_id: &str, target_app_id: &str) -> i32 {
        run(|| Ok(self.engine.add_role(group_id, Role::Manager, caller_app_id, target_app_id)?))
    }

    pub fn add_friend(&self, group_id: &str, caller_app_id: &str, target_app_id: &str) -> i32 {
        run(|| Ok(self.engine.add_role(group_id, Role::Friend, caller_app_id, target_app_id)?))
    }

    pub fn delete_manager(&self, group_id: &str, caller_app_id: &str, target_app_id: &str) -> i32 {
        run(|| Ok(self.engine.remove_role(group_id, Role::Manager, caller_app_id, target_app_id)?))
    }

    pub fn delete_friend(&self, group_id: &str, caller_app_id: &str, target_app_id: &str) -> i32 {
        run(|| Ok(self.engine.remove_role(group_id, Role::Friend, caller_app_id, target_app_id)?))
    }

    pub fn get_managers(&self, group_id: &str) -> std::result::Result<Vec<String>, i32> {
        query(|| Ok(self.engine.list_roles(group_id, Role::Manager)?))
    }

    pub fn get_friends(&self, group_id: &str) -> std::result::Result<Vec<String>, i32> {
        query(|| Ok(self.engine.list_roles(group_id, Role::Friend)?))
    }

    // ---- queries ----

    pub fn check_access(&self, group_id: &str, app_id: &str) -> std::result::Result<bool, i32> {
        query(|| Ok(self.store.is_group_accessible(group_id, app_id)?))
    }

    /// Flattened query over identical/across-account credential bundles
    /// sharing one cloud identity (SPEC_FULL.md "Supplemented features").
    pub fn get_pk_info_list(&self, user_id: &str) -> std::result::Result<Vec<PkInfo>, i32> {
        query(|| {
            let user_id_hash = hex::encode(self.crypto.sha256(user_id.as_bytes()));
            let mut result = Vec::new();
            if let Some(g) = self.store.find_identical_account_by_user(&user_id_hash) {
                result.push(PkInfo {
                    group_id: g.group_id,
                    user_id_hash: user_id_hash.clone(),
                });
            }
            for (_row, shared) in self.store.list_across_account_flattened(&user_id_hash) {
                result.push(PkInfo {
                    group_id: crate::model::across_account_group_id(&user_id_hash, &shared),
                    user_id_hash: user_id_hash.clone(),
                });
            }
            Ok(result)
        })
    }

    /// Looks a group up by id, re-deriving the flattened pairwise view for
    /// across-account ids (they are never a row key, spec.md §9).
    pub fn get_group_info_by_id(&self, group_id: &str) -> std::result::Result<Group, i32> {
        query(|| {
            if let Some(g) = self.store.get_group_by_id(group_id) {
                return Ok(g);
            }
            let (row, shared) = self
                .store
                .find_across_account_pair(group_id)
                .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;
            Ok(row.flatten_across_account(&shared))
        })
    }

    /// Looks a group up by its creation-time natural key instead of its
    /// derived id: `groupName` for peer-to-peer, `userId` for identical-
    /// account, `userId`+`sharedUserId` for across-account.
    pub fn get_group_info(&self, app_id: &str, params_json: &str) -> std::result::Result<Group, i32> {
        query(|| {
            let params = parse_params(params_json)?;
            let raw_type = params
                .get("groupType")
                .and_then(Value::as_u64)
                .ok_or(Error::JsonMissingField("groupType"))?;
            let group_type = GroupType::from_u32(raw_type as u32).ok_or_else(|| Error::InvalidParams(format!("unknown groupType {raw_type}")))?;

            match group_type {
                GroupType::PeerToPeer => {
                    let name = require_str(&params, "groupName")?;
                    self.store
                        .find_peer_to_peer_by_name(app_id, name)
                        .ok_or_else(|| StoreError::GroupNotFound(name.to_string()).into())
                }
                GroupType::IdenticalAccount => {
                    let user_id = require_str(&params, "userId")?;
                    let user_id_hash = hex::encode(self.crypto.sha256(user_id.as_bytes()));
                    self.store
                        .find_identical_account_by_user(&user_id_hash)
                        .ok_or_else(|| StoreError::GroupNotFound(user_id_hash).into())
                }
                GroupType::AcrossAccount => {
                    let user_id = require_str(&params, "userId")?;
                    let shared_user_id = require_str(&params, "sharedUserId")?;
                    let user_id_hash = hex::encode(self.crypto.sha256(user_id.as_bytes()));
                    let shared_hash = hex::encode(self.crypto.sha256(shared_user_id.as_bytes()));
                    let pairwise_id = crate::model::across_account_group_id(&user_id_hash, &shared_hash);
                    let (row, shared) = self
                        .store
                        .find_across_account_pair(&pairwise_id)
                        .ok_or_else(|| StoreError::GroupNotFound(pairwise_id.clone()))?;
                    Ok(row.flatten_across_account(&shared))
                }
            }
        })
    }

    /// Every group `app_id` manages or is an allow-listed friend of,
    /// optionally filtered to one `group_type` (spec.md §8 scenario 1).
    /// Across-account rows expand into one entry per partner.
    pub fn get_joined_groups(&self, app_id: &str, group_type: Option<u32>) -> std::result::Result<Vec<Group>, i32> {
        query(|| {
            let filter = match group_type {
                Some(raw) => Some(GroupType::from_u32(raw).ok_or_else(|| Error::InvalidParams(format!("unknown groupType {raw}")))?),
                None => None,
            };
            let mut result = Vec::new();
            for g in self.store.list_groups() {
                if let Some(filter) = filter {
                    if g.group_type != filter {
                        continue;
                    }
                }
                if !(g.is_manager(app_id) || g.is_friend(app_id)) {
                    continue;
                }
                if g.group_type == GroupType::AcrossAccount {
                    for shared in g.shared_user_id_hashes.clone() {
                        result.push(g.flatten_across_account(&shared));
                    }
                } else {
                    result.push(g);
                }
            }
            Ok(result)
        })
    }

    /// Every group containing a trusted device with this `udid` (only
    /// ever populated for peer-to-peer groups — account-variant devices
    /// are out of this crate's scope, spec.md §1 Non-goals).
    pub fn get_related_groups(&self, udid: &str) -> std::result::Result<Vec<Group>, i32> {
        query(|| {
            let mut result = Vec::new();
            for g in self.store.list_groups() {
                if self.store.is_device_in_group(&g.group_id, udid) {
                    result.push(g);
                }
            }
            Ok(result)
        })
    }

    pub fn get_device_info_by_id(&self, group_id: &str, udid: &str) -> std::result::Result<Device, i32> {
        query(|| {
            self.store
                .get_device(group_id, udid)
                .ok_or_else(|| StoreError::DeviceNotFound(udid.to_string()).into())
        })
    }

    pub fn get_trusted_devices(&self, group_id: &str) -> std::result::Result<Vec<Device>, i32> {
        query(|| {
            if self.store.get_group_by_id(group_id).is_none() {
                return Err(StoreError::GroupNotFound(group_id.to_string()).into());
            }
            Ok(self.store.list_devices(group_id))
        })
    }

    pub fn is_device_in_group(&self, group_id: &str, udid: &str) -> bool {
        self.store.is_device_in_group(group_id, udid)
    }

    // ---- listener registration ----
    // (reg_listener / unreg_listener live on Subsystem directly, in lib.rs)

    // ---- auth (STS re-auth with stored keys, spec.md §4.5) ----

    /// Starts a client-side re-auth against an already-bound peer,
    /// looking the peer's stored static keys up from its `Device.ext`
    /// (written by the original bind, see `session::task::build_peer_device`).
    pub fn auth_key_agree(&self, request_id: i64, group_id: &str, peer_udid: &str, channel: &mut dyn Channel) -> i32 {
        run(|| {
            let peer_device = self.store.get_device(group_id, peer_udid).ok_or_else(|| StoreError::DeviceNotFound(peer_udid.to_string()))?;
            let (peer_x, peer_ed) = extract_longterm_keys(&peer_device.ext)?;

            let local_udid = self.local_udid();
            let local_auth_id = self.store.get_device(group_id, &local_udid).map(|d| d.auth_id).unwrap_or_else(|| local_udid.clone());

            self.sessions.start_client_auth(
                request_id,
                group_id,
                &local_udid,
                &local_auth_id,
                &peer_device.auth_id,
                peer_device.device_type,
                peer_x,
                peer_ed,
                channel,
            )?;
            Ok(())
        })
    }

    /// Delivers inbound re-auth bytes, lazily registering a server-side
    /// session on first contact using the peer's stored keys (same
    /// auto-create shape as [`Subsystem::process_data`]).
    pub fn process_key_agree_data(&self, request_id: i64, group_id: &str, peer_udid: &str, bytes: &[u8], channel: &mut dyn Channel) -> i32 {
        run(|| {
            let local_udid = self.local_udid();
            let local_auth_id = self.store.get_device(group_id, &local_udid).map(|d| d.auth_id).unwrap_or_else(|| local_udid.clone());

            let auto_create = match self.store.get_device(group_id, peer_udid) {
                Some(peer_device) => {
                    let (peer_x, peer_ed) = extract_longterm_keys(&peer_device.ext)?;
                    Some(AutoCreate::Auth {
                        group_id: group_id.to_string(),
                        local_udid: local_udid.clone(),
                        local_auth_id: local_auth_id.clone(),
                        peer_auth_id: peer_device.auth_id.clone(),
                        peer_device_type: peer_device.device_type,
                        peer_static_x25519_pub: peer_x,
                        peer_static_ed25519_pub: peer_ed,
                    })
                }
                None => None,
            };
            self.sessions.handle_inbound(request_id, bytes, channel, auto_create)?;
            Ok(())
        })
    }
}
