//! Shared create-time validation, applied before any mutation reaches the
//! store (teacher pattern: `CheckCreateParams` validates up front in
//! `original_source/.../peer_to_peer_group.c`).

use serde_json::Value;

use crate::model::group::visibility;
use crate::model::{DeviceType, GroupType, MAX_EXPIRE_TIME_DAYS};

use super::error::GroupError;

const SECONDS_PER_DAY: i64 = 86_400;

/// Every creation params blob carries `groupType`; this is the dispatch
/// key `GroupEngine::create` reads before handing the blob to a variant.
pub fn read_group_type(params: &Value) -> Result<GroupType, GroupError> {
    let raw = params
        .get("groupType")
        .and_then(Value::as_u64)
        .ok_or_else(|| GroupError::InvalidParams("missing or non-numeric groupType".into()))?;
    GroupType::from_u32(raw as u32).ok_or_else(|| GroupError::InvalidParams(format!("unknown groupType {raw}")))
}

pub fn require_str<'a>(params: &'a Value, field: &'static str) -> Result<&'a str, GroupError> {
    params
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| GroupError::InvalidParams(format!("missing required field {field}")))
}

pub fn optional_str<'a>(params: &'a Value, field: &'static str) -> Option<&'a str> {
    params.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

pub fn optional_i64(params: &Value, field: &'static str, default: i64) -> i64 {
    params.get(field).and_then(Value::as_i64).unwrap_or(default)
}

pub fn validate_expire_time(expire_time: i64) -> Result<(), GroupError> {
    if expire_time == crate::model::EXPIRE_TIME_NEVER {
        return Ok(());
    }
    let max = MAX_EXPIRE_TIME_DAYS * SECONDS_PER_DAY;
    if expire_time < 1 || expire_time > max {
        return Err(GroupError::InvalidParams(format!(
            "expire_time {expire_time} out of range (-1 or 1..={max})"
        )));
    }
    Ok(())
}

/// Creation only accepts `public` or `private`; `allow_list` is set later
/// via role operations, and `unspecified` (`-1`) means "use the default".
pub fn validate_creation_visibility(requested: i32) -> Result<i32, GroupError> {
    match requested {
        visibility::UNSPECIFIED => Ok(visibility::PUBLIC),
        visibility::PUBLIC | visibility::PRIVATE => Ok(requested),
        other => Err(GroupError::InvalidParams(format!(
            "visibility {other} may only be public or private at creation"
        ))),
    }
}

pub fn validate_device_type(raw: u32) -> Result<DeviceType, GroupError> {
    DeviceType::from_u32(raw).ok_or_else(|| GroupError::InvalidParams(format!("unknown device_type {raw}")))
}

/// `auth_id` defaults to the local `udid` when absent.
pub fn resolve_auth_id(auth_id: Option<&str>, udid: &str) -> String {
    match auth_id {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => udid.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expire_time_never_is_valid() {
        assert!(validate_expire_time(crate::model::EXPIRE_TIME_NEVER).is_ok());
    }

    #[test]
    fn expire_time_out_of_range_rejected() {
        assert!(validate_expire_time(0).is_err());
        assert!(validate_expire_time(91 * SECONDS_PER_DAY).is_err());
    }

    #[test]
    fn unspecified_visibility_defaults_to_public() {
        assert_eq!(validate_creation_visibility(visibility::UNSPECIFIED).unwrap(), visibility::PUBLIC);
    }

    #[test]
    fn allow_list_rejected_at_creation() {
        assert!(validate_creation_visibility(visibility::ALLOW_LIST).is_err());
    }

    #[test]
    fn auth_id_defaults_to_udid() {
        assert_eq!(resolve_auth_id(None, "udid123"), "udid123");
        assert_eq!(resolve_auth_id(Some(""), "udid123"), "udid123");
        assert_eq!(resolve_auth_id(Some("authServer"), "udid123"), "authServer");
    }
}
