//! End-to-end scenarios from spec.md §8, driven entirely through the
//! Public API facade the way an embedding application would use it: two
//! independent [`Subsystem`] handles (one per device), wired together by
//! hand-carrying bytes between `add_member`/`process_data` calls instead
//! of a real transport.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::json;

use devicetrust::{Channel, CredentialType, DeviceIdProvider, DeviceType, GroupListener, GroupType, SessionError, Subsystem, TrustConfig};

fn config_in(dir: &std::path::Path) -> TrustConfig {
    let mut cfg = TrustConfig::default();
    cfg.storage_path = dir.join("hcgroup.dat");
    cfg
}

struct FixedDeviceId(String);

impl DeviceIdProvider for FixedDeviceId {
    fn device_id(&self) -> String {
        self.0.clone()
    }
}

fn subsystem_with_udid(dir: &std::path::Path, udid_byte: u8) -> Arc<Subsystem> {
    let udid = hex::encode([udid_byte; 32]);
    Subsystem::init_with_device_id(config_in(dir), Arc::new(FixedDeviceId(udid))).unwrap()
}

/// Captures exactly one outgoing message, the shape every step of the
/// four-message handshake produces.
#[derive(Default)]
struct Capture {
    bytes: Vec<u8>,
}

impl Channel for Capture {
    fn send(&mut self, _request_id: i64, bytes: &[u8]) -> Result<(), SessionError> {
        self.bytes = bytes.to_vec();
        Ok(())
    }
}

/// Fails the test if a handshake step ever tries to send — used to assert
/// the force-unbind path never touches the channel.
struct NoSend;

impl Channel for NoSend {
    fn send(&mut self, _request_id: i64, _bytes: &[u8]) -> Result<(), SessionError> {
        panic!("isIgnoreChannel=true must not send anything");
    }
}

#[derive(Default)]
struct CountingListener {
    bound: AtomicUsize,
    unbound: AtomicUsize,
}

impl GroupListener for CountingListener {
    fn on_device_bound(&self, _group_id: &str, _udid: &str) {
        self.bound.fetch_add(1, Ordering::SeqCst);
    }
    fn on_device_unbound(&self, _group_id: &str, _udid: &str) {
        self.unbound.fetch_add(1, Ordering::SeqCst);
    }
}

const APP_ID: &str = "com.huawei.devauth.test";

#[test]
fn peer_to_peer_create_and_list() {
    let dir = tempfile::tempdir().unwrap();
    let sub = subsystem_with_udid(dir.path(), 0x11);

    let params = json!({"groupType": 256, "groupName": "livingroom", "userType": 0, "groupVisibility": -1}).to_string();
    let code = sub.create_group(1, APP_ID, &params);
    assert_eq!(code, 0);

    let groups = sub.get_joined_groups(APP_ID, Some(256)).unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].group_id, sha256_hex("livingroom|com.huawei.devauth.test"));
}

#[test]
fn same_name_rejected_under_same_app() {
    let dir = tempfile::tempdir().unwrap();
    let sub = subsystem_with_udid(dir.path(), 0x11);

    let params = json!({"groupType": 256, "groupName": "livingroom", "groupVisibility": -1}).to_string();
    assert_eq!(sub.create_group(1, APP_ID, &params), 0);
    let err = sub.create_group(2, APP_ID, &params);
    assert_eq!(err, devicetrust::ErrorCode::InvalidParams as i32);
}

#[test]
fn identical_then_across_account_then_cascade_delete() {
    let dir = tempfile::tempdir().unwrap();
    let sub = subsystem_with_udid(dir.path(), 0x11);

    let identical_params = json!({
        "groupType": 1,
        "userId": "UID_AAAA",
        "credentialType": 1,
        "serverPk": "pk",
        "pkInfoSignature": "sig",
        "pkInfo": "info",
    })
    .to_string();

    // Attempting the across-account half before the identical group
    // exists fails with GroupNotFound.
    let across_too_early = json!({"groupType": 1282, "userId": "UID_AAAA", "sharedUserId": "UID_BBBB"}).to_string();
    let early_err = sub.create_group(1, APP_ID, &across_too_early);
    assert_eq!(early_err, devicetrust::ErrorCode::GroupNotFound as i32);

    assert_eq!(sub.create_group(2, APP_ID, &identical_params), 0);

    let across_params = json!({"groupType": 1282, "userId": "UID_AAAA", "sharedUserId": "UID_BBBB"}).to_string();
    assert_eq!(sub.create_group(3, APP_ID, &across_params), 0);

    let user_id_hash = sha256_hex("UID_AAAA");
    let shared_hash = sha256_hex("UID_BBBB");
    let expected_across_id = across_account_id(&user_id_hash, &shared_hash);
    let across_groups = sub.get_joined_groups(APP_ID, Some(1282)).unwrap();
    assert_eq!(across_groups.len(), 1);
    assert_eq!(across_groups[0].group_id, expected_across_id);

    // The identical group's own id hashes the user-id hash a second
    // time (spec.md §3: `identical_account_group_id` is a pure function
    // of `user_id_hash`, distinct from the row key an across-account
    // partner row would otherwise collide with).
    let identical_group_id = sha256_hex(&user_id_hash);
    let identical_groups_before = sub.get_joined_groups(APP_ID, Some(1)).unwrap();
    assert_eq!(identical_groups_before.len(), 1);
    assert_eq!(identical_groups_before[0].group_id, identical_group_id);

    assert_eq!(sub.delete_group(4, &identical_group_id, APP_ID), 0);
    assert!(sub.get_joined_groups(APP_ID, Some(1)).unwrap().is_empty());
    assert!(sub.get_joined_groups(APP_ID, Some(1282)).unwrap().is_empty());
}

#[test]
fn bind_handshake_happy_path_and_force_unbind() {
    let client_dir = tempfile::tempdir().unwrap();
    let server_dir = tempfile::tempdir().unwrap();
    let client = subsystem_with_udid(client_dir.path(), 0xAA);
    let server = subsystem_with_udid(server_dir.path(), 0xBB);

    let group_params = json!({"groupType": 256, "groupName": "livingroom", "groupVisibility": -1}).to_string();
    assert_eq!(client.create_group(1, APP_ID, &group_params), 0);
    assert_eq!(server.create_group(1, APP_ID, &group_params), 0);
    let group_id = sha256_hex("livingroom|com.huawei.devauth.test");

    let client_listener = Arc::new(CountingListener::default());
    let server_listener = Arc::new(CountingListener::default());
    client.reg_listener(APP_ID, Box::new(ReportingListener(client_listener.clone())));
    server.reg_listener(APP_ID, Box::new(ReportingListener(server_listener.clone())));

    let request_id = 42;
    let pin = "123456789012345".to_string();
    let bind_params = json!({"pin": pin, "peerAuthId": "authServer"}).to_string();

    // M1: client -> server.
    let mut m1 = Capture::default();
    assert_eq!(client.add_member(request_id, &group_id, APP_ID, &bind_params, &mut m1), 0);

    // Server receives M1, has no PIN yet: sits waiting for confirmation.
    let mut server_chan = Capture::default();
    assert_eq!(server.process_data(request_id, &group_id, APP_ID, &m1.bytes, &mut server_chan), 0);
    assert!(server_chan.bytes.is_empty());

    // M2: server confirms the PIN and replies.
    let confirm_params = json!({"pin": pin}).to_string();
    let mut m2 = Capture::default();
    assert_eq!(server.confirm_request(request_id, &confirm_params, &mut m2), 0);
    assert!(!m2.bytes.is_empty());

    // M3: client processes M2, replies.
    let mut m3 = Capture::default();
    assert_eq!(client.process_data(request_id, &group_id, APP_ID, &m2.bytes, &mut m3), 0);

    // M4: server processes M3, finishes, and persists its device row.
    let mut m4 = Capture::default();
    assert_eq!(server.process_data(request_id, &group_id, APP_ID, &m3.bytes, &mut m4), 0);

    // Client processes M4 and finishes on its side too.
    let mut sink = Capture::default();
    assert_eq!(client.process_data(request_id, &group_id, APP_ID, &m4.bytes, &mut sink), 0);

    let client_udid = hex::encode([0xAA; 32]);
    let server_udid = hex::encode([0xBB; 32]);

    let client_devices = client.get_trusted_devices(&group_id).unwrap();
    assert_eq!(client_devices.len(), 1);
    assert_eq!(client_devices[0].udid, server_udid);
    assert_eq!(client_devices[0].credential_type, CredentialType::Symmetric);

    let server_devices = server.get_trusted_devices(&group_id).unwrap();
    assert_eq!(server_devices.len(), 1);
    assert_eq!(server_devices[0].udid, client_udid);
    assert_eq!(server_devices[0].credential_type, CredentialType::Symmetric);

    assert_eq!(client_listener.bound.load(Ordering::SeqCst), 1);
    assert_eq!(server_listener.bound.load(Ordering::SeqCst), 1);

    // Force unbind: isIgnoreChannel skips the round trip entirely.
    let delete_params = json!({"deleteId": client_udid, "isForceDelete": true, "isIgnoreChannel": true}).to_string();
    let mut no_send = NoSend;
    assert_eq!(server.delete_member(43, &group_id, APP_ID, &delete_params, &mut no_send), 0);
    assert!(server.get_trusted_devices(&group_id).unwrap().is_empty());
    assert_eq!(server_listener.unbound.load(Ordering::SeqCst), 1);
}

/// `reg_listener` takes ownership of the boxed listener, so the test
/// shares the counters through a thin forwarding wrapper instead.
struct ReportingListener(Arc<CountingListener>);

impl GroupListener for ReportingListener {
    fn on_device_bound(&self, group_id: &str, udid: &str) {
        self.0.on_device_bound(group_id, udid);
    }
    fn on_device_unbound(&self, group_id: &str, udid: &str) {
        self.0.on_device_unbound(group_id, udid);
    }
}

fn sha256_hex(s: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}

fn across_account_id(a: &str, b: &str) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    let joined = format!("{first}|{second}");
    sha256_hex(&joined)
}

#[allow(dead_code)]
fn assert_group_type(t: GroupType) {
    let _ = t;
}

#[allow(dead_code)]
fn assert_device_type(t: DeviceType) {
    let _ = t;
}
