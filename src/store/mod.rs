//! In-memory trust tables, mutex-guarded, persisted via the TLV codec on
//! every successful mutation. This is the subsystem's only internal lock
//! (spec.md §5): read-modify-persist is one critical section.

mod error;

pub use error::StoreError;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::TrustConfig;
use crate::model::group::visibility;
use crate::model::{Device, Group, GroupType};
use crate::tlv::{decode_database, encode_database, Database, DB_VERSION};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Everything the store touches under its one lock. Kept as a plain
/// struct rather than two separate mutexes — a mutation that needs to
/// look at both tables (cascade delete) must see a consistent view.
#[derive(Default)]
struct Tables {
    groups: HashMap<String, Group>,
    devices: HashMap<(String, String), Device>,
}

/// The trust database: groups and their member devices. Always held
/// behind an `Arc` by callers (worker thread, synchronous query paths) —
/// this type is never cloned.
pub struct TrustStore {
    tables: Mutex<Tables>,
    storage_path: PathBuf,
}

impl TrustStore {
    /// Loads the on-disk blob if present; a missing file is not an error
    /// and starts the store with empty tables.
    pub fn new(config: &TrustConfig) -> Result<Arc<Self>> {
        let storage_path = config.storage_path.clone();
        let tables = match fs::read(&storage_path) {
            Ok(bytes) => {
                let db = decode_database(&bytes)?;
                Tables {
                    groups: db
                        .groups
                        .into_iter()
                        .map(|g| (g.group_id.clone(), g))
                        .collect(),
                    devices: db
                        .devices
                        .into_iter()
                        .map(|d| (d.key(), d))
                        .collect(),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("trust store: no existing database at {:?}, starting empty", storage_path);
                Tables::default()
            }
            Err(e) => return Err(StoreError::Io(e.to_string())),
        };

        Ok(Arc::new(TrustStore {
            tables: Mutex::new(tables),
            storage_path,
        }))
    }

    fn persist(&self, tables: &Tables) -> Result<()> {
        let db = Database {
            version: DB_VERSION,
            groups: tables.groups.values().cloned().collect(),
            devices: tables.devices.values().cloned().collect(),
        };
        let bytes = encode_database(&db);
        write_atomic(&self.storage_path, &bytes).map_err(|e| StoreError::Io(e.to_string()))
    }

    // ---- group operations ----

    pub fn add_group(&self, group: Group) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if tables.groups.contains_key(&group.group_id) {
            return Err(StoreError::GroupDuplicate(group.group_id.clone()));
        }
        tables.groups.insert(group.group_id.clone(), group);
        if let Err(e) = self.persist(&tables) {
            log::warn!("trust store: persist failed after add_group: {e}");
            return Err(e);
        }
        Ok(())
    }

    /// Removes the group and cascades to its devices. Returns the removed
    /// group plus the removed devices so the caller (GroupEngine) can
    /// drive broadcaster notifications in the right order.
    pub fn delete_group_by_id(&self, group_id: &str) -> Result<(Group, Vec<Device>)> {
        let mut tables = self.tables.lock().unwrap();
        if !tables.groups.contains_key(group_id) {
            return Err(StoreError::GroupNotFound(group_id.to_string()));
        }
        let removed_devices: Vec<Device> = tables
            .devices
            .iter()
            .filter(|(_, d)| d.group_id == group_id)
            .map(|(_, d)| d.clone())
            .collect();
        for d in &removed_devices {
            tables.devices.remove(&d.key());
        }
        let group = tables.groups.remove(group_id).expect("checked above");
        if let Err(e) = self.persist(&tables) {
            log::warn!("trust store: persist failed after delete_group_by_id: {e}");
            return Err(e);
        }
        Ok((group, removed_devices))
    }

    pub fn get_group_by_id(&self, group_id: &str) -> Option<Group> {
        self.tables.lock().unwrap().groups.get(group_id).cloned()
    }

    pub fn list_groups(&self) -> Vec<Group> {
        self.tables.lock().unwrap().groups.values().cloned().collect()
    }

    pub fn list_groups_by_type(&self, group_type: GroupType) -> Vec<Group> {
        self.tables
            .lock()
            .unwrap()
            .groups
            .values()
            .filter(|g| g.group_type == group_type)
            .cloned()
            .collect()
    }

    pub fn find_peer_to_peer_by_name(&self, owner_app_id: &str, name: &str) -> Option<Group> {
        self.tables
            .lock()
            .unwrap()
            .groups
            .values()
            .find(|g| g.group_type == GroupType::PeerToPeer && g.owner() == owner_app_id && g.name == name)
            .cloned()
    }

    pub fn find_identical_account_by_user(&self, user_id_hash: &str) -> Option<Group> {
        self.tables
            .lock()
            .unwrap()
            .groups
            .values()
            .find(|g| g.group_type == GroupType::IdenticalAccount && g.user_id_hash == user_id_hash)
            .cloned()
    }

    pub fn count_by_owner(&self, owner_app_id: &str, group_type: GroupType) -> usize {
        self.tables
            .lock()
            .unwrap()
            .groups
            .values()
            .filter(|g| g.group_type == group_type && g.owner() == owner_app_id)
            .count()
    }

    // ---- device operations ----

    pub fn add_trusted_device(&self, device: Device) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        if !tables.groups.contains_key(&device.group_id) {
            return Err(StoreError::GroupNotFound(device.group_id.clone()));
        }
        let key = device.key();
        if tables.devices.contains_key(&key) {
            return Err(StoreError::DeviceDuplicate(device.udid.clone()));
        }
        tables.devices.insert(key, device);
        if let Err(e) = self.persist(&tables) {
            log::warn!("trust store: persist failed after add_trusted_device: {e}");
            return Err(e);
        }
        Ok(())
    }

    /// Removes one device row. Returns whether the device's `udid` still
    /// appears in any other group, so the caller can decide whether to
    /// fire `on_device_not_trusted`.
    pub fn delete_trusted_device(&self, group_id: &str, udid: &str) -> Result<bool> {
        let mut tables = self.tables.lock().unwrap();
        let key = (group_id.to_string(), udid.to_string());
        if tables.devices.remove(&key).is_none() {
            return Err(StoreError::DeviceNotFound(udid.to_string()));
        }
        let still_trusted = tables.devices.values().any(|d| d.udid == udid);
        if let Err(e) = self.persist(&tables) {
            log::warn!("trust store: persist failed after delete_trusted_device: {e}");
            return Err(e);
        }
        Ok(still_trusted)
    }

    pub fn get_device(&self, group_id: &str, udid: &str) -> Option<Device> {
        self.tables
            .lock()
            .unwrap()
            .devices
            .get(&(group_id.to_string(), udid.to_string()))
            .cloned()
    }

    pub fn list_devices(&self, group_id: &str) -> Vec<Device> {
        self.tables
            .lock()
            .unwrap()
            .devices
            .values()
            .filter(|d| d.group_id == group_id)
            .cloned()
            .collect()
    }

    pub fn is_trusted(&self, udid: &str) -> bool {
        self.tables.lock().unwrap().devices.values().any(|d| d.udid == udid)
    }

    pub fn is_device_in_group(&self, group_id: &str, udid: &str) -> bool {
        self.tables
            .lock()
            .unwrap()
            .devices
            .contains_key(&(group_id.to_string(), udid.to_string()))
    }

    /// Spec.md §9 open question: "the trust store reports a trusted
    /// device count of 0 or 1, not the real count" — preserved verbatim
    /// rather than "fixed", since callers depend on treating it as a bool.
    pub fn count_devices_in_group(&self, group_id: &str) -> u32 {
        if self.tables.lock().unwrap().devices.values().any(|d| d.group_id == group_id) {
            1
        } else {
            0
        }
    }

    // ---- visibility / access ----

    pub fn compare_visibility(&self, group_id: &str, required: i32) -> Result<bool> {
        let group = self
            .get_group_by_id(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;
        Ok((group.visibility & required) != 0)
    }

    pub fn is_group_owner(&self, group_id: &str, app_id: &str) -> Result<bool> {
        let group = self
            .get_group_by_id(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;
        Ok(group.owner() == app_id)
    }

    pub fn is_group_edit_allowed(&self, group_id: &str, app_id: &str) -> Result<bool> {
        let group = self
            .get_group_by_id(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;
        Ok(group.is_manager(app_id))
    }

    /// An app may read a group if owner, an allow-listed friend, or the
    /// group is public.
    pub fn is_group_accessible(&self, group_id: &str, app_id: &str) -> Result<bool> {
        let group = self
            .get_group_by_id(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;
        if group.owner() == app_id {
            return Ok(true);
        }
        if (group.visibility & visibility::ALLOW_LIST) != 0 && group.is_friend(app_id) {
            return Ok(true);
        }
        Ok((group.visibility & visibility::PUBLIC) != 0)
    }

    // ---- roles (peer-to-peer) ----

    pub fn add_role(&self, group_id: &str, role: Role, app_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let group = tables
            .groups
            .get_mut(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;
        match role {
            Role::Manager => {
                if !group.managers.iter().any(|m| m == app_id) {
                    group.managers.push(app_id.to_string());
                }
            }
            Role::Friend => {
                group.friends.insert(app_id.to_string());
            }
        }
        if let Err(e) = self.persist(&tables) {
            log::warn!("trust store: persist failed after add_role: {e}");
            return Err(e);
        }
        Ok(())
    }

    /// `managers[0]` (the owner) is immutable and can never be removed.
    pub fn remove_role(&self, group_id: &str, role: Role, app_id: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let group = tables
            .groups
            .get_mut(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;
        match role {
            Role::Manager => {
                if group.owner() == app_id {
                    return Err(StoreError::AccessDenied("owner cannot be removed as manager".into()));
                }
                group.managers.retain(|m| m != app_id);
            }
            Role::Friend => {
                group.friends.remove(app_id);
            }
        }
        if let Err(e) = self.persist(&tables) {
            log::warn!("trust store: persist failed after remove_role: {e}");
            return Err(e);
        }
        Ok(())
    }

    pub fn list_roles(&self, group_id: &str, role: Role) -> Result<Vec<String>> {
        let group = self
            .get_group_by_id(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;
        Ok(match role {
            Role::Manager => group.managers.clone(),
            Role::Friend => group.friends.into_iter().collect(),
        })
    }

    // ---- account-specific ----

    /// Erases every local account group (identical + across) whose
    /// `user_id_hash` matches. Returns the removed groups with their
    /// cascaded devices, in removal order, for the caller to broadcast.
    pub fn delete_all_account_groups(&self, user_id_hash: &str) -> Result<Vec<(Group, Vec<Device>)>> {
        let group_ids: Vec<String> = {
            let tables = self.tables.lock().unwrap();
            tables
                .groups
                .values()
                .filter(|g| {
                    (g.group_type == GroupType::IdenticalAccount || g.group_type == GroupType::AcrossAccount)
                        && g.user_id_hash == user_id_hash
                })
                .map(|g| g.group_id.clone())
                .collect()
        };
        let mut removed = Vec::new();
        for id in group_ids {
            removed.push(self.delete_group_by_id(&id)?);
        }
        Ok(removed)
    }

    /// Deletes across-account groups whose expiry has passed.
    pub fn delete_expired_user_id_groups(&self, now: i64) -> Result<Vec<(Group, Vec<Device>)>> {
        let group_ids: Vec<String> = {
            let tables = self.tables.lock().unwrap();
            tables
                .groups
                .values()
                .filter(|g| g.expire_time != crate::model::EXPIRE_TIME_NEVER && g.expire_time < now)
                .map(|g| g.group_id.clone())
                .collect()
        };
        let mut removed = Vec::new();
        for id in group_ids {
            removed.push(self.delete_group_by_id(&id)?);
        }
        Ok(removed)
    }

    pub fn merge_shared_user_ids(&self, group_id: &str, shared: &str) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let group = tables
            .groups
            .get_mut(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;
        group.shared_user_id_hashes.insert(shared.to_string());
        if let Err(e) = self.persist(&tables) {
            log::warn!("trust store: persist failed after merge_shared_user_ids: {e}");
            return Err(e);
        }
        Ok(())
    }

    pub fn replace_shared_user_ids(&self, group_id: &str, shared: Vec<String>) -> Result<()> {
        let mut tables = self.tables.lock().unwrap();
        let group = tables
            .groups
            .get_mut(group_id)
            .ok_or_else(|| StoreError::GroupNotFound(group_id.to_string()))?;
        group.shared_user_id_hashes = shared.into_iter().collect();
        if let Err(e) = self.persist(&tables) {
            log::warn!("trust store: persist failed after replace_shared_user_ids: {e}");
            return Err(e);
        }
        Ok(())
    }

    /// Flattened per-shared-user view over across-account groups sharing
    /// this `user_id_hash` (Open Questions, spec.md §9: row-level storage,
    /// flattened read).
    pub fn list_across_account_flattened(&self, user_id_hash: &str) -> Vec<(Group, String)> {
        self.tables
            .lock()
            .unwrap()
            .groups
            .values()
            .filter(|g| g.group_type == GroupType::AcrossAccount && g.user_id_hash == user_id_hash)
            .flat_map(|g| g.shared_user_id_hashes.iter().map(move |s| (g.clone(), s.clone())))
            .collect()
    }

    /// Locates the across-account row and partner hash that re-derives to
    /// `pairwise_id`, since that id is never a row key (spec.md §9).
    pub fn find_across_account_pair(&self, pairwise_id: &str) -> Option<(Group, String)> {
        self.tables
            .lock()
            .unwrap()
            .groups
            .values()
            .filter(|g| g.group_type == GroupType::AcrossAccount)
            .find_map(|g| {
                g.shared_user_id_hashes
                    .iter()
                    .find(|s| crate::model::across_account_group_id(&g.user_id_hash, s) == pairwise_id)
                    .map(|s| (g.clone(), s.clone()))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Manager,
    Friend,
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::group::visibility;
    use crate::model::{CredentialType, DeviceType};

    fn config_in(dir: &std::path::Path) -> TrustConfig {
        let mut cfg = TrustConfig::default();
        cfg.storage_path = dir.join("hcgroup.dat");
        cfg
    }

    fn sample_group(id: &str, owner: &str) -> Group {
        Group {
            group_id: id.to_string(),
            name: "livingroom".to_string(),
            owner_app_id: owner.to_string(),
            group_type: GroupType::PeerToPeer,
            visibility: visibility::PUBLIC,
            expire_time: -1,
            user_id_hash: String::new(),
            shared_user_id_hashes: Default::default(),
            managers: vec![owner.to_string()],
            friends: Default::default(),
        }
    }

    fn sample_device(group_id: &str, udid: &str) -> Device {
        Device {
            group_id: group_id.to_string(),
            udid: udid.to_string(),
            auth_id: udid.to_string(),
            user_id_hash: String::new(),
            service_type: String::new(),
            credential_type: CredentialType::Symmetric,
            device_type: DeviceType::Controller,
            last_tm: 0,
            ext: vec![],
        }
    }

    #[test]
    fn add_group_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config_in(dir.path());
        let store = TrustStore::new(&cfg).unwrap();
        store.add_group(sample_group("g1", "app")).unwrap();

        let reloaded = TrustStore::new(&cfg).unwrap();
        assert!(reloaded.get_group_by_id("g1").is_some());
    }

    #[test]
    fn duplicate_group_id_rejected_and_state_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::new(&config_in(dir.path())).unwrap();
        store.add_group(sample_group("g1", "app")).unwrap();
        let err = store.add_group(sample_group("g1", "app")).unwrap_err();
        assert!(matches!(err, StoreError::GroupDuplicate(_)));
        assert_eq!(store.list_groups().len(), 1);
    }

    #[test]
    fn missing_group_delete_returns_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::new(&config_in(dir.path())).unwrap();
        store.add_group(sample_group("g1", "app")).unwrap();
        store.delete_group_by_id("g1").unwrap();
        let err = store.delete_group_by_id("g1").unwrap_err();
        assert!(matches!(err, StoreError::GroupNotFound(_)));
    }

    #[test]
    fn cascade_delete_removes_devices() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::new(&config_in(dir.path())).unwrap();
        store.add_group(sample_group("g1", "app")).unwrap();
        store.add_trusted_device(sample_device("g1", "dev1")).unwrap();
        store.add_trusted_device(sample_device("g1", "dev2")).unwrap();

        let (_, removed) = store.delete_group_by_id("g1").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.list_devices("g1").is_empty());
        assert!(!store.is_trusted("dev1"));
    }

    #[test]
    fn trusted_device_count_is_boolean_quirk() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::new(&config_in(dir.path())).unwrap();
        store.add_group(sample_group("g1", "app")).unwrap();
        assert_eq!(store.count_devices_in_group("g1"), 0);
        store.add_trusted_device(sample_device("g1", "dev1")).unwrap();
        assert_eq!(store.count_devices_in_group("g1"), 1);
        store.add_trusted_device(sample_device("g1", "dev2")).unwrap();
        assert_eq!(store.count_devices_in_group("g1"), 1);
    }

    #[test]
    fn compare_visibility_is_bitwise_and() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::new(&config_in(dir.path())).unwrap();
        let mut g = sample_group("g1", "app");
        g.visibility = visibility::PRIVATE | visibility::ALLOW_LIST;
        store.add_group(g).unwrap();
        assert!(store.compare_visibility("g1", visibility::ALLOW_LIST).unwrap());
        assert!(!store.compare_visibility("g1", visibility::PUBLIC).unwrap());
    }

    #[test]
    fn owner_cannot_be_removed_as_manager() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::new(&config_in(dir.path())).unwrap();
        store.add_group(sample_group("g1", "app")).unwrap();
        let err = store.remove_role("g1", Role::Manager, "app").unwrap_err();
        assert!(matches!(err, StoreError::AccessDenied(_)));
    }

    #[test]
    fn delete_all_account_groups_cascades_across_account() {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::new(&config_in(dir.path())).unwrap();
        let mut identical = sample_group("idg", "app");
        identical.group_type = GroupType::IdenticalAccount;
        identical.user_id_hash = "UID_AAAA".to_string();
        store.add_group(identical).unwrap();

        let mut across = sample_group("acg", "app");
        across.group_type = GroupType::AcrossAccount;
        across.user_id_hash = "UID_AAAA".to_string();
        across.shared_user_id_hashes.insert("UID_BBBB".to_string());
        store.add_group(across).unwrap();

        let removed = store.delete_all_account_groups("UID_AAAA").unwrap();
        assert_eq!(removed.len(), 2);
        assert!(store.list_groups().is_empty());
    }
}
