//! Persistence collaborator.
//!
//! Steps read and write records only through `Store`. `MemoryStore` keeps an
//! `Inventory` in memory and is what the command line tool and the tests use; a
//! database-backed implementation plugs in behind the same trait.

use std::collections::BTreeMap;
use std::fs::File;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{FileError, StoreError};
use crate::model::*;

#[async_trait]
pub trait Store: Send + Sync {
    async fn host(&self, id: HostId) -> Result<Host, StoreError>;

    async fn target(&self, id: TargetId) -> Result<Target, StoreError>;
    async fn set_target_name(&self, id: TargetId, name: &str) -> Result<(), StoreError>;

    async fn target_mount(&self, id: TargetMountId) -> Result<TargetMount, StoreError>;
    /// All mounts of a target, ordered by id.
    async fn target_mounts(&self, target: TargetId) -> Result<Vec<TargetMount>, StoreError>;
    async fn set_block_device(
        &self,
        id: TargetMountId,
        lun_node: LunNodeId,
    ) -> Result<(), StoreError>;

    async fn lun_node(&self, id: LunNodeId) -> Result<LunNode, StoreError>;
    async fn find_lun_node(&self, host: HostId, path: &str)
        -> Result<Option<LunNode>, StoreError>;
    async fn create_lun_node(&self, node: NewLunNode) -> Result<LunNode, StoreError>;
    async fn attach_lun(&self, lun_node: LunNodeId, lun: LunId) -> Result<(), StoreError>;

    async fn lun(&self, id: LunId) -> Result<Lun, StoreError>;
    async fn create_lun(&self, fs_uuid: &str) -> Result<Lun, StoreError>;
    async fn set_lun_uuid(&self, id: LunId, fs_uuid: &str) -> Result<(), StoreError>;

    async fn filesystem(&self, id: FilesystemId) -> Result<Filesystem, StoreError>;

    async fn mgs(&self, target: TargetId) -> Result<Mgs, StoreError>;
    async fn set_conf_param_version_applied(
        &self,
        target: TargetId,
        version: u64,
    ) -> Result<(), StoreError>;

    async fn conf_param(&self, id: ConfParamId) -> Result<ConfParam, StoreError>;
}

/// Snapshot of every record the engine touches.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Inventory {
    #[serde(default)]
    pub hosts: Vec<Host>,
    #[serde(default)]
    pub targets: Vec<Target>,
    #[serde(default)]
    pub target_mounts: Vec<TargetMount>,
    #[serde(default)]
    pub luns: Vec<Lun>,
    #[serde(default)]
    pub lun_nodes: Vec<LunNode>,
    #[serde(default)]
    pub filesystems: Vec<Filesystem>,
    #[serde(default)]
    pub mgs: Vec<Mgs>,
    #[serde(default)]
    pub conf_params: Vec<ConfParam>,
}

impl Inventory {
    pub fn load(path: &str) -> Result<Self, FileError> {
        let file = File::open(path).map_err(|source| FileError::Io {
            path: path.to_string(),
            source,
        })?;
        serde_yaml::from_reader(file).map_err(|source| FileError::Yaml {
            path: path.to_string(),
            source,
        })
    }

    /// Write to `<path>.tmp` first and rename it over `path`, so a crash never leaves a
    /// truncated inventory behind.
    pub fn save(&self, path: &str) -> Result<(), FileError> {
        let tmp_path = format!("{}.tmp", path);
        let file = File::create(&tmp_path).map_err(|source| FileError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        serde_yaml::to_writer(&file, self).map_err(|source| FileError::Yaml {
            path: tmp_path.clone(),
            source,
        })?;
        file.sync_all().map_err(|source| FileError::Io {
            path: tmp_path.clone(),
            source,
        })?;
        std::fs::rename(&tmp_path, path).map_err(|source| FileError::Io {
            path: path.to_string(),
            source,
        })
    }
}

/// Records indexed by id.
#[derive(Debug, Default)]
struct Tables {
    hosts: BTreeMap<HostId, Host>,
    targets: BTreeMap<TargetId, Target>,
    target_mounts: BTreeMap<TargetMountId, TargetMount>,
    luns: BTreeMap<LunId, Lun>,
    lun_nodes: BTreeMap<LunNodeId, LunNode>,
    filesystems: BTreeMap<FilesystemId, Filesystem>,
    mgs: BTreeMap<TargetId, Mgs>,
    conf_params: BTreeMap<ConfParamId, ConfParam>,
}

fn get<K: Ord + ToString, V: Clone>(
    table: &BTreeMap<K, V>,
    kind: &'static str,
    id: K,
) -> Result<V, StoreError> {
    table
        .get(&id)
        .cloned()
        .ok_or_else(|| StoreError::not_found(kind, id))
}

fn get_mut<'a, K: Ord + ToString, V>(
    table: &'a mut BTreeMap<K, V>,
    kind: &'static str,
    id: K,
) -> Result<&'a mut V, StoreError> {
    match table.get_mut(&id) {
        Some(record) => Ok(record),
        None => Err(StoreError::not_found(kind, id)),
    }
}

fn next_id<K: Copy>(table: &BTreeMap<K, impl Sized>, raw: impl Fn(K) -> u32) -> u32 {
    table.keys().last().map(|k| raw(*k) + 1).unwrap_or(1)
}

/// In-memory `Store`.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new(inventory: Inventory) -> Self {
        let tables = Tables {
            hosts: inventory.hosts.into_iter().map(|r| (r.id, r)).collect(),
            targets: inventory.targets.into_iter().map(|r| (r.id, r)).collect(),
            target_mounts: inventory
                .target_mounts
                .into_iter()
                .map(|r| (r.id, r))
                .collect(),
            luns: inventory.luns.into_iter().map(|r| (r.id, r)).collect(),
            lun_nodes: inventory.lun_nodes.into_iter().map(|r| (r.id, r)).collect(),
            filesystems: inventory
                .filesystems
                .into_iter()
                .map(|r| (r.id, r))
                .collect(),
            mgs: inventory.mgs.into_iter().map(|r| (r.target, r)).collect(),
            conf_params: inventory
                .conf_params
                .into_iter()
                .map(|r| (r.id, r))
                .collect(),
        };
        Self {
            tables: Mutex::new(tables),
        }
    }

    /// Copy out the current records.
    pub fn snapshot(&self) -> Inventory {
        let tables = self.lock();
        Inventory {
            hosts: tables.hosts.values().cloned().collect(),
            targets: tables.targets.values().cloned().collect(),
            target_mounts: tables.target_mounts.values().cloned().collect(),
            luns: tables.luns.values().cloned().collect(),
            lun_nodes: tables.lun_nodes.values().cloned().collect(),
            filesystems: tables.filesystems.values().cloned().collect(),
            mgs: tables.mgs.values().cloned().collect(),
            conf_params: tables.conf_params.values().cloned().collect(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn host(&self, id: HostId) -> Result<Host, StoreError> {
        get(&self.lock().hosts, "Host", id)
    }

    async fn target(&self, id: TargetId) -> Result<Target, StoreError> {
        get(&self.lock().targets, "Target", id)
    }

    async fn set_target_name(&self, id: TargetId, name: &str) -> Result<(), StoreError> {
        get_mut(&mut self.lock().targets, "Target", id)?.name = Some(name.to_string());
        Ok(())
    }

    async fn target_mount(&self, id: TargetMountId) -> Result<TargetMount, StoreError> {
        get(&self.lock().target_mounts, "TargetMount", id)
    }

    async fn target_mounts(&self, target: TargetId) -> Result<Vec<TargetMount>, StoreError> {
        Ok(self
            .lock()
            .target_mounts
            .values()
            .filter(|tm| tm.target == target)
            .cloned()
            .collect())
    }

    async fn set_block_device(
        &self,
        id: TargetMountId,
        lun_node: LunNodeId,
    ) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if !tables.lun_nodes.contains_key(&lun_node) {
            return Err(StoreError::not_found("LunNode", lun_node));
        }
        get_mut(&mut tables.target_mounts, "TargetMount", id)?.block_device = Some(lun_node);
        Ok(())
    }

    async fn lun_node(&self, id: LunNodeId) -> Result<LunNode, StoreError> {
        get(&self.lock().lun_nodes, "LunNode", id)
    }

    async fn find_lun_node(
        &self,
        host: HostId,
        path: &str,
    ) -> Result<Option<LunNode>, StoreError> {
        Ok(self
            .lock()
            .lun_nodes
            .values()
            .find(|n| n.host == host && n.path == path)
            .cloned())
    }

    async fn create_lun_node(&self, node: NewLunNode) -> Result<LunNode, StoreError> {
        let mut tables = self.lock();
        if tables
            .lun_nodes
            .values()
            .any(|n| n.host == node.host && n.path == node.path)
        {
            return Err(StoreError::Conflict(format!(
                "LunNode for host {} path {} already exists",
                node.host, node.path
            )));
        }
        let id = LunNodeId(next_id(&tables.lun_nodes, |k: LunNodeId| k.0));
        let record = LunNode {
            id,
            host: node.host,
            path: node.path,
            size: node.size,
            used_hint: node.used_hint,
            lun: Some(node.lun),
        };
        tables.lun_nodes.insert(id, record.clone());
        Ok(record)
    }

    async fn attach_lun(&self, lun_node: LunNodeId, lun: LunId) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if !tables.luns.contains_key(&lun) {
            return Err(StoreError::not_found("Lun", lun));
        }
        get_mut(&mut tables.lun_nodes, "LunNode", lun_node)?.lun = Some(lun);
        Ok(())
    }

    async fn lun(&self, id: LunId) -> Result<Lun, StoreError> {
        get(&self.lock().luns, "Lun", id)
    }

    async fn create_lun(&self, fs_uuid: &str) -> Result<Lun, StoreError> {
        let mut tables = self.lock();
        if tables
            .luns
            .values()
            .any(|l| l.fs_uuid.as_deref() == Some(fs_uuid))
        {
            return Err(StoreError::Conflict(format!(
                "a Lun with fs_uuid {} already exists",
                fs_uuid
            )));
        }
        let id = LunId(next_id(&tables.luns, |k: LunId| k.0));
        let record = Lun {
            id,
            fs_uuid: Some(fs_uuid.to_string()),
        };
        tables.luns.insert(id, record.clone());
        Ok(record)
    }

    async fn set_lun_uuid(&self, id: LunId, fs_uuid: &str) -> Result<(), StoreError> {
        let mut tables = self.lock();
        if tables
            .luns
            .values()
            .any(|l| l.id != id && l.fs_uuid.as_deref() == Some(fs_uuid))
        {
            return Err(StoreError::Conflict(format!(
                "a Lun with fs_uuid {} already exists",
                fs_uuid
            )));
        }
        get_mut(&mut tables.luns, "Lun", id)?.fs_uuid = Some(fs_uuid.to_string());
        Ok(())
    }

    async fn filesystem(&self, id: FilesystemId) -> Result<Filesystem, StoreError> {
        get(&self.lock().filesystems, "Filesystem", id)
    }

    async fn mgs(&self, target: TargetId) -> Result<Mgs, StoreError> {
        get(&self.lock().mgs, "Mgs", target)
    }

    async fn set_conf_param_version_applied(
        &self,
        target: TargetId,
        version: u64,
    ) -> Result<(), StoreError> {
        get_mut(&mut self.lock().mgs, "Mgs", target)?.conf_param_version_applied = version;
        Ok(())
    }

    async fn conf_param(&self, id: ConfParamId) -> Result<ConfParam, StoreError> {
        get(&self.lock().conf_params, "ConfParam", id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        let mut inventory = Inventory::default();
        inventory.hosts.push(Host {
            id: HostId(1),
            address: "oss01".to_string(),
            port: None,
            user: None,
            lnet_state: LnetState::Up,
            last_success: None,
            nids: vec![],
        });
        inventory.luns.push(Lun {
            id: LunId(4),
            fs_uuid: Some("abc".to_string()),
        });
        MemoryStore::new(inventory)
    }

    #[tokio::test]
    async fn test_missing_record_is_not_found() {
        let store = store();
        assert!(matches!(
            store.target(TargetId(9)).await,
            Err(StoreError::NotFound { kind: "Target", .. })
        ));
    }

    #[tokio::test]
    async fn test_created_ids_follow_existing() {
        let store = store();
        let lun = store.create_lun("def").await.unwrap();
        assert_eq!(lun.id, LunId(5));
        let node = store
            .create_lun_node(NewLunNode {
                host: HostId(1),
                path: "/dev/sdc".to_string(),
                size: 10,
                used_hint: false,
                lun: lun.id,
            })
            .await
            .unwrap();
        assert_eq!(node.id, LunNodeId(1));
        assert_eq!(node.lun, Some(lun.id));
        assert_eq!(store.snapshot().lun_nodes.len(), 1);
    }

    #[tokio::test]
    async fn test_set_uuid_keeps_uuids_unique() {
        let store = store();
        let other = store.create_lun("def").await.unwrap();
        assert!(matches!(
            store.set_lun_uuid(other.id, "abc").await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(store.lun(other.id).await.unwrap().fs_uuid.as_deref(), Some("def"));

        // Writing a Lun's own uuid again is fine.
        store.set_lun_uuid(LunId(4), "abc").await.unwrap();
    }

    #[test]
    fn test_save_replaces_file_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("inventory.yaml");
        let path = path.to_str().unwrap();
        std::fs::write(path, "stale: true\n").unwrap();

        store().snapshot().save(path).unwrap();
        assert!(!std::path::Path::new(&format!("{}.tmp", path)).exists());
        let loaded = Inventory::load(path).unwrap();
        assert_eq!(loaded.hosts.len(), 1);
        assert_eq!(loaded.luns[0].fs_uuid.as_deref(), Some("abc"));
    }

    #[tokio::test]
    async fn test_duplicate_uuid_and_path_conflict() {
        let store = store();
        assert!(matches!(
            store.create_lun("abc").await,
            Err(StoreError::Conflict(_))
        ));
        let new_node = || NewLunNode {
            host: HostId(1),
            path: "/dev/sdc".to_string(),
            size: 10,
            used_hint: false,
            lun: LunId(4),
        };
        store.create_lun_node(new_node()).await.unwrap();
        assert!(matches!(
            store.create_lun_node(new_node()).await,
            Err(StoreError::Conflict(_))
        ));
    }
}
