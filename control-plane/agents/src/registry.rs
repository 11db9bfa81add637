//! The control plane's state of record on the storage node. Kept in memory
//! behind a lock and persisted as one JSON document with the same atomic
//! write discipline as every other state file.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};
use stor_port::types::v0::{Directory, Export, QosLimits, Snapshot, Svm, Volume};
use tracing::{info, warn};

/// Errors of the registry.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum RegistryError {
    #[snafu(display("Failed to persist registry to {}: {source}", path.display()))]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("Failed to serialise registry: {source}"))]
    Serialise { source: serde_json::Error },
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
struct RegistryState {
    svms: BTreeMap<String, Svm>,
    /// svm -> volume name -> volume
    volumes: BTreeMap<String, BTreeMap<String, Volume>>,
    /// svm -> exports
    exports: BTreeMap<String, Vec<Export>>,
    /// svm -> relative path -> directory
    directories: BTreeMap<String, BTreeMap<String, Directory>>,
    /// svm -> snapshot path -> snapshot
    snapshots: BTreeMap<String, BTreeMap<String, Snapshot>>,
    /// svm -> volume name -> limits
    qos: BTreeMap<String, BTreeMap<String, QosLimits>>,
}

/// The state of record. Every mutation persists before returning.
pub struct Registry {
    path: PathBuf,
    state: RwLock<RegistryState>,
}

impl Registry {
    /// Load the registry from `state_dir`, starting empty when no file
    /// exists. A file that fails to parse is quarantined and replaced.
    pub fn load(state_dir: &Path) -> Self {
        let path = state_dir.join("registry.json");
        let state = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<RegistryState>(&bytes) {
                Ok(state) => state,
                Err(error) => {
                    let quarantine = PathBuf::from(format!(
                        "{}.corrupt.{}",
                        path.display(),
                        std::process::id()
                    ));
                    warn!(
                        path = %path.display(),
                        quarantine = %quarantine.display(),
                        %error,
                        "registry failed to parse, quarantining and starting empty"
                    );
                    let _ = std::fs::rename(&path, &quarantine);
                    RegistryState::default()
                }
            },
            Err(_) => RegistryState::default(),
        };
        info!(
            path = %path.display(),
            svms = state.svms.len(),
            "registry loaded"
        );
        Self {
            path,
            state: RwLock::new(state),
        }
    }

    fn persist(&self, state: &RegistryState) -> Result<(), RegistryError> {
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|source| RegistryError::Serialise { source })?;
        utils::fsutils::atomic_write(&self.path, &bytes).map_err(|source| {
            RegistryError::Persist {
                path: self.path.clone(),
                source,
            }
        })
    }

    // SVMs

    pub fn svm(&self, name: &str) -> Option<Svm> {
        self.state.read().svms.get(name).cloned()
    }

    pub fn svms(&self) -> Vec<Svm> {
        self.state.read().svms.values().cloned().collect()
    }

    /// The SVM whose `vlan_id` or `vip` collides with the given pair, other
    /// than `name` itself.
    pub fn network_conflict(&self, name: &str, vlan_id: u16, vip: &str) -> Option<Svm> {
        self.state
            .read()
            .svms
            .values()
            .find(|svm| svm.name != name && (svm.vlan_id == vlan_id || svm.vip == vip))
            .cloned()
    }

    pub fn upsert_svm(&self, svm: Svm) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        state.svms.insert(svm.name.clone(), svm);
        self.persist(&state)
    }

    /// Remove an SVM and everything scoped under it.
    pub fn remove_svm(&self, name: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        state.svms.remove(name);
        state.volumes.remove(name);
        state.exports.remove(name);
        state.directories.remove(name);
        state.snapshots.remove(name);
        state.qos.remove(name);
        self.persist(&state)
    }

    // Volumes

    pub fn volume(&self, svm: &str, name: &str) -> Option<Volume> {
        self.state
            .read()
            .volumes
            .get(svm)
            .and_then(|volumes| volumes.get(name))
            .cloned()
    }

    pub fn volumes(&self, svm: Option<&str>) -> Vec<Volume> {
        let state = self.state.read();
        match svm {
            Some(svm) => state
                .volumes
                .get(svm)
                .map(|volumes| volumes.values().cloned().collect())
                .unwrap_or_default(),
            None => state
                .volumes
                .values()
                .flat_map(|volumes| volumes.values().cloned())
                .collect(),
        }
    }

    pub fn upsert_volume(&self, volume: Volume) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        state
            .volumes
            .entry(volume.svm.clone())
            .or_default()
            .insert(volume.name.clone(), volume);
        self.persist(&state)
    }

    pub fn remove_volume(&self, svm: &str, name: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        if let Some(volumes) = state.volumes.get_mut(svm) {
            volumes.remove(name);
        }
        if let Some(qos) = state.qos.get_mut(svm) {
            qos.remove(name);
        }
        self.persist(&state)
    }

    // Exports

    pub fn exports(&self, svm: &str) -> Vec<Export> {
        self.state.read().exports.get(svm).cloned().unwrap_or_default()
    }

    /// Next free export id within an SVM: max + 1, starting at 1.
    pub fn next_export_id(&self, svm: &str) -> u32 {
        self.state
            .read()
            .exports
            .get(svm)
            .and_then(|exports| exports.iter().map(|export| export.export_id).max())
            .map(|max| max + 1)
            .unwrap_or(1)
    }

    pub fn add_export(&self, export: Export) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        state.exports.entry(export.svm.clone()).or_default().push(export);
        self.persist(&state)
    }

    /// Remove an export by id. Returns whether it was present.
    pub fn remove_export(&self, svm: &str, export_id: u32) -> Result<bool, RegistryError> {
        let mut state = self.state.write();
        let removed = match state.exports.get_mut(svm) {
            Some(exports) => {
                let before = exports.len();
                exports.retain(|export| export.export_id != export_id);
                exports.len() != before
            }
            None => false,
        };
        self.persist(&state)?;
        Ok(removed)
    }

    // Directories

    pub fn directory(&self, svm: &str, path: &str) -> Option<Directory> {
        self.state
            .read()
            .directories
            .get(svm)
            .and_then(|dirs| dirs.get(path))
            .cloned()
    }

    /// Project ids already taken within an SVM, used for collision retry.
    pub fn project_ids(&self, svm: &str) -> Vec<u32> {
        self.state
            .read()
            .directories
            .get(svm)
            .map(|dirs| dirs.values().map(|dir| dir.project_id).collect())
            .unwrap_or_default()
    }

    pub fn upsert_directory(&self, directory: Directory) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        state
            .directories
            .entry(directory.svm_name.clone())
            .or_default()
            .insert(directory.path.clone(), directory);
        self.persist(&state)
    }

    pub fn remove_directory(&self, svm: &str, path: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        if let Some(dirs) = state.directories.get_mut(svm) {
            dirs.remove(path);
        }
        self.persist(&state)
    }

    // Snapshots

    pub fn snapshot(&self, svm: &str, snapshot_path: &str) -> Option<Snapshot> {
        self.state
            .read()
            .snapshots
            .get(svm)
            .and_then(|snaps| snaps.get(snapshot_path))
            .cloned()
    }

    pub fn upsert_snapshot(&self, snapshot: Snapshot) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        state
            .snapshots
            .entry(snapshot.svm_name.clone())
            .or_default()
            .insert(snapshot.snapshot_path.clone(), snapshot);
        self.persist(&state)
    }

    pub fn remove_snapshot(&self, svm: &str, snapshot_path: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        if let Some(snaps) = state.snapshots.get_mut(svm) {
            snaps.remove(snapshot_path);
        }
        self.persist(&state)
    }

    // QoS

    pub fn qos(&self, svm: &str, volume: &str) -> Option<QosLimits> {
        self.state
            .read()
            .qos
            .get(svm)
            .and_then(|qos| qos.get(volume))
            .cloned()
    }

    pub fn upsert_qos(
        &self,
        svm: &str,
        volume: &str,
        limits: QosLimits,
    ) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        state
            .qos
            .entry(svm.to_string())
            .or_default()
            .insert(volume.to_string(), limits);
        self.persist(&state)
    }

    pub fn remove_qos(&self, svm: &str, volume: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write();
        if let Some(qos) = state.qos.get_mut(svm) {
            qos.remove(volume);
        }
        self.persist(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stor_port::types::v0::SvmState;

    fn svm(name: &str, vlan_id: u16, vip: &str) -> Svm {
        Svm {
            name: name.to_string(),
            vlan_id,
            ip_cidr: format!("{vip}/24"),
            vip: vip.to_string(),
            gateway: "192.168.10.1".to_string(),
            mtu: 1500,
            state: SvmState::Ready,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let registry = Registry::load(dir.path());
            registry.upsert_svm(svm("tenant_a", 100, "192.168.10.5")).unwrap();
        }
        let registry = Registry::load(dir.path());
        assert_eq!(registry.svm("tenant_a").unwrap().vlan_id, 100);
    }

    #[test]
    fn corrupt_file_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("registry.json"), b"{not json").unwrap();
        let registry = Registry::load(dir.path());
        assert!(registry.svms().is_empty());
        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .any(|entry| entry.file_name().to_string_lossy().contains("corrupt"));
        assert!(quarantined);
    }

    #[test]
    fn network_conflicts_are_pairwise() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(dir.path());
        registry.upsert_svm(svm("tenant_a", 100, "192.168.10.5")).unwrap();

        // Same name is never a conflict with itself.
        assert!(registry.network_conflict("tenant_a", 100, "192.168.10.5").is_none());
        // Same vlan, different svm.
        assert!(registry.network_conflict("tenant_b", 100, "192.168.20.5").is_some());
        // Same vip, different svm.
        assert!(registry.network_conflict("tenant_b", 200, "192.168.10.5").is_some());
        assert!(registry.network_conflict("tenant_b", 200, "192.168.20.5").is_none());
    }

    #[test]
    fn export_ids_increment_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(dir.path());
        assert_eq!(registry.next_export_id("tenant_a"), 1);
        registry
            .add_export(Export {
                export_id: 1,
                svm: "tenant_a".to_string(),
                volume: "vol1".to_string(),
                client_cidr: "10.0.0.0/24".to_string(),
                access: stor_port::types::v0::ExportAccess::Rw,
                squash: stor_port::types::v0::Squash::RootSquash,
                sec: vec![stor_port::types::v0::SecFlavor::Sys],
                path: "/exports/tenant_a/vol1".to_string(),
                pseudo: "/exports/tenant_a/vol1".to_string(),
                created_at: Utc::now(),
            })
            .unwrap();
        assert_eq!(registry.next_export_id("tenant_a"), 2);
        assert!(registry.remove_export("tenant_a", 1).unwrap());
        assert!(!registry.remove_export("tenant_a", 1).unwrap());
    }

    #[test]
    fn svm_removal_cascades() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Registry::load(dir.path());
        registry.upsert_svm(svm("tenant_a", 100, "192.168.10.5")).unwrap();
        registry
            .upsert_snapshot(Snapshot {
                svm_name: "tenant_a".to_string(),
                source_path: "v1".to_string(),
                snapshot_path: ".snapshots/s1".to_string(),
                size_bytes: 1,
                ready_to_use: true,
            })
            .unwrap();
        registry.remove_svm("tenant_a").unwrap();
        assert!(registry.svm("tenant_a").is_none());
        assert!(registry.snapshot("tenant_a", ".snapshots/s1").is_none());
    }
}
