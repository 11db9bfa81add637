//! Crash-safe node-local bookkeeping: which volume is staged where, and to
//! which target paths it is published. This file is the single source of
//! truth the per-SVM mount refcount derives from.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use snafu::Snafu;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

/// State persistence failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub(crate) enum StateError {
    #[snafu(display("Volume {volume_id} not found in node state"))]
    VolumeMissing { volume_id: String },
    #[snafu(display("Failed to serialise node state: {source}"))]
    Serialise { source: serde_json::Error },
    #[snafu(display("Failed to persist node state to {}: {source}", path.display()))]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// One staged volume.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct VolumeStaging {
    pub volume_id: String,
    pub svm_name: String,
    pub vip: String,
    pub staging_path: String,
    #[serde(default)]
    pub published_paths: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
struct NodeStateData {
    volumes: HashMap<String, VolumeStaging>,
}

/// The persistent node state. All mutation goes through a mutex; the file is
/// replaced atomically, and a file which fails to parse at startup is
/// quarantined rather than clobbered.
pub(crate) struct NodeState {
    path: PathBuf,
    data: Mutex<NodeStateData>,
}

impl NodeState {
    pub(crate) fn load(path: &Path) -> Self {
        let data = match std::fs::read(path) {
            Ok(bytes) => match serde_json::from_slice::<NodeStateData>(&bytes) {
                Ok(data) => {
                    info!(path = %path.display(), volumes = data.volumes.len(), "node state loaded");
                    data
                }
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
                        "node state failed to parse, quarantining and starting empty"
                    );
                    let _ = std::fs::rename(path, &quarantine);
                    NodeStateData::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "no node state file, starting empty");
                NodeStateData::default()
            }
        };
        Self {
            path: path.to_path_buf(),
            data: Mutex::new(data),
        }
    }

    /// Persist a candidate state; only on success does it become current.
    /// After an error the file and the in-memory view both still hold the
    /// pre-operation state.
    fn commit(&self, current: &mut NodeStateData, next: NodeStateData) -> Result<(), StateError> {
        let bytes =
            serde_json::to_vec_pretty(&next).map_err(|source| StateError::Serialise { source })?;
        utils::fsutils::atomic_write(&self.path, &bytes).map_err(|source| StateError::Persist {
            path: self.path.clone(),
            source,
        })?;
        *current = next;
        Ok(())
    }

    pub(crate) fn record_staging(
        &self,
        volume_id: &str,
        svm_name: &str,
        vip: &str,
        staging_path: &str,
    ) -> Result<(), StateError> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        next.volumes.insert(
            volume_id.to_string(),
            VolumeStaging {
                volume_id: volume_id.to_string(),
                svm_name: svm_name.to_string(),
                vip: vip.to_string(),
                staging_path: staging_path.to_string(),
                published_paths: Vec::new(),
            },
        );
        self.commit(&mut data, next)
    }

    pub(crate) fn remove_staging(&self, volume_id: &str) -> Result<(), StateError> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        next.volumes.remove(volume_id);
        self.commit(&mut data, next)
    }

    /// Append a publish target. Re-publishing to a known path is a no-op.
    pub(crate) fn record_publish(
        &self,
        volume_id: &str,
        target_path: &str,
    ) -> Result<(), StateError> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        let staging = next
            .volumes
            .get_mut(volume_id)
            .ok_or_else(|| StateError::VolumeMissing {
                volume_id: volume_id.to_string(),
            })?;
        if staging.published_paths.iter().any(|path| path == target_path) {
            return Ok(());
        }
        staging.published_paths.push(target_path.to_string());
        self.commit(&mut data, next)
    }

    /// Remove a publish target. Unknown volume or path is a no-op.
    pub(crate) fn remove_publish(
        &self,
        volume_id: &str,
        target_path: &str,
    ) -> Result<(), StateError> {
        let mut data = self.data.lock();
        let mut next = data.clone();
        match next.volumes.get_mut(volume_id) {
            Some(staging) => staging.published_paths.retain(|path| path != target_path),
            None => return Ok(()),
        }
        self.commit(&mut data, next)
    }

    pub(crate) fn staging(&self, volume_id: &str) -> Option<VolumeStaging> {
        self.data.lock().volumes.get(volume_id).cloned()
    }

    /// The derived refcount: live count of staged volumes on an SVM.
    pub(crate) fn count_staged_for_svm(&self, svm_name: &str) -> usize {
        self.data
            .lock()
            .volumes
            .values()
            .filter(|staging| staging.svm_name == svm_name)
            .count()
    }

    /// Distinct SVMs referenced by staged volumes, with their VIPs.
    pub(crate) fn unique_svms(&self) -> HashMap<String, String> {
        self.data
            .lock()
            .volumes
            .values()
            .map(|staging| (staging.svm_name.clone(), staging.vip.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(dir: &tempfile::TempDir) -> NodeState {
        NodeState::load(&dir.path().join("node-volumes.json"))
    }

    #[test]
    fn staging_survives_reload() {
        let dir = tempfile::tempdir().unwrap();
        {
            let state = state(&dir);
            state
                .record_staging("pvc-1", "svm1", "10.0.0.5", "/stage/pvc-1")
                .unwrap();
            state.record_publish("pvc-1", "/pods/a").unwrap();
        }
        let state = state(&dir);
        let staging = state.staging("pvc-1").unwrap();
        assert_eq!(staging.svm_name, "svm1");
        assert_eq!(staging.published_paths, vec!["/pods/a"]);
    }

    #[test]
    fn corrupt_state_is_quarantined() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node-volumes.json");
        std::fs::write(&path, b"}{ not json").unwrap();
        let state = NodeState::load(&path);
        assert!(state.staging("pvc-1").is_none());
        let quarantined = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .any(|entry| {
                entry
                    .file_name()
                    .to_string_lossy()
                    .contains(&format!("corrupt.{}", std::process::id()))
            });
        assert!(quarantined);
    }

    #[test]
    fn refcount_derives_from_entries() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        for volume in ["pvc-1", "pvc-2", "pvc-3"] {
            state
                .record_staging(volume, "svm1", "10.0.0.5", &format!("/stage/{volume}"))
                .unwrap();
        }
        assert_eq!(state.count_staged_for_svm("svm1"), 3);
        state.remove_staging("pvc-1").unwrap();
        state.remove_staging("pvc-2").unwrap();
        assert_eq!(state.count_staged_for_svm("svm1"), 1);
        state.remove_staging("pvc-3").unwrap();
        assert_eq!(state.count_staged_for_svm("svm1"), 0);
        assert!(state.unique_svms().is_empty());
    }

    #[test]
    fn publish_is_idempotent_per_path() {
        let dir = tempfile::tempdir().unwrap();
        let state = state(&dir);
        state
            .record_staging("pvc-1", "svm1", "10.0.0.5", "/stage/pvc-1")
            .unwrap();
        state.record_publish("pvc-1", "/pods/a").unwrap();
        state.record_publish("pvc-1", "/pods/a").unwrap();
        assert_eq!(state.staging("pvc-1").unwrap().published_paths.len(), 1);
        state.remove_publish("pvc-1", "/pods/a").unwrap();
        assert!(state.staging("pvc-1").unwrap().published_paths.is_empty());
        // Unknown volume tolerated.
        state.remove_publish("pvc-9", "/pods/x").unwrap();
    }

    #[test]
    fn failed_persist_leaves_previous_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node-volumes.json");
        let state = NodeState::load(&path);
        state
            .record_staging("pvc-1", "svm1", "10.0.0.5", "/stage/pvc-1")
            .unwrap();
        let before = std::fs::read(&path).unwrap();

        // A directory squatting on the temporary path makes the write fail.
        std::fs::create_dir(path.with_extension("json.tmp")).unwrap();
        let result = state.record_staging("pvc-2", "svm1", "10.0.0.5", "/stage/pvc-2");

        assert!(result.is_err());
        // File contents equal the pre-operation state, in memory too.
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert!(state.staging("pvc-2").is_none());
        assert_eq!(state.count_staged_for_svm("svm1"), 1);
    }
}
