//! Mount plumbing: one shared NFS mount per SVM, bind mounts from it into
//! staging and target paths, and a refcount derived live from the node state
//! rather than stored anywhere.

use crate::state::NodeState;
use async_trait::async_trait;
use snafu::Snafu;
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::{debug, info, warn};

/// The fixed option set of every shared SVM mount.
pub(crate) const NFS_MOUNT_OPTIONS: &[&str] = &[
    "vers=4.2",
    "rsize=1048576",
    "wsize=1048576",
    "hard",
    "timeo=600",
    "retrans=2",
    "noresvport",
];

/// Mount failures.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub(crate) enum MountError {
    #[snafu(display("SVM {svm} is not mounted"))]
    NotMounted { svm: String },
    #[snafu(display("{operation} of {target} failed: {detail}"))]
    Failed {
        operation: &'static str,
        target: String,
        detail: String,
    },
    #[snafu(display("Failed to create {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The mount table operations this driver needs.
#[async_trait]
pub(crate) trait Mounter: Send + Sync {
    async fn mount_nfs(&self, source: &str, target: &str) -> Result<(), MountError>;
    async fn bind_mount(&self, source: &str, target: &str) -> Result<(), MountError>;
    /// Bind mounts take a read-only flag reliably only through a remount.
    async fn remount_readonly(&self, source: &str, target: &str) -> Result<(), MountError>;
    async fn unmount(&self, target: &str) -> Result<(), MountError>;
    async fn is_mount_point(&self, path: &str) -> Result<bool, MountError>;
}

/// Mounter backed by the host's mount binaries.
#[derive(Debug, Default)]
pub(crate) struct HostMounter {}

impl HostMounter {
    async fn run(
        operation: &'static str,
        target: &str,
        program: &str,
        args: &[&str],
    ) -> Result<std::process::Output, MountError> {
        tokio::process::Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|error| MountError::Failed {
                operation,
                target: target.to_string(),
                detail: error.to_string(),
            })
    }

    async fn run_checked(
        operation: &'static str,
        target: &str,
        program: &str,
        args: &[&str],
    ) -> Result<(), MountError> {
        let output = Self::run(operation, target, program, args).await?;
        if !output.status.success() {
            return Err(MountError::Failed {
                operation,
                target: target.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Mounter for HostMounter {
    async fn mount_nfs(&self, source: &str, target: &str) -> Result<(), MountError> {
        let options = NFS_MOUNT_OPTIONS.join(",");
        Self::run_checked(
            "nfs mount",
            target,
            "mount",
            &["-t", "nfs4", "-o", &options, source, target],
        )
        .await
    }

    async fn bind_mount(&self, source: &str, target: &str) -> Result<(), MountError> {
        Self::run_checked("bind mount", target, "mount", &["--bind", source, target]).await
    }

    async fn remount_readonly(&self, source: &str, target: &str) -> Result<(), MountError> {
        Self::run_checked(
            "read-only remount",
            target,
            "mount",
            &["-o", "remount,bind,ro", source, target],
        )
        .await
    }

    async fn unmount(&self, target: &str) -> Result<(), MountError> {
        Self::run_checked("unmount", target, "umount", &[target]).await
    }

    async fn is_mount_point(&self, path: &str) -> Result<bool, MountError> {
        if !Path::new(path).exists() {
            return Ok(false);
        }
        let output = Self::run("mountpoint check", path, "mountpoint", &["-q", path]).await?;
        Ok(output.status.success())
    }
}

/// Owns the shared SVM mounts. A single async mutex serializes mount table
/// mutation and node state inspection, closing the race between an unstage
/// deriving refcount zero and a concurrent stage.
pub(crate) struct MountManager {
    mounts: tokio::sync::Mutex<HashMap<String, String>>,
    state: Arc<NodeState>,
    base_mount_path: PathBuf,
    mounter: Arc<dyn Mounter>,
}

impl MountManager {
    pub(crate) fn new(
        state: Arc<NodeState>,
        base_mount_path: PathBuf,
        mounter: Arc<dyn Mounter>,
    ) -> Self {
        Self {
            mounts: tokio::sync::Mutex::new(HashMap::new()),
            state,
            base_mount_path,
            mounter,
        }
    }

    fn mount_path(&self, svm: &str) -> PathBuf {
        self.base_mount_path.join(svm)
    }

    fn nfs_source(vip: &str, svm: &str) -> String {
        format!("{vip}:{}/{svm}", utils::DEFAULT_EXPORT_ROOT)
    }

    /// Startup reconciliation: every SVM referenced by the node state either
    /// still has its shared mount, or gets it back. Staged bind mounts are
    /// left alone, the OS mount table preserved them across a plain restart.
    pub(crate) async fn reconcile(&self) {
        let svms = self.state.unique_svms();
        info!(svms = svms.len(), "reconciling shared SVM mounts from node state");
        for (svm, vip) in svms {
            match self.ensure_svm_mount(&svm, &vip).await {
                Ok(path) => debug!(%svm, path = %path.display(), "shared mount present"),
                Err(error) => warn!(%svm, %error, "failed to restore shared mount"),
            }
        }
    }

    /// Ensure an SVM's shared mount exists and return its path.
    pub(crate) async fn ensure_svm_mount(
        &self,
        svm: &str,
        vip: &str,
    ) -> Result<PathBuf, MountError> {
        let mut table = self.mounts.lock().await;
        let mount_path = self.mount_path(svm);
        let path_str = mount_path.to_string_lossy().into_owned();

        if !self.mounter.is_mount_point(&path_str).await? {
            std::fs::create_dir_all(&mount_path).map_err(|source| MountError::CreateDir {
                path: mount_path.clone(),
                source,
            })?;
            let source = Self::nfs_source(vip, svm);
            info!(%svm, %source, target = %path_str, "mounting shared SVM export");
            self.mounter.mount_nfs(&source, &path_str).await?;
        }
        table.insert(svm.to_string(), vip.to_string());
        Ok(mount_path)
    }

    /// Derived refcount of an SVM: the live count of staged volumes.
    pub(crate) fn refcount(&self, svm: &str) -> usize {
        self.state.count_staged_for_svm(svm)
    }

    /// Tear down the SVM's shared mount if its derived refcount is zero.
    /// The count is re-checked under the mount table lock immediately before
    /// the unmount.
    pub(crate) async fn unmount_svm_if_unused(&self, svm: &str) -> Result<bool, MountError> {
        let mut table = self.mounts.lock().await;
        // Final safety re-check under the lock, immediately before umount.
        let count = self.state.count_staged_for_svm(svm);
        if count > 0 {
            return Ok(false);
        }
        let mount_path = self.mount_path(svm);
        let path_str = mount_path.to_string_lossy().into_owned();
        if self.mounter.is_mount_point(&path_str).await? {
            info!(%svm, path = %path_str, "unmounting shared SVM export");
            self.mounter.unmount(&path_str).await?;
        }
        let _ = std::fs::remove_dir(&mount_path);
        table.remove(svm);
        Ok(true)
    }

    pub(crate) fn mounter(&self) -> Arc<dyn Mounter> {
        self.mounter.clone()
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;

    /// Mount table double tracking mounts in a set.
    #[derive(Default)]
    pub(crate) struct MockMounter {
        pub mounted: Mutex<HashSet<String>>,
        pub nfs_mounts: Mutex<Vec<String>>,
        pub fail_bind: Mutex<bool>,
    }

    #[async_trait]
    impl Mounter for MockMounter {
        async fn mount_nfs(&self, source: &str, target: &str) -> Result<(), MountError> {
            self.nfs_mounts.lock().push(format!("{source} -> {target}"));
            self.mounted.lock().insert(target.to_string());
            Ok(())
        }
        async fn bind_mount(&self, _source: &str, target: &str) -> Result<(), MountError> {
            if *self.fail_bind.lock() {
                return Err(MountError::Failed {
                    operation: "bind mount",
                    target: target.to_string(),
                    detail: "injected".to_string(),
                });
            }
            self.mounted.lock().insert(target.to_string());
            Ok(())
        }
        async fn remount_readonly(&self, _source: &str, target: &str) -> Result<(), MountError> {
            if !self.mounted.lock().contains(target) {
                return Err(MountError::NotMounted {
                    svm: target.to_string(),
                });
            }
            Ok(())
        }
        async fn unmount(&self, target: &str) -> Result<(), MountError> {
            self.mounted.lock().remove(target);
            Ok(())
        }
        async fn is_mount_point(&self, path: &str) -> Result<bool, MountError> {
            Ok(self.mounted.lock().contains(path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{mock::MockMounter, *};

    fn manager(dir: &tempfile::TempDir) -> (MountManager, Arc<NodeState>, Arc<MockMounter>) {
        let state = Arc::new(NodeState::load(&dir.path().join("node-volumes.json")));
        let mounter = Arc::new(MockMounter::default());
        let manager = MountManager::new(
            state.clone(),
            dir.path().join("mounts"),
            mounter.clone(),
        );
        (manager, state, mounter)
    }

    #[tokio::test]
    async fn one_shared_mount_per_svm_with_derived_refcount() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, state, mounter) = manager(&dir);

        // Stage three volumes on the same SVM.
        for volume in ["pvc-1", "pvc-2", "pvc-3"] {
            manager.ensure_svm_mount("svm1", "10.0.0.5").await.unwrap();
            state
                .record_staging(volume, "svm1", "10.0.0.5", &format!("/stage/{volume}"))
                .unwrap();
        }
        // Exactly one NFS mount was created.
        assert_eq!(mounter.nfs_mounts.lock().len(), 1);
        assert!(mounter.nfs_mounts.lock()[0].starts_with("10.0.0.5:/exports/svm1"));

        // Unstaging two leaves the mount; the third removes it.
        state.remove_staging("pvc-1").unwrap();
        assert!(!manager.unmount_svm_if_unused("svm1").await.unwrap());
        state.remove_staging("pvc-2").unwrap();
        assert!(!manager.unmount_svm_if_unused("svm1").await.unwrap());
        let mount_path = dir.path().join("mounts/svm1");
        assert!(mounter
            .mounted
            .lock()
            .contains(&mount_path.to_string_lossy().into_owned()));

        state.remove_staging("pvc-3").unwrap();
        assert!(manager.unmount_svm_if_unused("svm1").await.unwrap());
        assert!(mounter.mounted.lock().is_empty());
    }

    #[tokio::test]
    async fn reconcile_restores_missing_mounts() {
        let dir = tempfile::tempdir().unwrap();
        let (manager, state, mounter) = manager(&dir);
        state
            .record_staging("pvc-1", "svm1", "10.0.0.5", "/stage/pvc-1")
            .unwrap();
        state
            .record_staging("pvc-2", "svm2", "10.0.0.6", "/stage/pvc-2")
            .unwrap();

        manager.reconcile().await;
        assert_eq!(mounter.nfs_mounts.lock().len(), 2);

        // A second reconcile finds the mounts present and does nothing.
        manager.reconcile().await;
        assert_eq!(mounter.nfs_mounts.lock().len(), 2);
    }
}
