//! XFS formatting, mounting and project quotas.

use crate::runner::{RunnerError, SystemRunner};
use sha2::{Digest, Sha256};
use snafu::Snafu;
use std::sync::Arc;
use tracing::debug;

/// mkfs options tuned for NVMe-backed thin pools.
const MKFS_OPTIONS: &[&str] = &[
    "-b", "size=4096",
    "-m", "crc=1,finobt=1",
    "-i", "size=512,maxpct=25",
    "-d", "agcount=32,su=256k,sw=1",
];

/// Mount options of every SVM volume.
const MOUNT_OPTIONS: &str = "rw,noatime,nodiratime,logbsize=256k,inode64";

/// Errors of the XFS layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum XfsError {
    #[snafu(display("Mount point {mount_point} is not mounted"))]
    NotMounted { mount_point: String },
    #[snafu(display("No quota report entry for project {project_id}"))]
    ProjectMissing { project_id: u32 },
    #[snafu(display("Unexpected xfs_quota output: {output}"))]
    Parse { output: String },
    #[snafu(display("{source}"))]
    Command { source: RunnerError },
}

impl From<RunnerError> for XfsError {
    fn from(source: RunnerError) -> Self {
        XfsError::Command { source }
    }
}

/// Filesystem-level usage of a mounted volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FsUsage {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub available_bytes: u64,
}

/// A project quota entry as reported by the filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProjectQuota {
    pub project_id: u32,
    pub used_bytes: u64,
    pub hard_bytes: u64,
}

/// Derive the XFS project id for `(svm, path)`: a stable 32-bit hash with a
/// salt for collision retry. Zero is reserved by XFS and skipped.
pub fn project_id_for(svm: &str, path: &str, attempt: u32) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(svm.as_bytes());
    hasher.update(b"/");
    hasher.update(path.as_bytes());
    if attempt > 0 {
        hasher.update(attempt.to_be_bytes());
    }
    let digest = hasher.finalize();
    let id = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]);
    if id == 0 {
        1
    } else {
        id
    }
}

/// XFS operations on the storage node.
#[derive(Clone)]
pub struct Xfs {
    runner: Arc<dyn SystemRunner>,
}

impl Xfs {
    pub fn new(runner: Arc<dyn SystemRunner>) -> Self {
        Self { runner }
    }

    async fn is_mounted(&self, mount_point: &str) -> Result<bool, XfsError> {
        let output = self.runner.run("mountpoint", &["-q", mount_point]).await?;
        Ok(output.success)
    }

    /// Format a device. A device already carrying XFS is left alone.
    pub async fn format(&self, device: &str) -> Result<(), XfsError> {
        let probe = self.runner.run("blkid", &[device]).await?;
        if probe.success && probe.stdout.to_lowercase().contains("xfs") {
            return Ok(());
        }
        let mut args: Vec<&str> = MKFS_OPTIONS.to_vec();
        args.push(device);
        self.runner.run_checked("mkfs.xfs", &args).await?;
        debug!(%device, "formatted xfs");
        Ok(())
    }

    /// Mount a device with project quotas enabled. Already mounted is success.
    pub async fn mount(&self, device: &str, mount_point: &str) -> Result<(), XfsError> {
        self.runner.run_checked("mkdir", &["-p", mount_point]).await?;
        if self.is_mounted(mount_point).await? {
            return Ok(());
        }
        let options = format!("{MOUNT_OPTIONS},prjquota");
        self.runner
            .run_checked("mount", &["-o", &options, device, mount_point])
            .await?;
        Ok(())
    }

    /// Unmount. Not mounted is success.
    pub async fn unmount(&self, mount_point: &str) -> Result<(), XfsError> {
        if !self.is_mounted(mount_point).await? {
            return Ok(());
        }
        self.runner.run_checked("umount", &[mount_point]).await?;
        Ok(())
    }

    /// Online grow after an LV extension.
    pub async fn grow(&self, mount_point: &str) -> Result<(), XfsError> {
        if !self.is_mounted(mount_point).await? {
            return Err(XfsError::NotMounted {
                mount_point: mount_point.to_string(),
            });
        }
        self.runner.run_checked("xfs_growfs", &[mount_point]).await?;
        Ok(())
    }

    /// Tag `dir` (and its subtree) with `project_id` and initialise the
    /// project. Idempotent: re-tagging an already tagged tree is a no-op to
    /// the filesystem.
    pub async fn setup_project(
        &self,
        fs_root: &str,
        dir: &str,
        project_id: u32,
    ) -> Result<(), XfsError> {
        let spec = format!("project -s -p {dir} {project_id}");
        self.runner
            .run_checked("xfs_quota", &["-x", "-c", &spec, fs_root])
            .await?;
        Ok(())
    }

    /// Set the project's hard block limit.
    pub async fn set_project_limit(
        &self,
        fs_root: &str,
        project_id: u32,
        quota_bytes: u64,
    ) -> Result<(), XfsError> {
        let spec = format!("limit -p bhard={quota_bytes} {project_id}");
        self.runner
            .run_checked("xfs_quota", &["-x", "-c", &spec, fs_root])
            .await?;
        Ok(())
    }

    /// Clear a project's limit when its directory goes away.
    pub async fn clear_project_limit(
        &self,
        fs_root: &str,
        project_id: u32,
    ) -> Result<(), XfsError> {
        self.set_project_limit(fs_root, project_id, 0).await
    }

    /// Filesystem usage of a mounted volume, from `df`. This is XFS usage
    /// accounting, distinct from quota accounting.
    pub async fn fs_usage(&self, mount_point: &str) -> Result<FsUsage, XfsError> {
        let output = self
            .runner
            .run_checked("df", &["-B1", "--output=size,used,avail", mount_point])
            .await?;
        let line = output.stdout.lines().nth(1).unwrap_or_default();
        let fields: Vec<u64> = line
            .split_whitespace()
            .filter_map(|field| field.parse().ok())
            .collect();
        match fields.as_slice() {
            [size, used, avail] => Ok(FsUsage {
                total_bytes: *size,
                used_bytes: *used,
                available_bytes: *avail,
            }),
            _ => Err(XfsError::Parse {
                output: output.stdout,
            }),
        }
    }

    /// Observed usage of one project, from `xfs_quota report`.
    pub async fn project_quota(
        &self,
        fs_root: &str,
        project_id: u32,
    ) -> Result<ProjectQuota, XfsError> {
        let output = self
            .runner
            .run_checked("xfs_quota", &["-x", "-c", "report -p -N -b", fs_root])
            .await?;
        parse_quota_report(&output.stdout, project_id)
    }
}

/// Parse `xfs_quota -x -c 'report -p -N -b'` output. Block counts are in KiB.
fn parse_quota_report(report: &str, project_id: u32) -> Result<ProjectQuota, XfsError> {
    for line in report.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 4 {
            continue;
        }
        let id = fields[0].trim_start_matches('#');
        if id.parse::<u32>() != Ok(project_id) {
            continue;
        }
        let used_kib = fields[1].parse::<u64>().map_err(|_| XfsError::Parse {
            output: line.to_string(),
        })?;
        let hard_kib = fields[3].parse::<u64>().map_err(|_| XfsError::Parse {
            output: line.to_string(),
        })?;
        return Ok(ProjectQuota {
            project_id,
            used_bytes: used_kib * 1024,
            hard_bytes: hard_kib * 1024,
        });
    }
    Err(XfsError::ProjectMissing { project_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;

    #[test]
    fn project_id_is_deterministic_and_salted() {
        let id = project_id_for("k8s-default", "pvc-0011223344556677", 0);
        assert_eq!(id, project_id_for("k8s-default", "pvc-0011223344556677", 0));
        assert_ne!(id, project_id_for("k8s-default", "pvc-0011223344556677", 1));
        assert_ne!(id, project_id_for("k8s-other", "pvc-0011223344556677", 0));
        assert_ne!(id, 0);
    }

    #[test]
    fn quota_report_parses_project_line() {
        let report = "\
#0            0          0          0     00 [--------]
#3735928559   2048       0          10240 00 [--------]
";
        let quota = parse_quota_report(report, 0xdeadbeef).unwrap();
        assert_eq!(quota.used_bytes, 2048 * 1024);
        assert_eq!(quota.hard_bytes, 10240 * 1024);
        assert!(matches!(
            parse_quota_report(report, 42),
            Err(XfsError::ProjectMissing { project_id: 42 })
        ));
    }

    #[tokio::test]
    async fn format_skips_existing_xfs() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("blkid", true, "/dev/vg/lv: TYPE=\"xfs\"", "");
        Xfs::new(runner.clone())
            .format("/dev/vg/lv")
            .await
            .unwrap();
        assert!(!runner.ran("mkfs.xfs"));
    }

    #[tokio::test]
    async fn mount_enables_project_quotas() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("mountpoint", false, "", "");
        Xfs::new(runner.clone())
            .mount("/dev/vg/lv", "/exports/tenant_a/vol1")
            .await
            .unwrap();
        assert!(runner.ran("mount -o rw,noatime,nodiratime,logbsize=256k,inode64,prjquota"));
    }
}
