//! Per-volume I/O limits through the cgroups-v2 io controller. Limits key on
//! the backing LV's `major:minor`; absent limits mean unlimited.

use crate::runner::{RunnerError, SystemRunner};
use snafu::Snafu;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
};
use stor_port::types::v0::QosLimits;
use tracing::debug;

const CGROUP_BASE: &str = "/sys/fs/cgroup/arca";

/// Errors of the QoS layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum QosError {
    #[snafu(display("Failed to resolve device id of {lv_path}: {detail}"))]
    DeviceId { lv_path: String, detail: String },
    #[snafu(display("Failed to write {}: {source}", path.display()))]
    CgroupWrite {
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("{source}"))]
    Command { source: RunnerError },
}

impl From<RunnerError> for QosError {
    fn from(source: RunnerError) -> Self {
        QosError::Command { source }
    }
}

/// Render the `io.max` line for a device and limit set.
pub fn io_max_line(device_id: &str, limits: &QosLimits) -> String {
    if limits.is_unlimited() {
        return format!("{device_id} rbps=max wbps=max riops=max wiops=max");
    }
    let mut parts = vec![device_id.to_string()];
    if let Some(v) = limits.read_bps {
        parts.push(format!("rbps={v}"));
    }
    if let Some(v) = limits.write_bps {
        parts.push(format!("wbps={v}"));
    }
    if let Some(v) = limits.read_iops {
        parts.push(format!("riops={v}"));
    }
    if let Some(v) = limits.write_iops {
        parts.push(format!("wiops={v}"));
    }
    parts.join(" ")
}

/// Parse the limits back out of an `io.max` line for the given device.
pub fn parse_io_max(content: &str, device_id: &str) -> Option<QosLimits> {
    let line = content
        .lines()
        .find(|line| line.starts_with(device_id))?;
    let mut limits = QosLimits::default();
    for field in line.split_whitespace().skip(1) {
        let (key, value) = field.split_once('=')?;
        if value == "max" {
            continue;
        }
        let value = value.parse::<u64>().ok()?;
        match key {
            "rbps" => limits.read_bps = Some(value),
            "wbps" => limits.write_bps = Some(value),
            "riops" => limits.read_iops = Some(value),
            "wiops" => limits.write_iops = Some(value),
            _ => {}
        }
    }
    Some(limits)
}

/// Applies and reads per-volume limits.
#[derive(Clone)]
pub struct Qos {
    runner: Arc<dyn SystemRunner>,
    base: PathBuf,
}

impl Qos {
    pub fn new(runner: Arc<dyn SystemRunner>) -> Self {
        Self::with_base(runner, PathBuf::from(CGROUP_BASE))
    }

    pub fn with_base(runner: Arc<dyn SystemRunner>, base: PathBuf) -> Self {
        Self { runner, base }
    }

    fn cgroup_dir(&self, svm: &str, volume: &str) -> PathBuf {
        self.base.join(format!("svm_{svm}")).join(format!("vol_{volume}"))
    }

    /// `major:minor` of the LV backing a volume.
    pub async fn device_id(&self, lv_path: &str) -> Result<String, QosError> {
        let output = self
            .runner
            .run_checked("stat", &["--format=%t:%T", lv_path])
            .await?;
        let raw = output.stdout.trim();
        let (major_hex, minor_hex) = raw.split_once(':').ok_or_else(|| QosError::DeviceId {
            lv_path: lv_path.to_string(),
            detail: format!("unexpected stat output '{raw}'"),
        })?;
        let major = u64::from_str_radix(major_hex, 16);
        let minor = u64::from_str_radix(minor_hex, 16);
        match (major, minor) {
            (Ok(major), Ok(minor)) => Ok(format!("{major}:{minor}")),
            _ => Err(QosError::DeviceId {
                lv_path: lv_path.to_string(),
                detail: format!("non-hex device numbers '{raw}'"),
            }),
        }
    }

    fn write_io_max(&self, dir: &Path, line: &str) -> Result<(), QosError> {
        std::fs::create_dir_all(dir).map_err(|source| QosError::CgroupWrite {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join("io.max");
        std::fs::write(&path, line).map_err(|source| QosError::CgroupWrite { path, source })
    }

    /// Apply limits to a volume; an empty limit set resets to unlimited.
    pub async fn apply(
        &self,
        svm: &str,
        volume: &str,
        lv_path: &str,
        limits: &QosLimits,
    ) -> Result<String, QosError> {
        let device_id = self.device_id(lv_path).await?;
        let dir = self.cgroup_dir(svm, volume);
        self.write_io_max(&dir, &io_max_line(&device_id, limits))?;
        debug!(%svm, %volume, %device_id, "io limits applied");
        Ok(device_id)
    }

    /// Reset a volume to unlimited. Missing cgroup is success.
    pub async fn remove(&self, svm: &str, volume: &str, lv_path: &str) -> Result<(), QosError> {
        let dir = self.cgroup_dir(svm, volume);
        if !dir.exists() {
            return Ok(());
        }
        let device_id = self.device_id(lv_path).await?;
        self.write_io_max(&dir, &io_max_line(&device_id, &QosLimits::default()))
    }

    /// Read back the current limits. `None` when no limits are installed.
    pub async fn current(
        &self,
        svm: &str,
        volume: &str,
        lv_path: &str,
    ) -> Result<Option<(String, QosLimits)>, QosError> {
        let dir = self.cgroup_dir(svm, volume);
        let path = dir.join("io.max");
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return Ok(None),
        };
        let device_id = self.device_id(lv_path).await?;
        Ok(parse_io_max(&content, &device_id).map(|limits| (device_id, limits)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;

    #[test]
    fn io_max_round_trip() {
        let limits = QosLimits {
            read_iops: Some(1000),
            write_iops: None,
            read_bps: Some(104857600),
            write_bps: None,
        };
        let line = io_max_line("253:3", &limits);
        assert_eq!(line, "253:3 rbps=104857600 riops=1000");
        assert_eq!(parse_io_max(&line, "253:3").unwrap(), limits);
    }

    #[test]
    fn unlimited_resets_every_knob() {
        assert_eq!(
            io_max_line("253:3", &QosLimits::default()),
            "253:3 rbps=max wbps=max riops=max wiops=max"
        );
        assert_eq!(
            parse_io_max("253:3 rbps=max wbps=max riops=max wiops=max", "253:3").unwrap(),
            QosLimits::default()
        );
    }

    #[tokio::test]
    async fn device_id_parses_hex_stat_output() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("stat", true, "fd:3\n", "");
        let qos = Qos::new(runner);
        assert_eq!(qos.device_id("/dev/vg/lv").await.unwrap(), "253:3");
    }

    #[tokio::test]
    async fn apply_writes_io_max() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        runner.respond("stat", true, "fd:0\n", "");
        let qos = Qos::with_base(runner, dir.path().to_path_buf());
        let limits = QosLimits {
            write_iops: Some(500),
            ..QosLimits::default()
        };
        qos.apply("tenant_a", "vol1", "/dev/vg/lv", &limits)
            .await
            .unwrap();
        let written =
            std::fs::read_to_string(dir.path().join("svm_tenant_a/vol_vol1/io.max")).unwrap();
        assert_eq!(written, "253:0 wiops=500");
    }
}
