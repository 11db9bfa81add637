//! LVM thin provisioning on the replicated volume group.

use crate::runner::{CommandOutput, RunnerError, SystemRunner};
use snafu::Snafu;
use std::sync::Arc;
use tracing::debug;

/// Errors of the LVM layer.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum LvmError {
    #[snafu(display("Logical volume {lv_path} already exists"))]
    LvExists { lv_path: String },
    #[snafu(display("Logical volume {lv_path} does not exist"))]
    LvMissing { lv_path: String },
    #[snafu(display("Shrinking {lv_path} from {current} to {requested} bytes is not supported"))]
    ShrinkRefused {
        lv_path: String,
        current: u64,
        requested: u64,
    },
    #[snafu(display("Unexpected lvs output: {output}"))]
    Parse { output: String },
    #[snafu(display("{source}"))]
    Command { source: RunnerError },
}

impl From<RunnerError> for LvmError {
    fn from(source: RunnerError) -> Self {
        LvmError::Command { source }
    }
}

/// Pool-level statistics, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total_bytes: u64,
    pub available_bytes: u64,
}

/// Thin volume operations over one volume group and thin pool.
#[derive(Clone)]
pub struct Lvm {
    runner: Arc<dyn SystemRunner>,
    vg_name: String,
    thinpool: String,
}

impl Lvm {
    pub fn new(runner: Arc<dyn SystemRunner>, vg_name: &str, thinpool: &str) -> Self {
        Self {
            runner,
            vg_name: vg_name.to_string(),
            thinpool: thinpool.to_string(),
        }
    }

    /// Device path of a named LV.
    pub fn lv_path(&self, lv_name: &str) -> String {
        format!("/dev/{}/{}", self.vg_name, lv_name)
    }

    async fn lv_exists(&self, lv_path: &str) -> Result<bool, LvmError> {
        let output = self.runner.run("lvdisplay", &[lv_path]).await?;
        Ok(output.success)
    }

    /// Create a thin LV of the requested virtual size. Fails if it exists.
    pub async fn create_thin_lv(&self, lv_name: &str, size_bytes: u64) -> Result<String, LvmError> {
        let lv_path = self.lv_path(lv_name);
        if self.lv_exists(&lv_path).await? {
            return Err(LvmError::LvExists { lv_path });
        }
        let size = format!("{size_bytes}b");
        let pool = format!("{}/{}", self.vg_name, self.thinpool);
        self.runner
            .run_checked("lvcreate", &["-V", &size, "-T", &pool, "-n", lv_name])
            .await?;
        debug!(lv = %lv_path, size_bytes, "thin LV created");
        Ok(lv_path)
    }

    /// Current virtual size of an LV.
    pub async fn lv_size(&self, lv_name: &str) -> Result<u64, LvmError> {
        let lv_path = self.lv_path(lv_name);
        let output = self
            .runner
            .run("lvs", &[
                "--noheadings",
                "--units",
                "b",
                "--nosuffix",
                "-o",
                "lv_size",
                &lv_path,
            ])
            .await?;
        if !output.success {
            return Err(LvmError::LvMissing { lv_path });
        }
        parse_first_u64(&output)
    }

    /// Grow an LV to the requested virtual size. Shrinks are refused; on
    /// failure the LV is left at its pre-op size.
    pub async fn extend_lv(&self, lv_name: &str, new_size_bytes: u64) -> Result<(), LvmError> {
        let lv_path = self.lv_path(lv_name);
        let current = self.lv_size(lv_name).await?;
        if new_size_bytes < current {
            return Err(LvmError::ShrinkRefused {
                lv_path,
                current,
                requested: new_size_bytes,
            });
        }
        if new_size_bytes == current {
            return Ok(());
        }
        let size = format!("{new_size_bytes}b");
        self.runner
            .run_checked("lvextend", &["-L", &size, &lv_path])
            .await?;
        Ok(())
    }

    /// Remove an LV. Absence is success.
    pub async fn delete_lv(&self, lv_name: &str) -> Result<(), LvmError> {
        let lv_path = self.lv_path(lv_name);
        if !self.lv_exists(&lv_path).await? {
            return Ok(());
        }
        self.runner
            .run_checked("lvremove", &["-f", &lv_path])
            .await?;
        Ok(())
    }

    /// Thin pool capacity: total size and the unallocated share of it.
    pub async fn pool_stats(&self) -> Result<PoolStats, LvmError> {
        let pool = format!("{}/{}", self.vg_name, self.thinpool);
        let output = self
            .runner
            .run_checked("lvs", &[
                "--noheadings",
                "--units",
                "b",
                "--nosuffix",
                "-o",
                "lv_size,data_percent",
                &pool,
            ])
            .await?;
        let fields: Vec<&str> = output.stdout.split_whitespace().collect();
        let (total, data_percent) = match fields.as_slice() {
            [size, percent] => (
                size.parse::<u64>().ok(),
                percent.parse::<f64>().ok(),
            ),
            _ => (None, None),
        };
        match (total, data_percent) {
            (Some(total_bytes), Some(percent)) => {
                let used = (total_bytes as f64 * percent / 100.0) as u64;
                Ok(PoolStats {
                    total_bytes,
                    available_bytes: total_bytes.saturating_sub(used),
                })
            }
            _ => Err(LvmError::Parse {
                output: output.stdout,
            }),
        }
    }
}

fn parse_first_u64(output: &CommandOutput) -> Result<u64, LvmError> {
    output
        .stdout
        .split_whitespace()
        .next()
        .and_then(|field| field.parse::<u64>().ok())
        .ok_or_else(|| LvmError::Parse {
            output: output.stdout.clone(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;

    fn lvm(runner: &Arc<FakeRunner>) -> Lvm {
        Lvm::new(runner.clone() as Arc<dyn SystemRunner>, "vg_pool_01", "pool")
    }

    #[tokio::test]
    async fn create_refuses_existing_lv() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("lvdisplay /dev/vg_pool_01/vol_a", true, "", "");
        let error = lvm(&runner)
            .create_thin_lv("vol_a", 1 << 30)
            .await
            .unwrap_err();
        assert!(matches!(error, LvmError::LvExists { .. }));
    }

    #[tokio::test]
    async fn create_builds_thin_command() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("lvdisplay", false, "", "not found");
        let path = lvm(&runner).create_thin_lv("vol_a", 1 << 30).await.unwrap();
        assert_eq!(path, "/dev/vg_pool_01/vol_a");
        assert!(runner.ran("lvcreate -V 1073741824b -T vg_pool_01/pool -n vol_a"));
    }

    #[tokio::test]
    async fn extend_refuses_shrink() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("lvs", true, "  2147483648\n", "");
        let error = lvm(&runner).extend_lv("vol_a", 1 << 30).await.unwrap_err();
        assert!(matches!(error, LvmError::ShrinkRefused { .. }));
        assert!(!runner.ran("lvextend"));
    }

    #[tokio::test]
    async fn extend_noop_on_equal_size() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("lvs", true, "  1073741824\n", "");
        lvm(&runner).extend_lv("vol_a", 1 << 30).await.unwrap();
        assert!(!runner.ran("lvextend"));
    }

    #[tokio::test]
    async fn delete_tolerates_absence() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("lvdisplay", false, "", "not found");
        lvm(&runner).delete_lv("vol_a").await.unwrap();
        assert!(!runner.ran("lvremove"));
    }

    #[tokio::test]
    async fn pool_stats_parse() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("lvs", true, "  107374182400 25.00\n", "");
        let stats = lvm(&runner).pool_stats().await.unwrap();
        assert_eq!(stats.total_bytes, 107374182400);
        assert_eq!(stats.available_bytes, 107374182400 - 107374182400 / 4);
    }
}
