//! The HA resource host contract: replicated block device primary/secondary
//! plus ordered per-SVM resource groups. The control plane only ever talks to
//! a host through these four operations; monitoring and restart of individual
//! resources stay inside the host.

use crate::runner::{RunnerError, SystemRunner};
use async_trait::async_trait;
use snafu::Snafu;
use std::{net::Ipv4Addr, sync::Arc};
use strum_macros::{AsRefStr, Display};
use tracing::{debug, info};

/// Errors of the resource host.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub), context(suffix(false)))]
pub enum HaError {
    #[snafu(display("Resource group {group} failed to settle: {detail}"))]
    GroupFailed { group: String, detail: String },
    #[snafu(display("{source}"))]
    Command { source: RunnerError },
}

impl From<RunnerError> for HaError {
    fn from(source: RunnerError) -> Self {
        HaError::Command { source }
    }
}

/// Status of a resource group as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display)]
pub enum GroupStatus {
    Started,
    Stopped,
    Failed,
    Transitioning,
}

/// Everything needed to compose one SVM's group: filesystem mount of the
/// SVM's XFS volume, then netns with VLAN and VIP, then the exporter daemon
/// bound to that namespace. Startup order is strict; shutdown is the reverse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvmGroupSpec {
    pub svm: String,
    /// Backing device of the Filesystem resource; `None` when the SVM has no
    /// root volume.
    pub device: Option<String>,
    pub mount_path: String,
    pub vlan_id: u16,
    pub parent_if: String,
    pub ip: Ipv4Addr,
    pub prefix: u8,
    pub gateway: Ipv4Addr,
    pub mtu: u32,
    /// Name of the replicated block device resource the group collocates with.
    pub replicated_resource: String,
}

impl SvmGroupSpec {
    pub fn group_name(&self) -> String {
        format!("g_svm_{}", self.svm)
    }
    fn fs_resource(&self) -> String {
        format!("fs_{}", self.svm)
    }
    fn netns_resource(&self) -> String {
        format!("netns_{}", self.svm)
    }
    fn exporter_resource(&self) -> String {
        format!("exporter_{}", self.svm)
    }
}

/// The contract every HA host must satisfy (§ resource host).
#[async_trait]
pub trait ResourceHost: Send + Sync {
    /// Create or converge the SVM's resource group. Idempotent.
    async fn ensure_group(&self, spec: &SvmGroupSpec) -> Result<(), HaError>;
    /// Stop and remove the group. Absence is success.
    async fn remove_group(&self, svm: &str) -> Result<(), HaError>;
    /// Move the group to another node.
    async fn move_group(&self, svm: &str, target_node: &str) -> Result<(), HaError>;
    /// Current status of the group.
    async fn status(&self, svm: &str) -> Result<GroupStatus, HaError>;
}

/// Pacemaker-backed resource host driven through `pcs`.
#[derive(Clone)]
pub struct PacemakerHost {
    runner: Arc<dyn SystemRunner>,
}

impl PacemakerHost {
    pub fn new(runner: Arc<dyn SystemRunner>) -> Self {
        Self { runner }
    }

    async fn group_exists(&self, group: &str) -> Result<bool, HaError> {
        let output = self
            .runner
            .run("pcs", &["resource", "status", group])
            .await?;
        Ok(output.success)
    }
}

#[async_trait]
impl ResourceHost for PacemakerHost {
    async fn ensure_group(&self, spec: &SvmGroupSpec) -> Result<(), HaError> {
        let group = spec.group_name();
        if self.group_exists(&group).await? {
            debug!(%group, "resource group already present");
            return Ok(());
        }

        let mut members: Vec<String> = Vec::new();

        if let Some(device) = &spec.device {
            let fs = spec.fs_resource();
            self.runner
                .run_checked("pcs", &[
                    "resource", "create", &fs, "ocf:heartbeat:Filesystem",
                    &format!("device={device}"),
                    &format!("directory={}", spec.mount_path),
                    "fstype=xfs",
                    "op", "monitor", "interval=10s",
                ])
                .await?;
            members.push(fs);
        }

        let netns = spec.netns_resource();
        self.runner
            .run_checked("pcs", &[
                "resource", "create", &netns, "ocf:arca:TenantNetns",
                &format!("ns={}", spec.svm),
                &format!("vlan_id={}", spec.vlan_id),
                &format!("parent_if={}", spec.parent_if),
                &format!("ip={}", spec.ip),
                &format!("prefix={}", spec.prefix),
                &format!("gw={}", spec.gateway),
                &format!("mtu={}", spec.mtu),
                "op", "monitor", "interval=10s",
            ])
            .await?;
        members.push(netns);

        let exporter = spec.exporter_resource();
        self.runner
            .run_checked("pcs", &[
                "resource", "create", &exporter,
                &format!("systemd:arca-exporter@{}", spec.svm),
                "op", "monitor", "interval=10s",
            ])
            .await?;
        members.push(exporter);

        // Group membership preserves creation order, which is the startup
        // order: filesystem, then network, then daemon.
        let mut group_args = vec!["resource", "group", "add", group.as_str()];
        group_args.extend(members.iter().map(String::as_str));
        self.runner.run_checked("pcs", &group_args).await?;

        // The group follows the replicated device's primary, and only starts
        // after promotion.
        let promoted = format!("{}-clone", spec.replicated_resource);
        self.runner
            .run_checked("pcs", &[
                "constraint", "colocation", "add", &group, "with", "master", &promoted,
                "INFINITY",
            ])
            .await?;
        self.runner
            .run_checked("pcs", &[
                "constraint", "order", "promote", &promoted, "then", "start", &group,
            ])
            .await?;

        info!(%group, "resource group created");
        Ok(())
    }

    async fn remove_group(&self, svm: &str) -> Result<(), HaError> {
        let group = format!("g_svm_{svm}");
        if !self.group_exists(&group).await? {
            return Ok(());
        }
        // Disable first so the stop happens under the cluster's ordering.
        self.runner
            .run_checked("pcs", &["resource", "disable", &group])
            .await?;
        self.runner
            .run_checked("pcs", &["resource", "delete", &group, "--force"])
            .await?;
        info!(%group, "resource group removed");
        Ok(())
    }

    async fn move_group(&self, svm: &str, target_node: &str) -> Result<(), HaError> {
        let group = format!("g_svm_{svm}");
        self.runner
            .run_checked("pcs", &["resource", "move", &group, target_node])
            .await?;
        Ok(())
    }

    async fn status(&self, svm: &str) -> Result<GroupStatus, HaError> {
        let group = format!("g_svm_{svm}");
        let output = self
            .runner
            .run("pcs", &["resource", "status", &group])
            .await?;
        if !output.success {
            return Ok(GroupStatus::Stopped);
        }
        Ok(parse_group_status(&output.stdout))
    }
}

fn parse_group_status(status: &str) -> GroupStatus {
    let lower = status.to_lowercase();
    if lower.contains("failed") {
        GroupStatus::Failed
    } else if lower.contains("starting") || lower.contains("stopping") {
        GroupStatus::Transitioning
    } else if lower.contains("started") {
        GroupStatus::Started
    } else {
        GroupStatus::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::FakeRunner;

    fn spec() -> SvmGroupSpec {
        SvmGroupSpec {
            svm: "tenant_a".to_string(),
            device: Some("/dev/vg_pool_01/vol_tenant_a".to_string()),
            mount_path: "/exports/tenant_a".to_string(),
            vlan_id: 100,
            parent_if: "bond0".to_string(),
            ip: "192.168.10.5".parse().unwrap(),
            prefix: 24,
            gateway: "192.168.10.1".parse().unwrap(),
            mtu: 1500,
            replicated_resource: "drbd_r0".to_string(),
        }
    }

    #[tokio::test]
    async fn ensure_group_orders_members() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("pcs resource status", false, "", "not found");
        PacemakerHost::new(runner.clone())
            .ensure_group(&spec())
            .await
            .unwrap();
        let calls = runner.calls();
        let group_add = calls
            .iter()
            .find(|call| call.contains("resource group add"))
            .unwrap();
        assert!(group_add.contains("fs_tenant_a netns_tenant_a exporter_tenant_a"));
        assert!(runner.ran("constraint order promote drbd_r0-clone then start g_svm_tenant_a"));
    }

    #[tokio::test]
    async fn ensure_group_is_idempotent() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("pcs resource status", true, "Started", "");
        PacemakerHost::new(runner.clone())
            .ensure_group(&spec())
            .await
            .unwrap();
        assert!(!runner.ran("resource create"));
    }

    #[tokio::test]
    async fn remove_group_tolerates_absence() {
        let runner = Arc::new(FakeRunner::new());
        runner.respond("pcs resource status", false, "", "");
        PacemakerHost::new(runner.clone())
            .remove_group("tenant_a")
            .await
            .unwrap();
        assert!(!runner.ran("resource delete"));
    }

    #[test]
    fn status_parsing() {
        assert_eq!(parse_group_status("* g_svm_a Started node-1"), GroupStatus::Started);
        assert_eq!(parse_group_status("* g_svm_a FAILED node-1"), GroupStatus::Failed);
        assert_eq!(parse_group_status("* g_svm_a Starting"), GroupStatus::Transitioning);
        assert_eq!(parse_group_status(""), GroupStatus::Stopped);
    }
}
