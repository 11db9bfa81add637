use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Default interface MTU when the caller does not specify one.
pub const DEFAULT_MTU: u32 = 1500;

/// Lifecycle state of an SVM.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum SvmState {
    /// The HA resource group is being brought up.
    Creating,
    /// The group is up and the exporter is reachable on the VIP.
    Ready,
    /// Partial failure; background teardown is converging.
    Degraded,
    /// Tear-down in progress.
    Deleting,
}

/// A storage virtual machine: one tenant boundary combining a network
/// namespace, a VIP on a VLAN and a dedicated NFS exporter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Svm {
    /// Unique name, also the netns name.
    pub name: String,
    /// VLAN tag, unique cluster-wide.
    pub vlan_id: u16,
    /// Interface address with prefix, e.g. `192.168.10.5/24`.
    pub ip_cidr: String,
    /// The address part of `ip_cidr`.
    pub vip: String,
    /// Default route inside the namespace.
    pub gateway: String,
    /// Interface MTU.
    pub mtu: u32,
    /// Lifecycle state.
    pub state: SvmState,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Request body of `POST /v1/svms`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CreateSvmBody {
    pub name: String,
    pub vlan_id: u16,
    pub ip_cidr: String,
    /// Derived from `ip_cidr` when omitted (prefix <= 30).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    /// Optional root LV size backing the group's Filesystem resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_volume_size_bytes: Option<u64>,
}

fn default_mtu() -> u32 {
    DEFAULT_MTU
}

impl CreateSvmBody {
    /// True when an existing SVM matches this request parameter-for-parameter,
    /// in which case create is an idempotent re-affirmation.
    pub fn matches(&self, existing: &Svm) -> bool {
        self.name == existing.name
            && self.vlan_id == existing.vlan_id
            && self.ip_cidr == existing.ip_cidr
            && self.mtu == existing.mtu
            && self
                .gateway
                .as_ref()
                .map(|gw| gw == &existing.gateway)
                .unwrap_or(true)
    }
}
