use serde::{Deserialize, Serialize};

/// Per-volume I/O limits enforced through the cgroups-v2 io controller.
/// Absent limits mean unlimited.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct QosLimits {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_iops: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_iops: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read_bps: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_bps: Option<u64>,
}

impl QosLimits {
    /// True when no limit is set at all.
    pub fn is_unlimited(&self) -> bool {
        self.read_iops.is_none()
            && self.write_iops.is_none()
            && self.read_bps.is_none()
            && self.write_bps.is_none()
    }
}

/// Request body of `POST /v1/volumes/{name}/qos`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SetQosBody {
    pub svm: String,
    #[serde(flatten)]
    pub limits: QosLimits,
}

/// Current QoS state of a volume.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QosInfo {
    pub svm: String,
    pub volume: String,
    pub qos_enabled: bool,
    /// `major:minor` of the backing LV.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(flatten)]
    pub limits: QosLimits,
}
