use serde::{Deserialize, Serialize};

/// Observed quota state of a directory.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct QuotaInfo {
    pub path: String,
    pub quota_bytes: u64,
    /// Observed usage from the XFS quota subsystem.
    pub used_bytes: u64,
    pub project_id: u32,
}

/// Request body of `POST /v1/quotas`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct SetQuotaBody {
    pub svm_name: String,
    pub path: String,
    pub quota_bytes: u64,
}

/// Request body of `PATCH /v1/quotas`. Monotonic: never shrinks below usage.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ExpandQuotaBody {
    pub svm_name: String,
    pub path: String,
    pub new_quota_bytes: u64,
}
