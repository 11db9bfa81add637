use serde::{Deserialize, Serialize};

/// A quota-capped subtree of an SVM's volume, identified by a relative path.
/// The path never escapes its volume; the cap is enforced through an XFS
/// project with a deterministic project id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Directory {
    pub svm_name: String,
    /// Relative path, no leading `/`, no `..` segment.
    pub path: String,
    pub quota_bytes: u64,
    pub project_id: u32,
    /// Observed usage from the XFS quota subsystem.
    pub used_bytes: u64,
}

/// Request body of `POST /v1/directories`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CreateDirectoryBody {
    pub svm_name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quota_bytes: Option<u64>,
}
