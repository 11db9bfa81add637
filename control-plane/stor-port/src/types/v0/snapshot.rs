use serde::{Deserialize, Serialize};

/// A point-in-time server-side reflink copy of a directory.
/// Creation is idempotent on `(svm, snapshot_path)`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub svm_name: String,
    pub source_path: String,
    /// Relative path of the copy.
    pub snapshot_path: String,
    pub size_bytes: u64,
    pub ready_to_use: bool,
}

/// Request body of `POST /v1/snapshots`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CreateSnapshotBody {
    pub svm_name: String,
    pub source_path: String,
    pub snapshot_path: String,
}

/// Request body of `POST /v1/snapshots/restore`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RestoreSnapshotBody {
    pub svm_name: String,
    pub snapshot_path: String,
    pub target_path: String,
}
