use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Lifecycle state of a volume.
#[derive(
    Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, AsRefStr, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum VolumeState {
    Creating,
    Ready,
    Resizing,
    Deleting,
    Error,
}

/// A thin LV formatted XFS, mounted under `<export_root>/<svm>/<volume>` and
/// owned by exactly one SVM.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Volume {
    pub name: String,
    pub svm: String,
    /// Virtual size of the thin LV.
    pub size_bytes: u64,
    /// Mount path on the storage node.
    pub path: String,
    pub state: VolumeState,
    pub created_at: DateTime<Utc>,
}

/// Request body of `POST /v1/volumes`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CreateVolumeBody {
    pub svm: String,
    pub name: String,
    pub size_bytes: u64,
}

impl CreateVolumeBody {
    /// True when an existing volume matches this request.
    pub fn matches(&self, existing: &Volume) -> bool {
        self.name == existing.name
            && self.svm == existing.svm
            && self.size_bytes == existing.size_bytes
    }
}

/// Request body of `PATCH /v1/volumes/{name}`. Grow-only.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResizeVolumeBody {
    pub svm: String,
    pub size_bytes: u64,
}
