use serde::{Deserialize, Serialize};

/// Capacity of an SVM as seen by its backing thin pool and mounted volumes.
/// `used_bytes` comes from XFS usage accounting, not from quota accounting.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapacityInfo {
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
}
