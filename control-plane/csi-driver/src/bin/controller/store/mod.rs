//! Cluster-scoped metadata records of the CSI controller and the stores that
//! persist them.

pub(crate) mod cached;
pub(crate) mod crd;
pub(crate) mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use snafu::Snafu;

/// Where a volume's initial contents came from. Exactly one payload is set.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ContentSource {
    Volume { source_volume_id: String },
    Snapshot { source_snapshot_id: String },
}

/// A provisioned volume as the controller knows it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, schemars::JsonSchema)]
pub struct VolumeRecord {
    pub volume_id: String,
    pub name: String,
    pub svm_name: String,
    pub vip: String,
    /// Relative path under the SVM's export root.
    pub path: String,
    pub capacity_bytes: u64,
    #[schemars(with = "String")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_source: Option<ContentSource>,
}

/// A snapshot as the controller knows it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, schemars::JsonSchema)]
pub struct SnapshotRecord {
    pub snapshot_id: String,
    pub name: String,
    pub source_volume_id: String,
    pub svm_name: String,
    /// Relative path of the reflink copy.
    pub path: String,
    pub size_bytes: u64,
    #[schemars(with = "String")]
    pub created_at: DateTime<Utc>,
    pub ready_to_use: bool,
}

/// Typed store failures; the variant drives idempotency decisions.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), context(suffix(false)))]
pub(crate) enum StoreError {
    #[snafu(display("{kind} {id} not found"))]
    NotFound { kind: &'static str, id: String },
    #[snafu(display("{kind} {id} already exists"))]
    AlreadyExists { kind: &'static str, id: String },
    #[snafu(display("Conflicting concurrent update of {kind} {id}"))]
    Conflict { kind: &'static str, id: String },
    #[snafu(display("Store unavailable: {message}"))]
    Unavailable { message: String },
    #[snafu(display("Malformed stored record: {message}"))]
    Malformed { message: String },
}

impl StoreError {
    pub(crate) fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
    pub(crate) fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

/// A page of listed records with the store's continuation token.
#[derive(Debug, Clone)]
pub(crate) struct Page<T> {
    pub entries: Vec<T>,
    pub next_token: Option<String>,
}

/// The persistence contract of the controller's metadata.
#[async_trait]
pub(crate) trait MetaStore: Send + Sync {
    async fn create_volume(&self, record: &VolumeRecord) -> Result<(), StoreError>;
    async fn get_volume(&self, volume_id: &str) -> Result<VolumeRecord, StoreError>;
    async fn update_volume(&self, record: &VolumeRecord) -> Result<(), StoreError>;
    async fn delete_volume(&self, volume_id: &str) -> Result<(), StoreError>;
    async fn list_volumes(
        &self,
        starting_token: Option<&str>,
        max_entries: usize,
    ) -> Result<Page<VolumeRecord>, StoreError>;

    async fn create_snapshot(&self, record: &SnapshotRecord) -> Result<(), StoreError>;
    async fn get_snapshot(&self, snapshot_id: &str) -> Result<SnapshotRecord, StoreError>;
    async fn update_snapshot_status(
        &self,
        snapshot_id: &str,
        ready_to_use: bool,
    ) -> Result<(), StoreError>;
    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), StoreError>;
    async fn list_snapshots(
        &self,
        source_volume_id: Option<&str>,
        starting_token: Option<&str>,
        max_entries: usize,
    ) -> Result<Page<SnapshotRecord>, StoreError>;
}
