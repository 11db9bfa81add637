//! Kubernetes-backed store: one cluster-scoped custom resource per record,
//! protected by a single driver-owned finalizer. Only that finalizer is ever
//! removed by this code.

use super::{MetaStore, Page, SnapshotRecord, StoreError, VolumeRecord};
use async_trait::async_trait;
use kube::{
    api::{Api, ListParams, ObjectMeta, Patch, PatchParams, PostParams},
    Client, CustomResource, ResourceExt,
};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "storage.arca.io",
    version = "v1alpha1",
    kind = "ArcaVolume",
    plural = "arcavolumes",
    shortname = "av"
)]
pub struct ArcaVolumeSpec {
    pub record: VolumeRecord,
}

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "storage.arca.io",
    version = "v1alpha1",
    kind = "ArcaSnapshot",
    plural = "arcasnapshots",
    shortname = "as",
    status = "ArcaSnapshotStatus"
)]
pub struct ArcaSnapshotSpec {
    pub record: SnapshotRecord,
}

/// `ready_to_use` lives in the status subresource so it survives spec-level
/// conflicts and is written through a dedicated status update.
#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ArcaSnapshotStatus {
    pub ready_to_use: bool,
}

fn map_kube_error(error: kube::Error, kind: &'static str, id: &str) -> StoreError {
    match error {
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound {
            kind,
            id: id.to_string(),
        },
        kube::Error::Api(response) if response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists {
                kind,
                id: id.to_string(),
            }
        }
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict {
            kind,
            id: id.to_string(),
        },
        error => StoreError::Unavailable {
            message: error.to_string(),
        },
    }
}

fn owned_meta(name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        finalizers: Some(vec![utils::METADATA_FINALIZER.to_string()]),
        ..ObjectMeta::default()
    }
}

/// The CRD-backed store.
pub(crate) struct CrdStore {
    volumes: Api<ArcaVolume>,
    snapshots: Api<ArcaSnapshot>,
}

impl CrdStore {
    pub(crate) fn new(client: Client) -> Self {
        Self {
            volumes: Api::all(client.clone()),
            snapshots: Api::all(client),
        }
    }

    /// Drop our finalizer (and only ours) so the object can go away.
    async fn release_finalizer<K>(api: &Api<K>, name: &str, finalizers: Vec<String>)
    where
        K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
        K::DynamicType: Default,
    {
        let remaining: Vec<String> = finalizers
            .into_iter()
            .filter(|finalizer| finalizer != utils::METADATA_FINALIZER)
            .collect();
        let patch = json!({ "metadata": { "finalizers": remaining } });
        let _ = api
            .patch(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await;
    }

    fn list_params(starting_token: Option<&str>, max_entries: usize) -> ListParams {
        let mut params = ListParams::default();
        if max_entries > 0 {
            params.limit = Some(max_entries as u32);
        }
        if let Some(token) = starting_token {
            if !token.is_empty() {
                params.continue_token = Some(token.to_string());
            }
        }
        params
    }
}

#[async_trait]
impl MetaStore for CrdStore {
    async fn create_volume(&self, record: &VolumeRecord) -> Result<(), StoreError> {
        let object = ArcaVolume {
            metadata: owned_meta(&record.volume_id),
            spec: ArcaVolumeSpec {
                record: record.clone(),
            },
        };
        self.volumes
            .create(&PostParams::default(), &object)
            .await
            .map_err(|error| map_kube_error(error, "volume", &record.volume_id))?;
        debug!(volume_id = %record.volume_id, "volume record created");
        Ok(())
    }

    async fn get_volume(&self, volume_id: &str) -> Result<VolumeRecord, StoreError> {
        let object = self
            .volumes
            .get(volume_id)
            .await
            .map_err(|error| map_kube_error(error, "volume", volume_id))?;
        Ok(object.spec.record)
    }

    async fn update_volume(&self, record: &VolumeRecord) -> Result<(), StoreError> {
        let mut object = self
            .volumes
            .get(&record.volume_id)
            .await
            .map_err(|error| map_kube_error(error, "volume", &record.volume_id))?;
        object.spec.record = record.clone();
        self.volumes
            .replace(&record.volume_id, &PostParams::default(), &object)
            .await
            .map_err(|error| map_kube_error(error, "volume", &record.volume_id))?;
        Ok(())
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<(), StoreError> {
        let object = self
            .volumes
            .get(volume_id)
            .await
            .map_err(|error| map_kube_error(error, "volume", volume_id))?;
        let _ = self.volumes.delete(volume_id, &Default::default()).await;
        Self::release_finalizer(&self.volumes, volume_id, object.finalizers().to_vec()).await;
        debug!(volume_id, "volume record deleted");
        Ok(())
    }

    async fn list_volumes(
        &self,
        starting_token: Option<&str>,
        max_entries: usize,
    ) -> Result<Page<VolumeRecord>, StoreError> {
        let list = self
            .volumes
            .list(&Self::list_params(starting_token, max_entries))
            .await
            .map_err(|error| map_kube_error(error, "volume", "<list>"))?;
        let next_token = list.metadata.continue_.clone().filter(|token| !token.is_empty());
        Ok(Page {
            entries: list.items.into_iter().map(|object| object.spec.record).collect(),
            next_token,
        })
    }

    async fn create_snapshot(&self, record: &SnapshotRecord) -> Result<(), StoreError> {
        let mut record = record.clone();
        // Readiness only ever becomes true through a status update.
        record.ready_to_use = false;
        let object = ArcaSnapshot {
            metadata: owned_meta(&record.snapshot_id),
            spec: ArcaSnapshotSpec {
                record: record.clone(),
            },
            status: Some(ArcaSnapshotStatus::default()),
        };
        self.snapshots
            .create(&PostParams::default(), &object)
            .await
            .map_err(|error| map_kube_error(error, "snapshot", &record.snapshot_id))?;
        Ok(())
    }

    async fn get_snapshot(&self, snapshot_id: &str) -> Result<SnapshotRecord, StoreError> {
        let object = self
            .snapshots
            .get(snapshot_id)
            .await
            .map_err(|error| map_kube_error(error, "snapshot", snapshot_id))?;
        let mut record = object.spec.record;
        record.ready_to_use = object
            .status
            .map(|status| status.ready_to_use)
            .unwrap_or(false);
        Ok(record)
    }

    async fn update_snapshot_status(
        &self,
        snapshot_id: &str,
        ready_to_use: bool,
    ) -> Result<(), StoreError> {
        let patch = json!({ "status": { "ready_to_use": ready_to_use } });
        self.snapshots
            .patch_status(snapshot_id, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|error| map_kube_error(error, "snapshot", snapshot_id))?;
        Ok(())
    }

    async fn delete_snapshot(&self, snapshot_id: &str) -> Result<(), StoreError> {
        let object = self
            .snapshots
            .get(snapshot_id)
            .await
            .map_err(|error| map_kube_error(error, "snapshot", snapshot_id))?;
        let _ = self.snapshots.delete(snapshot_id, &Default::default()).await;
        Self::release_finalizer(&self.snapshots, snapshot_id, object.finalizers().to_vec()).await;
        Ok(())
    }

    async fn list_snapshots(
        &self,
        source_volume_id: Option<&str>,
        starting_token: Option<&str>,
        max_entries: usize,
    ) -> Result<Page<SnapshotRecord>, StoreError> {
        let list = self
            .snapshots
            .list(&Self::list_params(starting_token, max_entries))
            .await
            .map_err(|error| map_kube_error(error, "snapshot", "<list>"))?;
        let next_token = list.metadata.continue_.clone().filter(|token| !token.is_empty());
        let entries = list
            .items
            .into_iter()
            .map(|object| {
                let ready = object
                    .status
                    .as_ref()
                    .map(|status| status.ready_to_use)
                    .unwrap_or(false);
                let mut record = object.spec.record;
                record.ready_to_use = ready;
                record
            })
            .filter(|record| {
                source_volume_id
                    .map(|source| record.source_volume_id == source)
                    .unwrap_or(true)
            })
            .collect();
        Ok(Page {
            entries,
            next_token,
        })
    }
}
