//! The CSI Controller service: deterministic identities, idempotent create
//! and delete flows, clone/restore through server-side reflinks, and
//! quota-backed expansion.

use crate::{
    client::ArcaApi,
    store::{ContentSource, MetaStore, SnapshotRecord, StoreError, VolumeRecord},
    svm::{SvmError, SvmManager},
};
use chrono::{DateTime, Utc};
use csi_driver::{
    context::{CreateParams, VolumeContext},
    csi::*,
    ids,
    limiter::VolumeOpGuard,
};
use rest_client::ApiClientError;
use std::sync::Arc;
use stor_port::types::v0::{CreateDirectoryBody, CreateSnapshotBody, SetQuotaBody, Svm};
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, instrument, warn};

/// Default capacity when the request carries no range.
const DEFAULT_CAPACITY_BYTES: u64 = 1 << 30;

/// Relative path of a snapshot within its SVM.
fn snapshot_path(snapshot_id: &str) -> String {
    format!(".snapshots/{snapshot_id}")
}

pub(crate) struct CsiControllerSvc {
    store: Arc<dyn MetaStore>,
    api: Arc<dyn ArcaApi>,
    svms: SvmManager,
}

impl CsiControllerSvc {
    pub(crate) fn new(
        store: Arc<dyn MetaStore>,
        api: Arc<dyn ArcaApi>,
        svms: SvmManager,
    ) -> Self {
        Self { store, api, svms }
    }
}

fn store_error(error: StoreError) -> Status {
    match &error {
        StoreError::NotFound { .. } => Status::not_found(error.to_string()),
        StoreError::AlreadyExists { .. } => Status::already_exists(error.to_string()),
        StoreError::Conflict { .. } => Status::aborted(error.to_string()),
        _ => Status::unavailable(error.to_string()),
    }
}

fn api_error(error: ApiClientError) -> Status {
    match error {
        ApiClientError::ResourceNotExists(message) => Status::not_found(message),
        ApiClientError::ResourceAlreadyExists(message) => Status::already_exists(message),
        ApiClientError::InvalidArgument(message) => Status::invalid_argument(message),
        ApiClientError::ResourceExhausted(message) => Status::resource_exhausted(message),
        ApiClientError::PreconditionFailed(message) => Status::failed_precondition(message),
        ApiClientError::RequestTimeout(message) => Status::deadline_exceeded(message),
        error => Status::internal(format!("Operation failed: {error:?}")),
    }
}

fn svm_error(error: SvmError) -> Status {
    match &error {
        SvmError::Allocation { .. } => Status::resource_exhausted(error.to_string()),
        SvmError::Lock { .. } => Status::aborted(error.to_string()),
        _ => Status::internal(error.to_string()),
    }
}

/// Reject block access; accept every mount-flag-based access mode.
fn check_volume_capabilities(capabilities: &[VolumeCapability]) -> Result<(), Status> {
    if capabilities.is_empty() {
        return Err(Status::invalid_argument("volume capabilities are required"));
    }
    for capability in capabilities {
        match &capability.access_type {
            Some(volume_capability::AccessType::Block(_)) => {
                return Err(Status::invalid_argument(
                    "block access type is not supported",
                ));
            }
            Some(volume_capability::AccessType::Mount(_)) => {}
            None => return Err(Status::invalid_argument("access type is required")),
        }
        if capability.access_mode.is_none() {
            return Err(Status::invalid_argument("access mode is required"));
        }
    }
    Ok(())
}

fn requested_capacity(range: Option<&CapacityRange>) -> Result<u64, Status> {
    match range {
        Some(range) if range.required_bytes < 0 => {
            Err(Status::invalid_argument("capacity must not be negative"))
        }
        Some(range) if range.required_bytes > 0 => Ok(range.required_bytes as u64),
        _ => Ok(DEFAULT_CAPACITY_BYTES),
    }
}

/// The request's content source as a record variant. Exactly one payload may
/// be set.
fn requested_content_source(
    source: Option<&VolumeContentSource>,
) -> Result<Option<ContentSource>, Status> {
    match source.and_then(|source| source.r#type.as_ref()) {
        None if source.is_some() => Err(Status::invalid_argument(
            "volume content source must set either volume or snapshot",
        )),
        None => Ok(None),
        Some(volume_content_source::Type::Volume(volume)) => Ok(Some(ContentSource::Volume {
            source_volume_id: volume.volume_id.clone(),
        })),
        Some(volume_content_source::Type::Snapshot(snapshot)) => {
            Ok(Some(ContentSource::Snapshot {
                source_snapshot_id: snapshot.snapshot_id.clone(),
            }))
        }
    }
}

fn content_source_to_csi(source: &Option<ContentSource>) -> Option<VolumeContentSource> {
    source.as_ref().map(|source| VolumeContentSource {
        r#type: Some(match source {
            ContentSource::Volume { source_volume_id } => {
                volume_content_source::Type::Volume(volume_content_source::VolumeSource {
                    volume_id: source_volume_id.clone(),
                })
            }
            ContentSource::Snapshot { source_snapshot_id } => {
                volume_content_source::Type::Snapshot(volume_content_source::SnapshotSource {
                    snapshot_id: source_snapshot_id.clone(),
                })
            }
        }),
    })
}

fn timestamp(datetime: DateTime<Utc>) -> prost_types::Timestamp {
    prost_types::Timestamp {
        seconds: datetime.timestamp(),
        nanos: datetime.timestamp_subsec_nanos() as i32,
    }
}

fn to_csi_volume(record: &VolumeRecord) -> Volume {
    let context = VolumeContext {
        svm: record.svm_name.clone(),
        vip: record.vip.clone(),
        volume_path: record.path.clone(),
    };
    Volume {
        capacity_bytes: record.capacity_bytes as i64,
        volume_id: record.volume_id.clone(),
        volume_context: context.to_map(),
        content_source: content_source_to_csi(&record.content_source),
        accessible_topology: Vec::new(),
    }
}

fn to_csi_snapshot(record: &SnapshotRecord) -> Snapshot {
    Snapshot {
        size_bytes: record.size_bytes as i64,
        snapshot_id: record.snapshot_id.clone(),
        source_volume_id: record.source_volume_id.clone(),
        creation_time: Some(timestamp(record.created_at)),
        ready_to_use: record.ready_to_use,
    }
}

/// Whether an existing record satisfies the incoming create request.
fn check_existing_volume(
    record: &VolumeRecord,
    capacity: u64,
    content_source: &Option<ContentSource>,
) -> Result<(), Status> {
    if record.capacity_bytes != capacity {
        return Err(Status::already_exists(format!(
            "volume {} exists with capacity {} (requested {capacity})",
            record.volume_id, record.capacity_bytes
        )));
    }
    if &record.content_source != content_source {
        return Err(Status::already_exists(format!(
            "volume {} exists with a different content source",
            record.volume_id
        )));
    }
    Ok(())
}

impl CsiControllerSvc {
    /// Resolve the SVM and issue the data side-effect of a create: a fresh
    /// directory, a clone of a volume, or a restore of a snapshot.
    async fn materialize_volume(
        &self,
        volume_id: &str,
        namespace: &str,
        content_source: &Option<ContentSource>,
    ) -> Result<Svm, Status> {
        match content_source {
            None => {
                let svm = self
                    .svms
                    .ensure_svm(namespace)
                    .await
                    .map_err(svm_error)?;
                self.api
                    .create_directory(&CreateDirectoryBody {
                        svm_name: svm.name.clone(),
                        path: volume_id.to_string(),
                        quota_bytes: None,
                    })
                    .await
                    .map_err(api_error)?;
                Ok(svm)
            }
            Some(ContentSource::Volume { source_volume_id }) => {
                let source = self
                    .store
                    .get_volume(source_volume_id)
                    .await
                    .map_err(|error| match error {
                        StoreError::NotFound { .. } => Status::not_found(format!(
                            "source volume {source_volume_id} not found"
                        )),
                        error => store_error(error),
                    })?;
                // A clone lands on the source volume's SVM.
                self.api
                    .create_snapshot(&CreateSnapshotBody {
                        svm_name: source.svm_name.clone(),
                        source_path: source.path.clone(),
                        snapshot_path: volume_id.to_string(),
                    })
                    .await
                    .map_err(api_error)?;
                self.svms
                    .get_svm(&source.svm_name)
                    .await
                    .map_err(api_error)
            }
            Some(ContentSource::Snapshot { source_snapshot_id }) => {
                let snapshot = self
                    .store
                    .get_snapshot(source_snapshot_id)
                    .await
                    .map_err(|error| match error {
                        StoreError::NotFound { .. } => Status::not_found(format!(
                            "snapshot {source_snapshot_id} not found"
                        )),
                        error => store_error(error),
                    })?;
                if !snapshot.ready_to_use {
                    return Err(Status::unavailable(format!(
                        "snapshot {source_snapshot_id} is not ready"
                    )));
                }
                self.api
                    .create_snapshot(&CreateSnapshotBody {
                        svm_name: snapshot.svm_name.clone(),
                        source_path: snapshot.path.clone(),
                        snapshot_path: volume_id.to_string(),
                    })
                    .await
                    .map_err(api_error)?;
                self.svms
                    .get_svm(&snapshot.svm_name)
                    .await
                    .map_err(api_error)
            }
        }
    }
}

#[tonic::async_trait]
impl controller_server::Controller for CsiControllerSvc {
    #[instrument(skip(self, request), fields(volume.id = tracing::field::Empty))]
    async fn create_volume(
        &self,
        request: Request<CreateVolumeRequest>,
    ) -> Result<Response<CreateVolumeResponse>, Status> {
        let args = request.into_inner();

        if args.name.is_empty() {
            return Err(Status::invalid_argument("volume name is required"));
        }
        check_volume_capabilities(&args.volume_capabilities)?;
        let params = CreateParams::try_from(&args.parameters)?;
        let capacity = requested_capacity(args.capacity_range.as_ref())?;
        let content_source = requested_content_source(args.volume_content_source.as_ref())?;

        let volume_id = ids::volume_id(&args.name);
        tracing::Span::current().record("volume.id", volume_id.as_str());
        let _guard = VolumeOpGuard::new(&volume_id)?;

        // Idempotency: an identical existing volume is simply returned.
        match self.store.get_volume(&volume_id).await {
            Ok(existing) => {
                check_existing_volume(&existing, capacity, &content_source)?;
                debug!(volume.id = %volume_id, "volume already exists with matching parameters");
                return Ok(Response::new(CreateVolumeResponse {
                    volume: Some(to_csi_volume(&existing)),
                }));
            }
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(store_error(error)),
        }

        // The relative path equals the id; the node joins it to the SVM's
        // NFS root.
        let svm = self
            .materialize_volume(&volume_id, params.namespace(), &content_source)
            .await?;

        self.api
            .set_quota(&SetQuotaBody {
                svm_name: svm.name.clone(),
                path: volume_id.clone(),
                quota_bytes: capacity,
            })
            .await
            .map_err(api_error)?;

        let record = VolumeRecord {
            volume_id: volume_id.clone(),
            name: params.pvc_name().unwrap_or(&args.name).to_string(),
            svm_name: svm.name.clone(),
            vip: svm.vip.clone(),
            path: volume_id.clone(),
            capacity_bytes: capacity,
            created_at: Utc::now(),
            content_source: content_source.clone(),
        };
        match self.store.create_volume(&record).await {
            Ok(()) => {}
            Err(error) if error.is_already_exists() => {
                // Raced another controller: re-fetch and re-check.
                let existing = self.store.get_volume(&volume_id).await.map_err(store_error)?;
                check_existing_volume(&existing, capacity, &content_source)?;
                return Ok(Response::new(CreateVolumeResponse {
                    volume: Some(to_csi_volume(&existing)),
                }));
            }
            Err(error) => return Err(store_error(error)),
        }

        info!(volume.id = %volume_id, svm = %svm.name, "volume created");
        Ok(Response::new(CreateVolumeResponse {
            volume: Some(to_csi_volume(&record)),
        }))
    }

    #[instrument(skip(self, request), fields(volume.id = %request.get_ref().volume_id))]
    async fn delete_volume(
        &self,
        request: Request<DeleteVolumeRequest>,
    ) -> Result<Response<DeleteVolumeResponse>, Status> {
        let args = request.into_inner();
        if args.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume ID is required"));
        }
        let _guard = VolumeOpGuard::new(&args.volume_id)?;

        let record = match self.store.get_volume(&args.volume_id).await {
            Ok(record) => record,
            Err(error) if error.is_not_found() => {
                debug!(volume.id = %args.volume_id, "volume already deleted");
                return Ok(Response::new(DeleteVolumeResponse {}));
            }
            Err(error) => return Err(store_error(error)),
        };

        // REST delete first; metadata goes away only once the directory is
        // confirmed gone.
        self.api
            .delete_directory(&record.svm_name, &record.path)
            .await
            .map_err(api_error)?;

        match self.store.delete_volume(&args.volume_id).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(store_error(error)),
        }
        info!(volume.id = %args.volume_id, "volume deleted");
        Ok(Response::new(DeleteVolumeResponse {}))
    }

    async fn controller_publish_volume(
        &self,
        _request: Request<ControllerPublishVolumeRequest>,
    ) -> Result<Response<ControllerPublishVolumeResponse>, Status> {
        Err(Status::unimplemented(
            "ControllerPublishVolume is not required for NFS",
        ))
    }

    async fn controller_unpublish_volume(
        &self,
        _request: Request<ControllerUnpublishVolumeRequest>,
    ) -> Result<Response<ControllerUnpublishVolumeResponse>, Status> {
        Err(Status::unimplemented(
            "ControllerUnpublishVolume is not required for NFS",
        ))
    }

    #[instrument(skip(self, request), fields(volume.id = %request.get_ref().volume_id))]
    async fn validate_volume_capabilities(
        &self,
        request: Request<ValidateVolumeCapabilitiesRequest>,
    ) -> Result<Response<ValidateVolumeCapabilitiesResponse>, Status> {
        let args = request.into_inner();
        if args.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume ID is required"));
        }
        self.store
            .get_volume(&args.volume_id)
            .await
            .map_err(store_error)?;

        let response = match check_volume_capabilities(&args.volume_capabilities) {
            Ok(()) => ValidateVolumeCapabilitiesResponse {
                confirmed: Some(validate_volume_capabilities_response::Confirmed {
                    volume_context: args.volume_context,
                    volume_capabilities: args.volume_capabilities,
                    parameters: args.parameters,
                }),
                message: String::new(),
            },
            Err(status) => ValidateVolumeCapabilitiesResponse {
                confirmed: None,
                message: status.message().to_string(),
            },
        };
        Ok(Response::new(response))
    }

    async fn list_volumes(
        &self,
        request: Request<ListVolumesRequest>,
    ) -> Result<Response<ListVolumesResponse>, Status> {
        let args = request.into_inner();
        if args.max_entries < 0 {
            return Err(Status::invalid_argument("max_entries can't be negative"));
        }
        let page = self
            .store
            .list_volumes(Some(args.starting_token.as_str()), args.max_entries as usize)
            .await
            .map_err(store_error)?;
        Ok(Response::new(ListVolumesResponse {
            entries: page
                .entries
                .iter()
                .map(|record| list_volumes_response::Entry {
                    volume: Some(to_csi_volume(record)),
                    status: None,
                })
                .collect(),
            next_token: page.next_token.unwrap_or_default(),
        }))
    }

    async fn get_capacity(
        &self,
        request: Request<GetCapacityRequest>,
    ) -> Result<Response<GetCapacityResponse>, Status> {
        let args = request.into_inner();
        check_volume_capabilities(&args.volume_capabilities).ok();
        // Thin pools over-commit; report unknown rather than a misleading sum.
        Ok(Response::new(GetCapacityResponse {
            available_capacity: 0,
            maximum_volume_size: None,
            minimum_volume_size: None,
        }))
    }

    async fn controller_get_capabilities(
        &self,
        _request: Request<ControllerGetCapabilitiesRequest>,
    ) -> Result<Response<ControllerGetCapabilitiesResponse>, Status> {
        let capabilities = vec![
            controller_service_capability::rpc::Type::CreateDeleteVolume,
            controller_service_capability::rpc::Type::CreateDeleteSnapshot,
            controller_service_capability::rpc::Type::CloneVolume,
            controller_service_capability::rpc::Type::ExpandVolume,
            controller_service_capability::rpc::Type::ListVolumes,
            controller_service_capability::rpc::Type::ListSnapshots,
        ];
        Ok(Response::new(ControllerGetCapabilitiesResponse {
            capabilities: capabilities
                .into_iter()
                .map(|capability| ControllerServiceCapability {
                    r#type: Some(controller_service_capability::Type::Rpc(
                        controller_service_capability::Rpc {
                            r#type: capability as i32,
                        },
                    )),
                })
                .collect(),
        }))
    }

    #[instrument(skip(self, request), fields(snapshot.id = tracing::field::Empty))]
    async fn create_snapshot(
        &self,
        request: Request<CreateSnapshotRequest>,
    ) -> Result<Response<CreateSnapshotResponse>, Status> {
        let args = request.into_inner();
        if args.name.is_empty() {
            return Err(Status::invalid_argument("snapshot name is required"));
        }
        if args.source_volume_id.is_empty() {
            return Err(Status::invalid_argument("source volume ID is required"));
        }

        let snapshot_id = ids::snapshot_id(&args.source_volume_id, &args.name);
        tracing::Span::current().record("snapshot.id", snapshot_id.as_str());
        let _guard = VolumeOpGuard::new(&snapshot_id)?;

        // Idempotency: a hit short-circuits without another REST call.
        match self.store.get_snapshot(&snapshot_id).await {
            Ok(existing) => {
                debug!(snapshot.id = %snapshot_id, "snapshot already exists");
                return Ok(Response::new(CreateSnapshotResponse {
                    snapshot: Some(to_csi_snapshot(&existing)),
                }));
            }
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(store_error(error)),
        }

        let source = self
            .store
            .get_volume(&args.source_volume_id)
            .await
            .map_err(|error| match error {
                StoreError::NotFound { .. } => Status::not_found(format!(
                    "source volume {} not found",
                    args.source_volume_id
                )),
                error => store_error(error),
            })?;

        let path = snapshot_path(&snapshot_id);
        self.api
            .create_snapshot(&CreateSnapshotBody {
                svm_name: source.svm_name.clone(),
                source_path: source.path.clone(),
                snapshot_path: path.clone(),
            })
            .await
            .map_err(api_error)?;

        let mut record = SnapshotRecord {
            snapshot_id: snapshot_id.clone(),
            name: args.name,
            source_volume_id: args.source_volume_id,
            svm_name: source.svm_name,
            path,
            size_bytes: source.capacity_bytes,
            created_at: Utc::now(),
            ready_to_use: false,
        };
        match self.store.create_snapshot(&record).await {
            Ok(()) => {}
            Err(error) if error.is_already_exists() => {
                let existing = self
                    .store
                    .get_snapshot(&snapshot_id)
                    .await
                    .map_err(store_error)?;
                return Ok(Response::new(CreateSnapshotResponse {
                    snapshot: Some(to_csi_snapshot(&existing)),
                }));
            }
            Err(error) => return Err(store_error(error)),
        }

        // Readiness flips through a dedicated status write. A record stuck at
        // ready=false is useless, so roll the record back when it fails.
        if let Err(status_error) = self.store.update_snapshot_status(&snapshot_id, true).await {
            error!(snapshot.id = %snapshot_id, %status_error, "failed to persist ready status");
            if let Err(cleanup) = self.store.delete_snapshot(&snapshot_id).await {
                error!(snapshot.id = %snapshot_id, %cleanup, "rollback of snapshot record failed");
            }
            return Err(store_error(status_error));
        }
        record.ready_to_use = true;

        info!(snapshot.id = %record.snapshot_id, "snapshot created");
        Ok(Response::new(CreateSnapshotResponse {
            snapshot: Some(to_csi_snapshot(&record)),
        }))
    }

    #[instrument(skip(self, request), fields(snapshot.id = %request.get_ref().snapshot_id))]
    async fn delete_snapshot(
        &self,
        request: Request<DeleteSnapshotRequest>,
    ) -> Result<Response<DeleteSnapshotResponse>, Status> {
        let args = request.into_inner();
        if args.snapshot_id.is_empty() {
            return Err(Status::invalid_argument("snapshot ID is required"));
        }
        let _guard = VolumeOpGuard::new(&args.snapshot_id)?;

        let record = match self.store.get_snapshot(&args.snapshot_id).await {
            Ok(record) => record,
            Err(error) if error.is_not_found() => {
                return Ok(Response::new(DeleteSnapshotResponse {}));
            }
            Err(error) => return Err(store_error(error)),
        };

        self.api
            .delete_snapshot(&record.svm_name, &record.path)
            .await
            .map_err(api_error)?;

        match self.store.delete_snapshot(&args.snapshot_id).await {
            Ok(()) => {}
            Err(error) if error.is_not_found() => {}
            Err(error) => return Err(store_error(error)),
        }
        info!(snapshot.id = %args.snapshot_id, "snapshot deleted");
        Ok(Response::new(DeleteSnapshotResponse {}))
    }

    async fn list_snapshots(
        &self,
        request: Request<ListSnapshotsRequest>,
    ) -> Result<Response<ListSnapshotsResponse>, Status> {
        let args = request.into_inner();
        if args.max_entries < 0 {
            return Err(Status::invalid_argument("max_entries can't be negative"));
        }

        // A specific id narrows the listing to that snapshot, or nothing.
        if !args.snapshot_id.is_empty() {
            let entries = match self.store.get_snapshot(&args.snapshot_id).await {
                Ok(record) => vec![list_snapshots_response::Entry {
                    snapshot: Some(to_csi_snapshot(&record)),
                }],
                Err(error) if error.is_not_found() => Vec::new(),
                Err(error) => return Err(store_error(error)),
            };
            return Ok(Response::new(ListSnapshotsResponse {
                entries,
                next_token: String::new(),
            }));
        }

        let source = (!args.source_volume_id.is_empty()).then_some(args.source_volume_id.as_str());
        let page = self
            .store
            .list_snapshots(
                source,
                Some(args.starting_token.as_str()),
                args.max_entries as usize,
            )
            .await
            .map_err(store_error)?;
        Ok(Response::new(ListSnapshotsResponse {
            entries: page
                .entries
                .iter()
                .map(|record| list_snapshots_response::Entry {
                    snapshot: Some(to_csi_snapshot(record)),
                })
                .collect(),
            next_token: page.next_token.unwrap_or_default(),
        }))
    }

    #[instrument(skip(self, request), fields(volume.id = %request.get_ref().volume_id))]
    async fn controller_expand_volume(
        &self,
        request: Request<ControllerExpandVolumeRequest>,
    ) -> Result<Response<ControllerExpandVolumeResponse>, Status> {
        let args = request.into_inner();
        if args.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume ID is required"));
        }
        let required = match args.capacity_range {
            Some(range) if range.required_bytes > 0 => range.required_bytes as u64,
            _ => return Err(Status::invalid_argument("capacity range is required")),
        };
        let _guard = VolumeOpGuard::new(&args.volume_id)?;

        let mut record = self
            .store
            .get_volume(&args.volume_id)
            .await
            .map_err(store_error)?;

        // Quota growth is monotonic; anything at or below the current size is
        // already satisfied and must not reach the backend.
        if required <= record.capacity_bytes {
            return Ok(Response::new(ControllerExpandVolumeResponse {
                capacity_bytes: record.capacity_bytes as i64,
                node_expansion_required: false,
            }));
        }

        self.api
            .set_quota(&SetQuotaBody {
                svm_name: record.svm_name.clone(),
                path: record.path.clone(),
                quota_bytes: required,
            })
            .await
            .map_err(api_error)?;

        record.capacity_bytes = required;
        if let Err(error) = self.store.update_volume(&record).await {
            // The quota is live; the stale record corrects itself on the next
            // expand.
            warn!(volume.id = %record.volume_id, %error, "failed to update volume record");
        }

        info!(volume.id = %record.volume_id, capacity = required, "volume expanded");
        Ok(Response::new(ControllerExpandVolumeResponse {
            capacity_bytes: required as i64,
            node_expansion_required: false,
        }))
    }

    async fn controller_get_volume(
        &self,
        _request: Request<ControllerGetVolumeRequest>,
    ) -> Result<Response<ControllerGetVolumeResponse>, Status> {
        Err(Status::unimplemented("ControllerGetVolume is not implemented"))
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
