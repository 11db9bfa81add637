//! The CSI Node service: stage/publish as bind mounts from the per-SVM
//! shared NFS mount, with crash-safe bookkeeping and rollback when that
//! bookkeeping cannot be persisted.

use crate::{
    mount::{MountManager, Mounter},
    state::NodeState,
};
use csi_driver::{context::VolumeContext, csi::*, limiter::VolumeOpGuard};
use std::{path::Path, sync::Arc};
use tonic::{Request, Response, Status};
use tracing::{debug, info, instrument, warn};

pub(crate) struct NodeSvc {
    node_id: String,
    state: Arc<NodeState>,
    mounts: Arc<MountManager>,
}

impl NodeSvc {
    pub(crate) fn new(node_id: String, state: Arc<NodeState>, mounts: Arc<MountManager>) -> Self {
        Self {
            node_id,
            state,
            mounts,
        }
    }

    fn mounter(&self) -> Arc<dyn Mounter> {
        self.mounts.mounter()
    }
}

fn mount_error(error: crate::mount::MountError) -> Status {
    Status::internal(error.to_string())
}

#[tonic::async_trait]
impl node_server::Node for NodeSvc {
    #[instrument(skip(self, request), fields(volume.id = %request.get_ref().volume_id))]
    async fn node_stage_volume(
        &self,
        request: Request<NodeStageVolumeRequest>,
    ) -> Result<Response<NodeStageVolumeResponse>, Status> {
        let msg = request.into_inner();

        if msg.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume ID is required"));
        }
        if msg.staging_target_path.is_empty() {
            return Err(Status::invalid_argument("staging target path is required"));
        }
        if msg.volume_capability.is_none() {
            return Err(Status::invalid_argument("volume capability is required"));
        }
        let context = VolumeContext::try_from(&msg.volume_context)?;
        let _guard = VolumeOpGuard::new(&msg.volume_id)?;

        // One shared mount per SVM; create it on first use.
        let svm_mount = self
            .mounts
            .ensure_svm_mount(&context.svm, &context.vip)
            .await
            .map_err(mount_error)?;

        std::fs::create_dir_all(&msg.staging_target_path).map_err(|error| {
            Status::internal(format!(
                "failed to create staging target {}: {error}",
                msg.staging_target_path
            ))
        })?;

        let mounter = self.mounter();
        if mounter
            .is_mount_point(&msg.staging_target_path)
            .await
            .map_err(mount_error)?
        {
            debug!(volume.id = %msg.volume_id, "already staged");
            return Ok(Response::new(NodeStageVolumeResponse {}));
        }

        let source = svm_mount.join(&context.volume_path);
        mounter
            .bind_mount(&source.to_string_lossy(), &msg.staging_target_path)
            .await
            .map_err(mount_error)?;

        // Bookkeeping failure rolls the bind mount back; a mount the state
        // does not know about would never be refcounted.
        if let Err(error) = self.state.record_staging(
            &msg.volume_id,
            &context.svm,
            &context.vip,
            &msg.staging_target_path,
        ) {
            warn!(volume.id = %msg.volume_id, %error, "state persist failed, rolling back stage");
            if let Err(unmount_error) = mounter.unmount(&msg.staging_target_path).await {
                warn!(%unmount_error, "rollback unmount failed");
            }
            let _ = std::fs::remove_dir(&msg.staging_target_path);
            return Err(Status::internal(format!(
                "failed to persist node state for staging: {error}"
            )));
        }

        info!(volume.id = %msg.volume_id, svm = %context.svm, "volume staged");
        Ok(Response::new(NodeStageVolumeResponse {}))
    }

    #[instrument(skip(self, request), fields(volume.id = %request.get_ref().volume_id))]
    async fn node_unstage_volume(
        &self,
        request: Request<NodeUnstageVolumeRequest>,
    ) -> Result<Response<NodeUnstageVolumeResponse>, Status> {
        let msg = request.into_inner();

        if msg.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume ID is required"));
        }
        if msg.staging_target_path.is_empty() {
            return Err(Status::invalid_argument("staging target path is required"));
        }
        let _guard = VolumeOpGuard::new(&msg.volume_id)?;

        let svm = self.state.staging(&msg.volume_id).map(|entry| entry.svm_name);

        let mounter = self.mounter();
        if mounter
            .is_mount_point(&msg.staging_target_path)
            .await
            .map_err(mount_error)?
        {
            mounter
                .unmount(&msg.staging_target_path)
                .await
                .map_err(mount_error)?;
        }
        let _ = std::fs::remove_dir(&msg.staging_target_path);

        self.state
            .remove_staging(&msg.volume_id)
            .map_err(|error| Status::internal(error.to_string()))?;

        // With the entry gone the derived refcount may have hit zero.
        if let Some(svm) = svm {
            debug!(%svm, refcount = self.mounts.refcount(&svm), "evaluating shared mount");
            match self.mounts.unmount_svm_if_unused(&svm).await {
                Ok(true) => debug!(%svm, "shared mount torn down"),
                Ok(false) => {}
                Err(error) => warn!(%svm, %error, "failed to unmount shared SVM mount"),
            }
        }

        info!(volume.id = %msg.volume_id, "volume unstaged");
        Ok(Response::new(NodeUnstageVolumeResponse {}))
    }

    #[instrument(skip(self, request), fields(volume.id = %request.get_ref().volume_id))]
    async fn node_publish_volume(
        &self,
        request: Request<NodePublishVolumeRequest>,
    ) -> Result<Response<NodePublishVolumeResponse>, Status> {
        let msg = request.into_inner();

        if msg.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume ID is required"));
        }
        if msg.staging_target_path.is_empty() {
            return Err(Status::invalid_argument("staging target path is required"));
        }
        if msg.target_path.is_empty() {
            return Err(Status::invalid_argument("target path is required"));
        }
        if msg.volume_capability.is_none() {
            return Err(Status::invalid_argument("volume capability is required"));
        }
        let _guard = VolumeOpGuard::new(&msg.volume_id)?;

        std::fs::create_dir_all(&msg.target_path).map_err(|error| {
            Status::internal(format!(
                "failed to create target {}: {error}",
                msg.target_path
            ))
        })?;

        let mounter = self.mounter();
        if mounter
            .is_mount_point(&msg.target_path)
            .await
            .map_err(mount_error)?
        {
            debug!(volume.id = %msg.volume_id, "already published");
            return Ok(Response::new(NodePublishVolumeResponse {}));
        }

        mounter
            .bind_mount(&msg.staging_target_path, &msg.target_path)
            .await
            .map_err(mount_error)?;

        // A read-only bind needs a second remount step to take the flag.
        if msg.readonly {
            if let Err(error) = mounter
                .remount_readonly(&msg.staging_target_path, &msg.target_path)
                .await
            {
                warn!(volume.id = %msg.volume_id, %error, "read-only remount failed, rolling back");
                if let Err(unmount_error) = mounter.unmount(&msg.target_path).await {
                    warn!(%unmount_error, "rollback unmount failed");
                }
                let _ = std::fs::remove_dir(&msg.target_path);
                return Err(mount_error(error));
            }
        }

        if let Err(error) = self.state.record_publish(&msg.volume_id, &msg.target_path) {
            warn!(volume.id = %msg.volume_id, %error, "state persist failed, rolling back publish");
            if let Err(unmount_error) = mounter.unmount(&msg.target_path).await {
                warn!(%unmount_error, "rollback unmount failed");
            }
            let _ = std::fs::remove_dir(&msg.target_path);
            return Err(Status::internal(format!(
                "failed to persist node state for publish: {error}"
            )));
        }

        info!(volume.id = %msg.volume_id, target = %msg.target_path, "volume published");
        Ok(Response::new(NodePublishVolumeResponse {}))
    }

    #[instrument(skip(self, request), fields(volume.id = %request.get_ref().volume_id))]
    async fn node_unpublish_volume(
        &self,
        request: Request<NodeUnpublishVolumeRequest>,
    ) -> Result<Response<NodeUnpublishVolumeResponse>, Status> {
        let msg = request.into_inner();

        if msg.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume ID is required"));
        }
        if msg.target_path.is_empty() {
            return Err(Status::invalid_argument("target path is required"));
        }
        let _guard = VolumeOpGuard::new(&msg.volume_id)?;

        let mounter = self.mounter();
        if mounter
            .is_mount_point(&msg.target_path)
            .await
            .map_err(mount_error)?
        {
            mounter
                .unmount(&msg.target_path)
                .await
                .map_err(mount_error)?;
        }
        let _ = std::fs::remove_dir(&msg.target_path);

        self.state
            .remove_publish(&msg.volume_id, &msg.target_path)
            .map_err(|error| Status::internal(error.to_string()))?;

        info!(volume.id = %msg.volume_id, target = %msg.target_path, "volume unpublished");
        Ok(Response::new(NodeUnpublishVolumeResponse {}))
    }

    async fn node_get_volume_stats(
        &self,
        request: Request<NodeGetVolumeStatsRequest>,
    ) -> Result<Response<NodeGetVolumeStatsResponse>, Status> {
        let msg = request.into_inner();
        if msg.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume ID is required"));
        }
        if msg.volume_path.is_empty() {
            return Err(Status::invalid_argument("volume path is required"));
        }
        if !Path::new(&msg.volume_path).exists() {
            return Err(Status::not_found(format!(
                "volume path {} does not exist",
                msg.volume_path
            )));
        }

        // Server-side quotas bound the real capacity; statvfs of the NFS
        // mount is the closest local approximation.
        let usage = match nix::sys::statvfs::statvfs(msg.volume_path.as_str()) {
            Ok(stat) => {
                let block = stat.fragment_size() as i64;
                vec![
                    VolumeUsage {
                        total: stat.blocks() as i64 * block,
                        available: stat.blocks_available() as i64 * block,
                        used: (stat.blocks() as i64 - stat.blocks_free() as i64) * block,
                        unit: volume_usage::Unit::Bytes as i32,
                    },
                    VolumeUsage {
                        total: stat.files() as i64,
                        available: stat.files_available() as i64,
                        used: (stat.files() as i64 - stat.files_free() as i64),
                        unit: volume_usage::Unit::Inodes as i32,
                    },
                ]
            }
            Err(_) => vec![
                VolumeUsage {
                    unit: volume_usage::Unit::Bytes as i32,
                    ..VolumeUsage::default()
                },
                VolumeUsage {
                    unit: volume_usage::Unit::Inodes as i32,
                    ..VolumeUsage::default()
                },
            ],
        };

        Ok(Response::new(NodeGetVolumeStatsResponse {
            usage,
            volume_condition: None,
        }))
    }

    async fn node_expand_volume(
        &self,
        request: Request<NodeExpandVolumeRequest>,
    ) -> Result<Response<NodeExpandVolumeResponse>, Status> {
        let msg = request.into_inner();
        if msg.volume_id.is_empty() {
            return Err(Status::invalid_argument("volume ID is required"));
        }
        // Quota expansion is entirely server-side; nothing to do per node.
        debug!(volume.id = %msg.volume_id, "expansion handled server-side");
        Ok(Response::new(NodeExpandVolumeResponse {
            capacity_bytes: msg
                .capacity_range
                .map(|range| range.required_bytes)
                .unwrap_or_default(),
        }))
    }

    async fn node_get_capabilities(
        &self,
        _request: Request<NodeGetCapabilitiesRequest>,
    ) -> Result<Response<NodeGetCapabilitiesResponse>, Status> {
        let capabilities = vec![
            node_service_capability::rpc::Type::StageUnstageVolume,
            node_service_capability::rpc::Type::GetVolumeStats,
            node_service_capability::rpc::Type::ExpandVolume,
        ];
        Ok(Response::new(NodeGetCapabilitiesResponse {
            capabilities: capabilities
                .into_iter()
                .map(|capability| NodeServiceCapability {
                    r#type: Some(node_service_capability::Type::Rpc(
                        node_service_capability::Rpc {
                            r#type: capability as i32,
                        },
                    )),
                })
                .collect(),
        }))
    }

    async fn node_get_info(
        &self,
        _request: Request<NodeGetInfoRequest>,
    ) -> Result<Response<NodeGetInfoResponse>, Status> {
        if self.node_id.is_empty() {
            return Err(Status::unavailable("node ID not configured"));
        }
        Ok(Response::new(NodeGetInfoResponse {
            node_id: self.node_id.clone(),
            max_volumes_per_node: 0,
            accessible_topology: None,
        }))
    }
}

#[cfg(test)]
#[path = "node_tests.rs"]
mod tests;
