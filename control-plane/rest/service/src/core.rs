//! Storage-side orchestration behind the REST surface. Every mutation
//! follows the same shape: validate at the edge, take the resource's advisory
//! lock, run side-effects in an order where partial failure is retryable, and
//! write registry state only once the side-effects succeeded.

use crate::locks::ResourceLocks;
use agents::{
    exporter::{Exporter, ExporterSettings},
    ha::{GroupStatus, ResourceHost, SvmGroupSpec},
    lvm::{Lvm, LvmError},
    netns::{NetnsResource, NetnsSpec},
    qos::Qos,
    reflink::{Reflink, ReflinkError},
    registry::Registry,
    runner::SystemRunner,
    xfs::{self, Xfs},
};
use chrono::Utc;
use std::{path::PathBuf, sync::Arc, time::Duration};
use stor_port::{
    types::v0::{
        CapacityInfo, CreateDirectoryBody, CreateExportBody, CreateSnapshotBody, CreateSvmBody,
        CreateVolumeBody, Directory, ExpandQuotaBody, Export, QosInfo, QosLimits, QuotaInfo,
        RestoreSnapshotBody, SetQuotaBody, Snapshot, Svm, SvmState, Volume, VolumeState,
    },
    validation, ReplyError, ReplyErrorKind, ResourceKind,
};
use tracing::{error, info, warn};

/// How often and how long the background teardown of a degraded SVM retries.
const TEARDOWN_RETRIES: u32 = 10;
const TEARDOWN_BACKOFF: Duration = Duration::from_secs(30);

/// Maximum attempts at finding a collision-free XFS project id.
const PROJECT_ID_ATTEMPTS: u32 = 16;

/// Static configuration of the storage node.
#[derive(Debug, Clone)]
pub(crate) struct ServiceConfig {
    pub state_dir: PathBuf,
    pub export_root: String,
    pub exporter_config_dir: PathBuf,
    pub vg_name: String,
    pub thinpool: String,
    pub parent_if: String,
    pub replicated_resource: String,
    pub enable_v3: bool,
    pub mountd_port: u16,
    pub nlm_port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(utils::DEFAULT_STATE_DIR),
            export_root: utils::DEFAULT_EXPORT_ROOT.to_string(),
            exporter_config_dir: PathBuf::from(utils::DEFAULT_EXPORTER_CONFIG_DIR),
            vg_name: "vg_pool_01".to_string(),
            thinpool: "pool".to_string(),
            parent_if: "bond0".to_string(),
            replicated_resource: "drbd_r0".to_string(),
            enable_v3: false,
            mountd_port: 20048,
            nlm_port: 32768,
        }
    }
}

/// The orchestrator. Owns the state of record and the agents.
pub(crate) struct CoreService {
    config: ServiceConfig,
    registry: Registry,
    locks: ResourceLocks,
    runner: Arc<dyn SystemRunner>,
    lvm: Lvm,
    xfs: Xfs,
    reflink: Reflink,
    exporter: Exporter,
    qos: Qos,
    ha: Arc<dyn ResourceHost>,
}

impl CoreService {
    pub(crate) fn new(
        config: ServiceConfig,
        runner: Arc<dyn SystemRunner>,
        ha: Arc<dyn ResourceHost>,
    ) -> Arc<Self> {
        let registry = Registry::load(&config.state_dir);
        let exporter = Exporter::new(
            runner.clone(),
            ExporterSettings {
                config_dir: config.exporter_config_dir.clone(),
                state_dir: config.state_dir.clone(),
                enable_v3: config.enable_v3,
                mountd_port: config.mountd_port,
                nlm_port: config.nlm_port,
            },
        );
        Arc::new(Self {
            lvm: Lvm::new(runner.clone(), &config.vg_name, &config.thinpool),
            xfs: Xfs::new(runner.clone()),
            reflink: Reflink::new(runner.clone()),
            qos: Qos::new(runner.clone()),
            exporter,
            registry,
            locks: ResourceLocks::default(),
            runner,
            ha,
            config,
        })
    }

    fn svm_root(&self, svm: &str) -> String {
        format!("{}/{}", self.config.export_root.trim_end_matches('/'), svm)
    }

    fn volume_mount(&self, svm: &str, volume: &str) -> String {
        format!("{}/{}", self.svm_root(svm), volume)
    }

    fn svm_lv(svm: &str) -> String {
        format!("vol_{svm}")
    }

    fn volume_lv(svm: &str, volume: &str) -> String {
        format!("vol_{svm}_{volume}")
    }

    fn persist_error(error: agents::registry::RegistryError) -> ReplyError {
        ReplyError::failed_persist(ResourceKind::Unknown, error.to_string(), String::new())
    }

    fn ready_svm(&self, name: &str) -> Result<Svm, ReplyError> {
        let svm = self
            .registry
            .svm(name)
            .ok_or_else(|| ReplyError::not_found(ResourceKind::Svm, name))?;
        match svm.state {
            SvmState::Deleting => Err(ReplyError::failed_precondition(
                ResourceKind::Svm,
                format!("SVM {name} is being deleted"),
            )),
            _ => Ok(svm),
        }
    }

    // SVMs

    /// Create an SVM. Returns the record and whether it was newly created;
    /// an identical existing SVM is re-affirmed instead of recreated.
    pub(crate) async fn create_svm(
        self: &Arc<Self>,
        body: CreateSvmBody,
    ) -> Result<(Svm, bool), ReplyError> {
        let kind = ResourceKind::Svm;
        validation::validate_name(&body.name).map_err(|e| e.for_resource(kind))?;
        validation::validate_vlan(body.vlan_id).map_err(|e| e.for_resource(kind))?;
        let (ip, prefix) =
            validation::parse_ip_cidr(&body.ip_cidr).map_err(|e| e.for_resource(kind))?;
        let gateway = match &body.gateway {
            Some(gateway) => validation::parse_ipv4(gateway).map_err(|e| e.for_resource(kind))?,
            None => validation::infer_gateway(&body.ip_cidr).map_err(|e| e.for_resource(kind))?,
        };
        if let Some(size) = body.root_volume_size_bytes {
            validation::validate_size(size).map_err(|e| e.for_resource(kind))?;
        }

        let _guard = self.locks.lock(&ResourceLocks::svm_key(&body.name)).await;

        if let Some(existing) = self.registry.svm(&body.name) {
            return if body.matches(&existing) {
                Ok((existing, false))
            } else {
                Err(ReplyError::already_exists(kind, &body.name))
            };
        }
        if let Some(taken) = self
            .registry
            .network_conflict(&body.name, body.vlan_id, &ip.to_string())
        {
            return Err(ReplyError::network_conflict(
                kind,
                format!(
                    "vlan {} / vip {} already used by SVM {}",
                    body.vlan_id, ip, taken.name
                ),
            ));
        }

        let svm = Svm {
            name: body.name.clone(),
            vlan_id: body.vlan_id,
            ip_cidr: body.ip_cidr.clone(),
            vip: ip.to_string(),
            gateway: gateway.to_string(),
            mtu: body.mtu,
            state: SvmState::Creating,
            created_at: Utc::now(),
        };
        self.registry
            .upsert_svm(svm.clone())
            .map_err(Self::persist_error)?;

        match self.bring_up_svm(&svm, body.root_volume_size_bytes).await {
            Ok(()) => {
                let mut ready = svm;
                ready.state = SvmState::Ready;
                self.registry
                    .upsert_svm(ready.clone())
                    .map_err(Self::persist_error)?;
                info!(svm = %ready.name, vip = %ready.vip, "SVM ready");
                Ok((ready, true))
            }
            Err(reply) => {
                let mut degraded = svm;
                degraded.state = SvmState::Degraded;
                let _ = self.registry.upsert_svm(degraded);
                self.spawn_teardown(body.name.clone());
                Err(reply)
            }
        }
    }

    /// Side-effects of SVM creation, in create-then-advertise order.
    async fn bring_up_svm(
        &self,
        svm: &Svm,
        root_volume_size: Option<u64>,
    ) -> Result<(), ReplyError> {
        let kind = ResourceKind::Svm;
        let internal =
            |error: String| ReplyError::internal_error(kind, error, svm.name.clone());

        // The exporter daemon reads its config when the HA group starts it,
        // so the file must exist before the group does.
        self.exporter
            .install(&svm.name, &[])
            .map_err(|e| internal(e.to_string()))?;

        let device = match root_volume_size {
            Some(size) => {
                let lv = Self::svm_lv(&svm.name);
                let lv_path = match self.lvm.create_thin_lv(&lv, size).await {
                    Ok(path) => path,
                    Err(LvmError::LvExists { lv_path }) => lv_path,
                    Err(error) => return Err(internal(error.to_string())),
                };
                self.xfs
                    .format(&lv_path)
                    .await
                    .map_err(|e| internal(e.to_string()))?;
                Some(lv_path)
            }
            None => None,
        };

        let spec = SvmGroupSpec {
            svm: svm.name.clone(),
            device,
            mount_path: self.svm_root(&svm.name),
            vlan_id: svm.vlan_id,
            parent_if: self.config.parent_if.clone(),
            ip: svm.vip.parse().expect("validated vip"),
            prefix: validation::parse_ip_cidr(&svm.ip_cidr)
                .expect("validated cidr")
                .1,
            gateway: svm.gateway.parse().expect("validated gateway"),
            mtu: svm.mtu,
            replicated_resource: self.config.replicated_resource.clone(),
        };
        self.ha
            .ensure_group(&spec)
            .await
            .map_err(|e| internal(e.to_string()))?;

        match self.ha.status(&svm.name).await {
            Ok(GroupStatus::Started) | Ok(GroupStatus::Transitioning) => Ok(()),
            Ok(status) => Err(internal(format!("resource group settled as {status}"))),
            Err(error) => Err(internal(error.to_string())),
        }
    }

    /// Background convergence after a partial SVM creation failure.
    fn spawn_teardown(self: &Arc<Self>, name: String) {
        let service = self.clone();
        tokio::spawn(async move {
            for attempt in 0..TEARDOWN_RETRIES {
                match service.tear_down_svm(&name).await {
                    Ok(()) => {
                        let _ = service.registry.remove_svm(&name);
                        info!(svm = %name, "degraded SVM torn down");
                        return;
                    }
                    Err(err) => {
                        warn!(svm = %name, attempt, %err, "teardown attempt failed");
                        tokio::time::sleep(TEARDOWN_BACKOFF).await;
                    }
                }
            }
            error!(svm = %name, "giving up on SVM teardown, record left degraded");
        });
    }

    /// Reverse of `bring_up_svm`, tolerant of absence at every step.
    async fn tear_down_svm(&self, name: &str) -> Result<(), ReplyError> {
        let internal = |error: String| {
            ReplyError::internal_error(ResourceKind::Svm, error, name.to_string())
        };

        self.ha
            .remove_group(name)
            .await
            .map_err(|e| internal(e.to_string()))?;
        // The group normally stops the daemon; a stray instance must not
        // survive outside it.
        let _ = self
            .runner
            .run("systemctl", &["stop", &format!("arca-exporter@{name}")])
            .await;

        let svm = self.registry.svm(name);
        if let Some(svm) = &svm {
            let netns = NetnsResource::new(self.runner.clone());
            let spec = NetnsSpec {
                ns: name.to_string(),
                vlan_id: svm.vlan_id,
                parent_if: self.config.parent_if.clone(),
                ip: svm.vip.parse().expect("validated vip"),
                prefix: validation::parse_ip_cidr(&svm.ip_cidr)
                    .expect("validated cidr")
                    .1,
                gateway: svm.gateway.parse().expect("validated gateway"),
                mtu: svm.mtu,
            };
            netns.stop(&spec).await.map_err(|e| internal(e.to_string()))?;
        }

        for volume in self.registry.volumes(Some(name)) {
            self.xfs
                .unmount(&volume.path)
                .await
                .map_err(|e| internal(e.to_string()))?;
            self.lvm
                .delete_lv(&Self::volume_lv(name, &volume.name))
                .await
                .map_err(|e| internal(e.to_string()))?;
        }
        self.xfs
            .unmount(&self.svm_root(name))
            .await
            .map_err(|e| internal(e.to_string()))?;
        self.lvm
            .delete_lv(&Self::svm_lv(name))
            .await
            .map_err(|e| internal(e.to_string()))?;

        let _ = std::fs::remove_file(self.exporter.config_path(name));
        Ok(())
    }

    pub(crate) fn get_svm(&self, name: &str) -> Result<Svm, ReplyError> {
        self.registry
            .svm(name)
            .ok_or_else(|| ReplyError::not_found(ResourceKind::Svm, name))
    }

    pub(crate) fn list_svms(&self) -> Vec<Svm> {
        self.registry.svms()
    }

    /// Delete an SVM and everything under it. Absence is success.
    pub(crate) async fn delete_svm(&self, name: &str) -> Result<bool, ReplyError> {
        validation::validate_name(name).map_err(|e| e.for_resource(ResourceKind::Svm))?;
        let _guard = self.locks.lock(&ResourceLocks::svm_key(name)).await;

        let Some(mut svm) = self.registry.svm(name) else {
            return Ok(false);
        };
        svm.state = SvmState::Deleting;
        self.registry
            .upsert_svm(svm)
            .map_err(Self::persist_error)?;

        self.tear_down_svm(name).await?;
        self.registry.remove_svm(name).map_err(Self::persist_error)?;
        info!(svm = %name, "SVM deleted");
        Ok(true)
    }

    /// Capacity of the SVM's backing pool and mounted volumes.
    pub(crate) async fn svm_capacity(&self, name: &str) -> Result<CapacityInfo, ReplyError> {
        let _svm = self.get_svm(name)?;
        let stats = self.lvm.pool_stats().await.map_err(|e| {
            ReplyError::internal_error(ResourceKind::Svm, e.to_string(), name.to_string())
        })?;

        let mut used_bytes = 0;
        let mut mounts = vec![self.svm_root(name)];
        mounts.extend(
            self.registry
                .volumes(Some(name))
                .into_iter()
                .map(|volume| volume.path),
        );
        for mount in mounts {
            if let Ok(usage) = self.xfs.fs_usage(&mount).await {
                used_bytes += usage.used_bytes;
            }
        }

        Ok(CapacityInfo {
            total_bytes: stats.total_bytes,
            available_bytes: stats.available_bytes,
            used_bytes,
        })
    }

    // Volumes

    pub(crate) async fn create_volume(
        &self,
        body: CreateVolumeBody,
    ) -> Result<(Volume, bool), ReplyError> {
        let kind = ResourceKind::Volume;
        validation::validate_name(&body.name).map_err(|e| e.for_resource(kind))?;
        validation::validate_name(&body.svm).map_err(|e| e.for_resource(kind))?;
        validation::validate_size(body.size_bytes).map_err(|e| e.for_resource(kind))?;
        self.ready_svm(&body.svm)?;

        let _guard = self
            .locks
            .lock(&ResourceLocks::volume_key(&body.svm, &body.name))
            .await;

        if let Some(existing) = self.registry.volume(&body.svm, &body.name) {
            return if body.matches(&existing) {
                Ok((existing, false))
            } else {
                Err(ReplyError::already_exists(kind, &body.name))
            };
        }

        let internal = |error: String| {
            ReplyError::internal_error(kind, error, body.name.clone())
        };
        let lv = Self::volume_lv(&body.svm, &body.name);
        let mount = self.volume_mount(&body.svm, &body.name);

        let lv_path = match self.lvm.create_thin_lv(&lv, body.size_bytes).await {
            Ok(path) => path,
            Err(LvmError::LvExists { lv_path }) => lv_path,
            Err(error) => return Err(internal(error.to_string())),
        };
        self.xfs
            .format(&lv_path)
            .await
            .map_err(|e| internal(e.to_string()))?;
        self.xfs
            .mount(&lv_path, &mount)
            .await
            .map_err(|e| internal(e.to_string()))?;

        let volume = Volume {
            name: body.name,
            svm: body.svm,
            size_bytes: body.size_bytes,
            path: mount,
            state: VolumeState::Ready,
            created_at: Utc::now(),
        };
        self.registry
            .upsert_volume(volume.clone())
            .map_err(Self::persist_error)?;
        info!(svm = %volume.svm, volume = %volume.name, "volume created");
        Ok((volume, true))
    }

    /// Grow a volume. Shrinks are refused; equal size short-circuits.
    pub(crate) async fn resize_volume(
        &self,
        svm: &str,
        name: &str,
        size_bytes: u64,
    ) -> Result<Volume, ReplyError> {
        let kind = ResourceKind::Volume;
        validation::validate_size(size_bytes).map_err(|e| e.for_resource(kind))?;
        self.ready_svm(svm)?;

        let _guard = self.locks.lock(&ResourceLocks::volume_key(svm, name)).await;

        let mut volume = self
            .registry
            .volume(svm, name)
            .ok_or_else(|| ReplyError::not_found(kind, name))?;
        if size_bytes < volume.size_bytes {
            return Err(ReplyError::invalid_argument(
                kind,
                "size_bytes",
                format!(
                    "shrink from {} to {} refused",
                    volume.size_bytes, size_bytes
                ),
            ));
        }
        if size_bytes == volume.size_bytes {
            return Ok(volume);
        }

        let internal = |error: String| ReplyError::internal_error(kind, error, name.to_string());
        self.lvm
            .extend_lv(&Self::volume_lv(svm, name), size_bytes)
            .await
            .map_err(|e| internal(e.to_string()))?;
        self.xfs
            .grow(&volume.path)
            .await
            .map_err(|e| internal(e.to_string()))?;

        volume.size_bytes = size_bytes;
        self.registry
            .upsert_volume(volume.clone())
            .map_err(Self::persist_error)?;
        Ok(volume)
    }

    /// Delete a volume and its exports. Absence is success.
    pub(crate) async fn delete_volume(&self, svm: &str, name: &str) -> Result<bool, ReplyError> {
        let kind = ResourceKind::Volume;
        let _guard = self.locks.lock(&ResourceLocks::volume_key(svm, name)).await;

        let Some(volume) = self.registry.volume(svm, name) else {
            return Ok(false);
        };
        let internal = |error: String| ReplyError::internal_error(kind, error, name.to_string());

        // Exports pointing at the volume go first so the daemon stops
        // advertising a path about to disappear.
        let remaining: Vec<Export> = self
            .registry
            .exports(svm)
            .into_iter()
            .filter(|export| export.volume != name)
            .collect();
        if remaining.len() != self.registry.exports(svm).len() {
            let _export_guard = self.locks.lock(&ResourceLocks::exports_key(svm)).await;
            self.exporter
                .apply(svm, &remaining)
                .await
                .map_err(|e| internal(e.to_string()))?;
            for export in self
                .registry
                .exports(svm)
                .iter()
                .filter(|export| export.volume == name)
            {
                self.registry
                    .remove_export(svm, export.export_id)
                    .map_err(Self::persist_error)?;
            }
        }

        self.xfs
            .unmount(&volume.path)
            .await
            .map_err(|e| internal(e.to_string()))?;
        self.lvm
            .delete_lv(&Self::volume_lv(svm, name))
            .await
            .map_err(|e| internal(e.to_string()))?;
        self.registry
            .remove_volume(svm, name)
            .map_err(Self::persist_error)?;
        info!(%svm, volume = %name, "volume deleted");
        Ok(true)
    }

    pub(crate) fn list_volumes(&self, svm: Option<&str>) -> Vec<Volume> {
        self.registry.volumes(svm)
    }

    // Exports

    pub(crate) async fn add_export(
        &self,
        body: CreateExportBody,
    ) -> Result<(Export, bool), ReplyError> {
        let kind = ResourceKind::Export;
        validation::validate_name(&body.svm).map_err(|e| e.for_resource(kind))?;
        validation::validate_name(&body.volume).map_err(|e| e.for_resource(kind))?;
        validation::validate_client_cidr(&body.client_cidr).map_err(|e| e.for_resource(kind))?;
        self.ready_svm(&body.svm)?;
        if self.registry.volume(&body.svm, &body.volume).is_none() {
            return Err(ReplyError::not_found(ResourceKind::Volume, &body.volume));
        }

        let _guard = self.locks.lock(&ResourceLocks::exports_key(&body.svm)).await;

        let exports = self.registry.exports(&body.svm);
        if let Some(existing) = exports
            .iter()
            .find(|export| export.volume == body.volume && export.client_cidr == body.client_cidr)
        {
            let same = existing.access == body.access
                && existing.squash == body.squash
                && existing.sec == body.sec;
            return if same {
                Ok((existing.clone(), false))
            } else {
                Err(ReplyError::already_exists(
                    kind,
                    format!("{}:{}", body.volume, body.client_cidr),
                ))
            };
        }

        let path = self.volume_mount(&body.svm, &body.volume);
        let export = Export {
            export_id: self.registry.next_export_id(&body.svm),
            svm: body.svm.clone(),
            volume: body.volume,
            client_cidr: body.client_cidr,
            access: body.access,
            squash: body.squash,
            sec: body.sec,
            pseudo: path.clone(),
            path,
            created_at: Utc::now(),
        };

        // Render and reload first; the record lands only after the daemon
        // serves the new config.
        let mut next = exports;
        next.push(export.clone());
        self.exporter.apply(&body.svm, &next).await.map_err(|e| {
            ReplyError::internal_error(kind, e.to_string(), body.svm.clone())
        })?;
        self.registry
            .add_export(export.clone())
            .map_err(Self::persist_error)?;
        info!(svm = %export.svm, export_id = export.export_id, "export added");
        Ok((export, true))
    }

    pub(crate) async fn remove_export(&self, svm: &str, export_id: u32) -> Result<bool, ReplyError> {
        let kind = ResourceKind::Export;
        self.ready_svm(svm)?;
        let _guard = self.locks.lock(&ResourceLocks::exports_key(svm)).await;

        let exports = self.registry.exports(svm);
        if !exports.iter().any(|export| export.export_id == export_id) {
            return Ok(false);
        }
        let remaining: Vec<Export> = exports
            .into_iter()
            .filter(|export| export.export_id != export_id)
            .collect();
        self.exporter
            .apply(svm, &remaining)
            .await
            .map_err(|e| ReplyError::internal_error(kind, e.to_string(), svm.to_string()))?;
        self.registry
            .remove_export(svm, export_id)
            .map_err(Self::persist_error)?;
        Ok(true)
    }

    pub(crate) fn list_exports(&self, svm: &str) -> Vec<Export> {
        self.registry.exports(svm)
    }

    // Directories and quotas

    fn allocate_project_id(&self, svm: &str, path: &str) -> Result<u32, ReplyError> {
        if let Some(existing) = self.registry.directory(svm, path) {
            return Ok(existing.project_id);
        }
        let taken = self.registry.project_ids(svm);
        for attempt in 0..PROJECT_ID_ATTEMPTS {
            let id = xfs::project_id_for(svm, path, attempt);
            if !taken.contains(&id) {
                return Ok(id);
            }
        }
        Err(ReplyError::internal_error(
            ResourceKind::Quota,
            "project id space exhausted by collisions".to_string(),
            format!("{svm}:{path}"),
        ))
    }

    pub(crate) async fn create_directory(
        &self,
        body: CreateDirectoryBody,
    ) -> Result<(Directory, bool), ReplyError> {
        let kind = ResourceKind::Directory;
        validation::validate_name(&body.svm_name).map_err(|e| e.for_resource(kind))?;
        validation::validate_relative_path(&body.path).map_err(|e| e.for_resource(kind))?;
        self.ready_svm(&body.svm_name)?;

        let _guard = self
            .locks
            .lock(&ResourceLocks::volume_key(&body.svm_name, &body.path))
            .await;

        if let Some(existing) = self.registry.directory(&body.svm_name, &body.path) {
            let same = body
                .quota_bytes
                .map(|quota| quota == existing.quota_bytes)
                .unwrap_or(true);
            return if same {
                Ok((existing, false))
            } else {
                Err(ReplyError::already_exists(kind, &body.path))
            };
        }

        let internal =
            |error: String| ReplyError::internal_error(kind, error, body.path.clone());
        let fs_root = self.svm_root(&body.svm_name);
        let abs = format!("{fs_root}/{}", body.path);

        self.runner
            .run_checked("mkdir", &["-p", &abs])
            .await
            .map_err(|e| internal(e.to_string()))?;

        let project_id = self.allocate_project_id(&body.svm_name, &body.path)?;
        self.xfs
            .setup_project(&fs_root, &abs, project_id)
            .await
            .map_err(|e| internal(e.to_string()))?;
        if let Some(quota) = body.quota_bytes {
            self.xfs
                .set_project_limit(&fs_root, project_id, quota)
                .await
                .map_err(|e| internal(e.to_string()))?;
        }

        let directory = Directory {
            svm_name: body.svm_name,
            path: body.path,
            quota_bytes: body.quota_bytes.unwrap_or(0),
            project_id,
            used_bytes: 0,
        };
        self.registry
            .upsert_directory(directory.clone())
            .map_err(Self::persist_error)?;
        Ok((directory, true))
    }

    /// Delete a directory and free its project quota slot. Absence is
    /// success.
    pub(crate) async fn delete_directory(&self, svm: &str, path: &str) -> Result<bool, ReplyError> {
        let kind = ResourceKind::Directory;
        validation::validate_relative_path(path).map_err(|e| e.for_resource(kind))?;
        let _guard = self.locks.lock(&ResourceLocks::volume_key(svm, path)).await;

        let record = self.registry.directory(svm, path);
        let fs_root = self.svm_root(svm);
        let abs = format!("{fs_root}/{path}");
        let internal = |error: String| ReplyError::internal_error(kind, error, path.to_string());

        let existed = {
            let probe = self
                .runner
                .run("test", &["-e", &abs])
                .await
                .map_err(|e| internal(e.to_string()))?;
            probe.success
        };
        if existed {
            self.runner
                .run_checked("rm", &["-rf", &abs])
                .await
                .map_err(|e| internal(e.to_string()))?;
        }
        if let Some(record) = &record {
            self.xfs
                .clear_project_limit(&fs_root, record.project_id)
                .await
                .map_err(|e| internal(e.to_string()))?;
            self.registry
                .remove_directory(svm, path)
                .map_err(Self::persist_error)?;
        }
        Ok(existed || record.is_some())
    }

    /// Set the quota of a path, creating the project record when the path was
    /// produced outside `create_directory` (reflink clones).
    pub(crate) async fn set_quota(&self, body: SetQuotaBody) -> Result<QuotaInfo, ReplyError> {
        let kind = ResourceKind::Quota;
        validation::validate_name(&body.svm_name).map_err(|e| e.for_resource(kind))?;
        validation::validate_relative_path(&body.path).map_err(|e| e.for_resource(kind))?;
        self.ready_svm(&body.svm_name)?;

        let _guard = self
            .locks
            .lock(&ResourceLocks::volume_key(&body.svm_name, &body.path))
            .await;

        let internal =
            |error: String| ReplyError::internal_error(kind, error, body.path.clone());
        let fs_root = self.svm_root(&body.svm_name);
        let abs = format!("{fs_root}/{}", body.path);

        self.runner
            .run_checked("mkdir", &["-p", &abs])
            .await
            .map_err(|e| internal(e.to_string()))?;
        let project_id = self.allocate_project_id(&body.svm_name, &body.path)?;
        self.xfs
            .setup_project(&fs_root, &abs, project_id)
            .await
            .map_err(|e| internal(e.to_string()))?;
        self.xfs
            .set_project_limit(&fs_root, project_id, body.quota_bytes)
            .await
            .map_err(|e| internal(e.to_string()))?;

        let directory = Directory {
            svm_name: body.svm_name.clone(),
            path: body.path.clone(),
            quota_bytes: body.quota_bytes,
            project_id,
            used_bytes: 0,
        };
        self.registry
            .upsert_directory(directory)
            .map_err(Self::persist_error)?;

        Ok(QuotaInfo {
            path: body.path,
            quota_bytes: body.quota_bytes,
            used_bytes: 0,
            project_id,
        })
    }

    pub(crate) async fn get_quota(&self, svm: &str, path: &str) -> Result<QuotaInfo, ReplyError> {
        let kind = ResourceKind::Quota;
        let record = self
            .registry
            .directory(svm, path)
            .ok_or_else(|| ReplyError::not_found(kind, path))?;
        let fs_root = self.svm_root(svm);
        let used_bytes = self
            .xfs
            .project_quota(&fs_root, record.project_id)
            .await
            .map(|quota| quota.used_bytes)
            .unwrap_or(0);
        Ok(QuotaInfo {
            path: record.path,
            quota_bytes: record.quota_bytes,
            used_bytes,
            project_id: record.project_id,
        })
    }

    /// Monotonic quota expansion: requests at or below the current quota
    /// succeed without touching the backend.
    pub(crate) async fn expand_quota(&self, body: ExpandQuotaBody) -> Result<QuotaInfo, ReplyError> {
        let kind = ResourceKind::Quota;
        validation::validate_relative_path(&body.path).map_err(|e| e.for_resource(kind))?;
        self.ready_svm(&body.svm_name)?;

        let _guard = self
            .locks
            .lock(&ResourceLocks::volume_key(&body.svm_name, &body.path))
            .await;

        let mut record = self
            .registry
            .directory(&body.svm_name, &body.path)
            .ok_or_else(|| ReplyError::not_found(kind, &body.path))?;
        if body.new_quota_bytes <= record.quota_bytes {
            return Ok(QuotaInfo {
                path: record.path,
                quota_bytes: record.quota_bytes,
                used_bytes: record.used_bytes,
                project_id: record.project_id,
            });
        }

        let fs_root = self.svm_root(&body.svm_name);
        self.xfs
            .set_project_limit(&fs_root, record.project_id, body.new_quota_bytes)
            .await
            .map_err(|e| {
                ReplyError::internal_error(kind, e.to_string(), body.path.clone())
            })?;
        record.quota_bytes = body.new_quota_bytes;
        self.registry
            .upsert_directory(record.clone())
            .map_err(Self::persist_error)?;
        Ok(QuotaInfo {
            path: record.path,
            quota_bytes: record.quota_bytes,
            used_bytes: record.used_bytes,
            project_id: record.project_id,
        })
    }

    // Snapshots

    /// Server-side reflink snapshot, idempotent on `(svm, snapshot_path)`.
    pub(crate) async fn create_snapshot(
        &self,
        body: CreateSnapshotBody,
    ) -> Result<(Snapshot, bool), ReplyError> {
        let kind = ResourceKind::Snapshot;
        validation::validate_name(&body.svm_name).map_err(|e| e.for_resource(kind))?;
        validation::validate_relative_path(&body.source_path).map_err(|e| e.for_resource(kind))?;
        validation::validate_relative_path(&body.snapshot_path)
            .map_err(|e| e.for_resource(kind))?;
        self.ready_svm(&body.svm_name)?;

        let _guard = self
            .locks
            .lock(&ResourceLocks::volume_key(&body.svm_name, &body.snapshot_path))
            .await;

        if let Some(existing) = self.registry.snapshot(&body.svm_name, &body.snapshot_path) {
            return Ok((existing, false));
        }

        let root = self.svm_root(&body.svm_name);
        match self
            .reflink
            .copy(&root, &body.source_path, &body.snapshot_path)
            .await
        {
            Ok(()) => {}
            Err(ReflinkError::SourceMissing { path }) => {
                return Err(ReplyError::not_found(kind, path));
            }
            Err(error) => {
                return Err(ReplyError::internal_error(
                    kind,
                    error.to_string(),
                    body.snapshot_path.clone(),
                ));
            }
        }

        let size_bytes = match self.registry.directory(&body.svm_name, &body.source_path) {
            Some(dir) => dir.quota_bytes,
            None => 0,
        };
        let snapshot = Snapshot {
            svm_name: body.svm_name,
            source_path: body.source_path,
            snapshot_path: body.snapshot_path,
            size_bytes,
            ready_to_use: true,
        };
        self.registry
            .upsert_snapshot(snapshot.clone())
            .map_err(Self::persist_error)?;
        Ok((snapshot, true))
    }

    pub(crate) async fn delete_snapshot(&self, svm: &str, path: &str) -> Result<bool, ReplyError> {
        let kind = ResourceKind::Snapshot;
        validation::validate_relative_path(path).map_err(|e| e.for_resource(kind))?;
        let _guard = self.locks.lock(&ResourceLocks::volume_key(svm, path)).await;

        let record = self.registry.snapshot(svm, path);
        let root = self.svm_root(svm);
        self.reflink
            .remove(&root, path)
            .await
            .map_err(|e| ReplyError::internal_error(kind, e.to_string(), path.to_string()))?;
        if record.is_some() {
            self.registry
                .remove_snapshot(svm, path)
                .map_err(Self::persist_error)?;
        }
        Ok(record.is_some())
    }

    /// Restore: fresh reflink copy of a snapshot at a target path.
    pub(crate) async fn restore_snapshot(
        &self,
        body: RestoreSnapshotBody,
    ) -> Result<(), ReplyError> {
        let kind = ResourceKind::Snapshot;
        validation::validate_relative_path(&body.snapshot_path)
            .map_err(|e| e.for_resource(kind))?;
        validation::validate_relative_path(&body.target_path).map_err(|e| e.for_resource(kind))?;
        self.ready_svm(&body.svm_name)?;

        let _guard = self
            .locks
            .lock(&ResourceLocks::volume_key(&body.svm_name, &body.target_path))
            .await;

        let root = self.svm_root(&body.svm_name);
        match self
            .reflink
            .copy(&root, &body.snapshot_path, &body.target_path)
            .await
        {
            Ok(()) => Ok(()),
            Err(ReflinkError::SourceMissing { path }) => {
                Err(ReplyError::not_found(kind, path))
            }
            Err(error) => Err(ReplyError::internal_error(
                kind,
                error.to_string(),
                body.target_path.clone(),
            )),
        }
    }

    // QoS

    pub(crate) async fn set_qos(
        &self,
        volume: &str,
        svm: &str,
        limits: QosLimits,
    ) -> Result<QosInfo, ReplyError> {
        let kind = ResourceKind::Qos;
        self.ready_svm(svm)?;
        let _guard = self.locks.lock(&ResourceLocks::volume_key(svm, volume)).await;
        if self.registry.volume(svm, volume).is_none() {
            return Err(ReplyError::not_found(ResourceKind::Volume, volume));
        }

        let lv_path = self.lvm.lv_path(&Self::volume_lv(svm, volume));
        let device_id = self
            .qos
            .apply(svm, volume, &lv_path, &limits)
            .await
            .map_err(|e| ReplyError::internal_error(kind, e.to_string(), volume.to_string()))?;
        self.registry
            .upsert_qos(svm, volume, limits.clone())
            .map_err(Self::persist_error)?;
        Ok(QosInfo {
            svm: svm.to_string(),
            volume: volume.to_string(),
            qos_enabled: !limits.is_unlimited(),
            device_id: Some(device_id),
            limits,
        })
    }

    pub(crate) async fn get_qos(&self, volume: &str, svm: &str) -> Result<QosInfo, ReplyError> {
        if self.registry.volume(svm, volume).is_none() {
            return Err(ReplyError::not_found(ResourceKind::Volume, volume));
        }
        let lv_path = self.lvm.lv_path(&Self::volume_lv(svm, volume));
        let current = self
            .qos
            .current(svm, volume, &lv_path)
            .await
            .map_err(|e| {
                ReplyError::internal_error(ResourceKind::Qos, e.to_string(), volume.to_string())
            })?;
        Ok(match current {
            Some((device_id, limits)) => QosInfo {
                svm: svm.to_string(),
                volume: volume.to_string(),
                qos_enabled: !limits.is_unlimited(),
                device_id: Some(device_id),
                limits,
            },
            None => QosInfo {
                svm: svm.to_string(),
                volume: volume.to_string(),
                qos_enabled: false,
                device_id: None,
                limits: QosLimits::default(),
            },
        })
    }

    pub(crate) async fn remove_qos(&self, volume: &str, svm: &str) -> Result<(), ReplyError> {
        self.ready_svm(svm)?;
        let _guard = self.locks.lock(&ResourceLocks::volume_key(svm, volume)).await;
        let lv_path = self.lvm.lv_path(&Self::volume_lv(svm, volume));
        self.qos
            .remove(svm, volume, &lv_path)
            .await
            .map_err(|e| {
                ReplyError::internal_error(ResourceKind::Qos, e.to_string(), volume.to_string())
            })?;
        self.registry
            .remove_qos(svm, volume)
            .map_err(Self::persist_error)?;
        Ok(())
    }
}
