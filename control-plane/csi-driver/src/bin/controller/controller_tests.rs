use super::*;
use crate::{
    allocator::StandaloneAllocator,
    lock::memory::MemoryLockManager,
    store::memory::MemoryStore,
};
use async_trait::async_trait;
use csi_driver::config::PoolConfig;
use csi_driver::csi::controller_server::Controller;
use parking_lot::Mutex;
use std::collections::HashMap;
use stor_port::types::v0::{CreateSvmBody, QuotaInfo, SvmState};

/// REST double: keeps an SVM table and records every data-path call.
#[derive(Default)]
struct FakeApi {
    svms: Mutex<HashMap<String, Svm>>,
    calls: Mutex<Vec<String>>,
}

impl FakeApi {
    fn with_svm(self, name: &str, vip: &str) -> Self {
        self.svms.lock().insert(
            name.to_string(),
            Svm {
                name: name.to_string(),
                vlan_id: 100,
                ip_cidr: format!("{vip}/24"),
                vip: vip.to_string(),
                gateway: "192.168.100.1".to_string(),
                mtu: 1500,
                state: SvmState::Ready,
                created_at: Utc::now(),
            },
        );
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn count(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| call.contains(needle))
            .count()
    }
}

#[async_trait]
impl ArcaApi for FakeApi {
    async fn get_svm(&self, name: &str) -> Result<Svm, ApiClientError> {
        self.svms
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| ApiClientError::ResourceNotExists(name.to_string()))
    }
    async fn list_svms(&self) -> Result<Vec<Svm>, ApiClientError> {
        Ok(self.svms.lock().values().cloned().collect())
    }
    async fn create_svm(&self, body: &CreateSvmBody) -> Result<Svm, ApiClientError> {
        self.calls.lock().push(format!("create_svm {}", body.name));
        let vip = body.ip_cidr.split('/').next().unwrap().to_string();
        let svm = Svm {
            name: body.name.clone(),
            vlan_id: body.vlan_id,
            ip_cidr: body.ip_cidr.clone(),
            vip,
            gateway: body.gateway.clone().unwrap_or_default(),
            mtu: body.mtu,
            state: SvmState::Ready,
            created_at: Utc::now(),
        };
        self.svms.lock().insert(svm.name.clone(), svm.clone());
        Ok(svm)
    }
    async fn create_directory(&self, body: &CreateDirectoryBody) -> Result<(), ApiClientError> {
        self.calls
            .lock()
            .push(format!("create_directory {} {}", body.svm_name, body.path));
        Ok(())
    }
    async fn delete_directory(&self, svm: &str, path: &str) -> Result<(), ApiClientError> {
        self.calls.lock().push(format!("delete_directory {svm} {path}"));
        Ok(())
    }
    async fn create_snapshot(&self, body: &CreateSnapshotBody) -> Result<(), ApiClientError> {
        self.calls.lock().push(format!(
            "create_snapshot {} {} {}",
            body.svm_name, body.source_path, body.snapshot_path
        ));
        Ok(())
    }
    async fn delete_snapshot(&self, svm: &str, path: &str) -> Result<(), ApiClientError> {
        self.calls.lock().push(format!("delete_snapshot {svm} {path}"));
        Ok(())
    }
    async fn set_quota(&self, body: &SetQuotaBody) -> Result<(), ApiClientError> {
        self.calls.lock().push(format!(
            "set_quota {} {} {}",
            body.svm_name, body.path, body.quota_bytes
        ));
        Ok(())
    }
    async fn get_quota(&self, _svm: &str, path: &str) -> Result<QuotaInfo, ApiClientError> {
        Ok(QuotaInfo {
            path: path.to_string(),
            quota_bytes: 0,
            used_bytes: 0,
            project_id: 1,
        })
    }
}

struct Fixture {
    svc: CsiControllerSvc,
    api: Arc<FakeApi>,
    store: Arc<MemoryStore>,
}

fn fixture(api: FakeApi) -> Fixture {
    let api = Arc::new(api);
    let store = Arc::new(MemoryStore::new());
    let allocator = StandaloneAllocator::new(
        &[PoolConfig {
            cidr: "192.168.100.0/24".to_string(),
            range: None,
            vlan: 100,
            gateway: "192.168.100.1".to_string(),
        }],
        api.clone(),
    )
    .unwrap();
    let svms = SvmManager::new(
        api.clone(),
        allocator,
        Arc::new(MemoryLockManager::default()),
        None,
    );
    Fixture {
        svc: CsiControllerSvc::new(store.clone(), api.clone(), svms),
        api,
        store,
    }
}

fn mount_capability() -> VolumeCapability {
    VolumeCapability {
        access_type: Some(volume_capability::AccessType::Mount(
            volume_capability::MountVolume::default(),
        )),
        access_mode: Some(volume_capability::AccessMode {
            mode: volume_capability::access_mode::Mode::MultiNodeMultiWriter as i32,
        }),
    }
}

fn create_request(name: &str, capacity: u64) -> CreateVolumeRequest {
    CreateVolumeRequest {
        name: name.to_string(),
        capacity_range: Some(CapacityRange {
            required_bytes: capacity as i64,
            limit_bytes: 0,
        }),
        volume_capabilities: vec![mount_capability()],
        parameters: HashMap::from([(
            "csi.storage.k8s.io/pvc/namespace".to_string(),
            "default".to_string(),
        )]),
        ..CreateVolumeRequest::default()
    }
}

fn seeded_volume(volume_id: &str, svm: &str, vip: &str, capacity: u64) -> VolumeRecord {
    VolumeRecord {
        volume_id: volume_id.to_string(),
        name: volume_id.to_string(),
        svm_name: svm.to_string(),
        vip: vip.to_string(),
        path: volume_id.to_string(),
        capacity_bytes: capacity,
        created_at: Utc::now(),
        content_source: None,
    }
}

#[tokio::test]
async fn create_volume_provisions_directory_and_quota() {
    let fx = fixture(FakeApi::default());
    let response = fx
        .svc
        .create_volume(Request::new(create_request("my-pvc", 1 << 30)))
        .await
        .unwrap()
        .into_inner();

    let volume = response.volume.unwrap();
    assert_eq!(volume.volume_id, ids::volume_id("my-pvc"));
    assert_eq!(volume.volume_context["svm"], "k8s-default");
    assert_eq!(volume.volume_context["volumePath"], volume.volume_id);

    let calls = fx.api.calls();
    assert!(calls.iter().any(|call| call.starts_with("create_svm k8s-default")));
    assert_eq!(fx.api.count("create_directory"), 1);
    assert_eq!(fx.api.count(&format!("set_quota k8s-default {}", volume.volume_id)), 1);
}

#[tokio::test]
async fn create_volume_is_idempotent_and_detects_mismatch() {
    let fx = fixture(FakeApi::default());
    let first = fx
        .svc
        .create_volume(Request::new(create_request("my-pvc", 1 << 30)))
        .await
        .unwrap()
        .into_inner();

    // Identical request: same identity, no extra side-effects.
    let calls_before = fx.api.calls().len();
    let second = fx
        .svc
        .create_volume(Request::new(create_request("my-pvc", 1 << 30)))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(
        first.volume.unwrap().volume_id,
        second.volume.unwrap().volume_id
    );
    assert_eq!(fx.api.calls().len(), calls_before);

    // Different capacity on the same name.
    let error = fx
        .svc
        .create_volume(Request::new(create_request("my-pvc", 2 << 30)))
        .await
        .unwrap_err();
    assert_eq!(error.code(), tonic::Code::AlreadyExists);
}

#[tokio::test]
async fn clone_lands_on_the_source_volumes_svm() {
    let fx = fixture(FakeApi::default().with_svm("k8s-default", "192.168.100.2"));
    fx.store
        .create_volume(&seeded_volume(
            "pvc-1111111111111111",
            "k8s-default",
            "192.168.100.2",
            1 << 30,
        ))
        .await
        .unwrap();

    let mut request = create_request("foo", 1 << 30);
    request.volume_content_source = Some(VolumeContentSource {
        r#type: Some(volume_content_source::Type::Volume(
            volume_content_source::VolumeSource {
                volume_id: "pvc-1111111111111111".to_string(),
            },
        )),
    });

    let response = fx
        .svc
        .create_volume(Request::new(request))
        .await
        .unwrap()
        .into_inner();
    let volume = response.volume.unwrap();
    let expected_id = ids::volume_id("foo");
    assert_eq!(volume.volume_id, expected_id);

    let record = fx.store.get_volume(&expected_id).await.unwrap();
    assert_eq!(record.svm_name, "k8s-default");
    assert_eq!(record.path, expected_id);

    // Exactly one reflink, then the quota.
    assert_eq!(
        fx.api.count(&format!(
            "create_snapshot k8s-default pvc-1111111111111111 {expected_id}"
        )),
        1
    );
    assert_eq!(fx.api.count("set_quota"), 1);
    // No fresh directory and no new SVM for a clone.
    assert_eq!(fx.api.count("create_directory"), 0);
    assert_eq!(fx.api.count("create_svm"), 0);
}

#[tokio::test]
async fn snapshot_create_is_idempotent_and_ends_ready() {
    let fx = fixture(FakeApi::default().with_svm("k8s-default", "192.168.100.2"));
    fx.store
        .create_volume(&seeded_volume(
            "pvc-aaaaaaaaaaaaaaaa",
            "k8s-default",
            "192.168.100.2",
            1 << 30,
        ))
        .await
        .unwrap();

    let request = CreateSnapshotRequest {
        source_volume_id: "pvc-aaaaaaaaaaaaaaaa".to_string(),
        name: "snap1".to_string(),
        ..CreateSnapshotRequest::default()
    };
    let expected_id = ids::snapshot_id("pvc-aaaaaaaaaaaaaaaa", "snap1");

    let first = fx
        .svc
        .create_snapshot(Request::new(request.clone()))
        .await
        .unwrap()
        .into_inner()
        .snapshot
        .unwrap();
    assert_eq!(first.snapshot_id, expected_id);
    assert!(first.ready_to_use);

    let second = fx
        .svc
        .create_snapshot(Request::new(request))
        .await
        .unwrap()
        .into_inner()
        .snapshot
        .unwrap();
    assert_eq!(second.snapshot_id, expected_id);
    assert!(second.ready_to_use);

    // The REST reflink happened exactly once; the second call short-circuits.
    assert_eq!(
        fx.api.count(&format!(
            "create_snapshot k8s-default pvc-aaaaaaaaaaaaaaaa .snapshots/{expected_id}"
        )),
        1
    );
}

#[tokio::test]
async fn expand_short_circuits_at_or_below_current_capacity() {
    let fx = fixture(FakeApi::default().with_svm("k8s-default", "192.168.100.2"));
    fx.store
        .create_volume(&seeded_volume(
            "pvc-1111111111111111",
            "k8s-default",
            "192.168.100.2",
            2 << 30,
        ))
        .await
        .unwrap();

    let expand = |capacity: i64| {
        Request::new(ControllerExpandVolumeRequest {
            volume_id: "pvc-1111111111111111".to_string(),
            capacity_range: Some(CapacityRange {
                required_bytes: capacity,
                limit_bytes: 0,
            }),
            ..ControllerExpandVolumeRequest::default()
        })
    };

    // Smaller than current: success, no backend call.
    let response = fx
        .svc
        .controller_expand_volume(expand(1 << 30))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.capacity_bytes, 2 << 30);
    assert!(!response.node_expansion_required);
    assert_eq!(fx.api.count("set_quota"), 0);

    // Larger: quota grows and the record follows.
    let response = fx
        .svc
        .controller_expand_volume(expand(4 << 30))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(response.capacity_bytes, 4 << 30);
    assert_eq!(fx.api.count("set_quota k8s-default pvc-1111111111111111"), 1);
    let record = fx.store.get_volume("pvc-1111111111111111").await.unwrap();
    assert_eq!(record.capacity_bytes, 4 << 30);
}

#[tokio::test]
async fn delete_volume_is_idempotent() {
    let fx = fixture(FakeApi::default().with_svm("k8s-default", "192.168.100.2"));
    fx.store
        .create_volume(&seeded_volume(
            "pvc-1111111111111111",
            "k8s-default",
            "192.168.100.2",
            1 << 30,
        ))
        .await
        .unwrap();

    let request = || {
        Request::new(DeleteVolumeRequest {
            volume_id: "pvc-1111111111111111".to_string(),
            ..DeleteVolumeRequest::default()
        })
    };
    fx.svc.delete_volume(request()).await.unwrap();
    assert_eq!(fx.api.count("delete_directory k8s-default pvc-1111111111111111"), 1);
    // Second delete: success without another REST call.
    fx.svc.delete_volume(request()).await.unwrap();
    assert_eq!(fx.api.count("delete_directory"), 1);
}

#[tokio::test]
async fn block_access_is_rejected() {
    let fx = fixture(FakeApi::default());
    let mut request = create_request("blocky", 1 << 30);
    request.volume_capabilities = vec![VolumeCapability {
        access_type: Some(volume_capability::AccessType::Block(
            volume_capability::BlockVolume::default(),
        )),
        access_mode: Some(volume_capability::AccessMode {
            mode: volume_capability::access_mode::Mode::SingleNodeWriter as i32,
        }),
    }];
    let error = fx
        .svc
        .create_volume(Request::new(request))
        .await
        .unwrap_err();
    assert_eq!(error.code(), tonic::Code::InvalidArgument);
}
