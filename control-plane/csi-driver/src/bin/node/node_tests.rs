use super::*;
use crate::mount::mock::MockMounter;
use csi_driver::csi::node_server::Node;
use std::collections::HashMap;

struct Fixture {
    svc: NodeSvc,
    state: Arc<NodeState>,
    mounter: Arc<MockMounter>,
    dir: tempfile::TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let state = Arc::new(NodeState::load(&dir.path().join("node-volumes.json")));
    let mounter = Arc::new(MockMounter::default());
    let mounts = Arc::new(MountManager::new(
        state.clone(),
        dir.path().join("mounts"),
        mounter.clone(),
    ));
    Fixture {
        svc: NodeSvc::new("node-1".to_string(), state.clone(), mounts),
        state,
        mounter,
        dir,
    }
}

fn volume_context(svm: &str, path: &str) -> HashMap<String, String> {
    HashMap::from([
        ("svm".to_string(), svm.to_string()),
        ("vip".to_string(), "10.0.0.5".to_string()),
        ("volumePath".to_string(), path.to_string()),
    ])
}

fn capability() -> Option<VolumeCapability> {
    Some(VolumeCapability {
        access_type: Some(volume_capability::AccessType::Mount(
            volume_capability::MountVolume::default(),
        )),
        access_mode: Some(volume_capability::AccessMode {
            mode: volume_capability::access_mode::Mode::MultiNodeMultiWriter as i32,
        }),
    })
}

fn stage_request(fx: &Fixture, volume_id: &str, svm: &str) -> NodeStageVolumeRequest {
    NodeStageVolumeRequest {
        volume_id: volume_id.to_string(),
        staging_target_path: fx
            .dir
            .path()
            .join("staging")
            .join(volume_id)
            .to_string_lossy()
            .into_owned(),
        volume_capability: capability(),
        volume_context: volume_context(svm, volume_id),
        ..NodeStageVolumeRequest::default()
    }
}

#[tokio::test]
async fn stage_unstage_leaves_no_mount_and_no_state() {
    let fx = fixture();
    let request = stage_request(&fx, "pvc-1", "svm1");
    let staging_path = request.staging_target_path.clone();

    fx.svc
        .node_stage_volume(tonic::Request::new(request))
        .await
        .unwrap();
    assert!(fx.state.staging("pvc-1").is_some());
    assert!(fx.mounter.mounted.lock().contains(&staging_path));

    fx.svc
        .node_unstage_volume(tonic::Request::new(NodeUnstageVolumeRequest {
            volume_id: "pvc-1".to_string(),
            staging_target_path: staging_path.clone(),
        }))
        .await
        .unwrap();

    assert!(fx.state.staging("pvc-1").is_none());
    // Neither the staging bind mount nor the shared SVM mount survive.
    assert!(fx.mounter.mounted.lock().is_empty());
}

#[tokio::test]
async fn shared_mount_follows_derived_refcount() {
    let fx = fixture();
    for volume in ["pvc-1", "pvc-2", "pvc-3"] {
        fx.svc
            .node_stage_volume(tonic::Request::new(stage_request(&fx, volume, "svm1")))
            .await
            .unwrap();
    }
    // One NFS mount for the three volumes.
    assert_eq!(fx.mounter.nfs_mounts.lock().len(), 1);
    let shared = fx
        .dir
        .path()
        .join("mounts/svm1")
        .to_string_lossy()
        .into_owned();

    for volume in ["pvc-1", "pvc-2"] {
        fx.svc
            .node_unstage_volume(tonic::Request::new(NodeUnstageVolumeRequest {
                volume_id: volume.to_string(),
                staging_target_path: fx
                    .dir
                    .path()
                    .join("staging")
                    .join(volume)
                    .to_string_lossy()
                    .into_owned(),
            }))
            .await
            .unwrap();
        assert!(fx.mounter.mounted.lock().contains(&shared), "{volume}");
    }

    fx.svc
        .node_unstage_volume(tonic::Request::new(NodeUnstageVolumeRequest {
            volume_id: "pvc-3".to_string(),
            staging_target_path: fx
                .dir
                .path()
                .join("staging")
                .join("pvc-3")
                .to_string_lossy()
                .into_owned(),
        }))
        .await
        .unwrap();
    assert!(!fx.mounter.mounted.lock().contains(&shared));
}

#[tokio::test]
async fn publish_unpublish_round_trip() {
    let fx = fixture();
    let stage = stage_request(&fx, "pvc-1", "svm1");
    let staging_path = stage.staging_target_path.clone();
    fx.svc
        .node_stage_volume(tonic::Request::new(stage))
        .await
        .unwrap();

    let target = fx
        .dir
        .path()
        .join("pods/pod-a/volume")
        .to_string_lossy()
        .into_owned();
    fx.svc
        .node_publish_volume(tonic::Request::new(NodePublishVolumeRequest {
            volume_id: "pvc-1".to_string(),
            staging_target_path: staging_path.clone(),
            target_path: target.clone(),
            volume_capability: capability(),
            ..NodePublishVolumeRequest::default()
        }))
        .await
        .unwrap();
    assert_eq!(fx.state.staging("pvc-1").unwrap().published_paths, vec![target.clone()]);

    fx.svc
        .node_unpublish_volume(tonic::Request::new(NodeUnpublishVolumeRequest {
            volume_id: "pvc-1".to_string(),
            target_path: target.clone(),
        }))
        .await
        .unwrap();
    assert!(fx.state.staging("pvc-1").unwrap().published_paths.is_empty());
    assert!(!fx.mounter.mounted.lock().contains(&target));

    // Unpublish of an absent target is success.
    fx.svc
        .node_unpublish_volume(tonic::Request::new(NodeUnpublishVolumeRequest {
            volume_id: "pvc-1".to_string(),
            target_path: target,
        }))
        .await
        .unwrap();
}

#[tokio::test]
async fn stage_is_idempotent_on_mounted_target() {
    let fx = fixture();
    let request = stage_request(&fx, "pvc-1", "svm1");
    fx.svc
        .node_stage_volume(tonic::Request::new(request.clone()))
        .await
        .unwrap();
    let nfs_mounts = fx.mounter.nfs_mounts.lock().len();
    fx.svc
        .node_stage_volume(tonic::Request::new(request))
        .await
        .unwrap();
    assert_eq!(fx.mounter.nfs_mounts.lock().len(), nfs_mounts);
}

#[tokio::test]
async fn stage_rejects_traversal_and_bad_vip() {
    let fx = fixture();
    let mut request = stage_request(&fx, "pvc-1", "svm1");
    request.volume_context.insert("volumePath".to_string(), "../escape".to_string());
    let error = fx
        .svc
        .node_stage_volume(tonic::Request::new(request))
        .await
        .unwrap_err();
    assert_eq!(error.code(), tonic::Code::InvalidArgument);

    let mut request = stage_request(&fx, "pvc-1", "svm1");
    request.volume_context.insert("vip".to_string(), "nope".to_string());
    let error = fx
        .svc
        .node_stage_volume(tonic::Request::new(request))
        .await
        .unwrap_err();
    assert_eq!(error.code(), tonic::Code::InvalidArgument);
}

#[tokio::test]
async fn publish_rolls_back_mount_when_state_persist_fails() {
    let fx = fixture();
    let stage = stage_request(&fx, "pvc-1", "svm1");
    let staging_path = stage.staging_target_path.clone();
    fx.svc
        .node_stage_volume(tonic::Request::new(stage))
        .await
        .unwrap();

    // Remove the volume from state so record_publish has nothing to attach
    // to and fails; the bind mount must be rolled back.
    fx.state.remove_staging("pvc-1").unwrap();

    let target = fx
        .dir
        .path()
        .join("pods/pod-a/volume")
        .to_string_lossy()
        .into_owned();
    let error = fx
        .svc
        .node_publish_volume(tonic::Request::new(NodePublishVolumeRequest {
            volume_id: "pvc-1".to_string(),
            staging_target_path: staging_path,
            target_path: target.clone(),
            volume_capability: capability(),
            ..NodePublishVolumeRequest::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(error.code(), tonic::Code::Internal);
    assert!(!fx.mounter.mounted.lock().contains(&target));
}
