//! Service-level tests running the actix app against recording doubles for
//! the host runner and the HA resource host.

use crate::core::{CoreService, ServiceConfig};
use crate::v1;
use actix_web::{test, web, App};
use agents::{
    ha::{GroupStatus, HaError, ResourceHost, SvmGroupSpec},
    runner::FakeRunner,
};
use async_trait::async_trait;
use std::sync::Arc;
use stor_port::types::v0::{RestJson, Svm};
use tempfile::TempDir;

/// Resource host double: records group operations, always converges.
#[derive(Default)]
struct FakeHost {
    groups: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl ResourceHost for FakeHost {
    async fn ensure_group(&self, spec: &SvmGroupSpec) -> Result<(), HaError> {
        self.groups.lock().push(spec.group_name());
        Ok(())
    }
    async fn remove_group(&self, svm: &str) -> Result<(), HaError> {
        self.groups.lock().retain(|group| group != &format!("g_svm_{svm}"));
        Ok(())
    }
    async fn move_group(&self, _svm: &str, _target_node: &str) -> Result<(), HaError> {
        Ok(())
    }
    async fn status(&self, svm: &str) -> Result<GroupStatus, HaError> {
        let up = self
            .groups
            .lock()
            .contains(&format!("g_svm_{svm}"));
        Ok(if up {
            GroupStatus::Started
        } else {
            GroupStatus::Stopped
        })
    }
}

struct Harness {
    service: Arc<CoreService>,
    runner: Arc<FakeRunner>,
    _dirs: TempDir,
}

fn harness() -> Harness {
    crate::authentication::init(None);
    let dirs = tempfile::tempdir().unwrap();
    let runner = Arc::new(FakeRunner::new());
    // Nothing is mounted and no LV exists until created.
    runner.respond("lvdisplay", false, "", "not found");
    runner.respond("mountpoint", false, "", "");
    runner.respond("blkid", false, "", "");
    runner.respond("test -e", false, "", "");
    runner.respond("lvs", true, "  107374182400 10.00\n", "");
    let config = ServiceConfig {
        state_dir: dirs.path().join("state"),
        exporter_config_dir: dirs.path().join("ganesha"),
        export_root: dirs.path().join("exports").to_string_lossy().into_owned(),
        ..ServiceConfig::default()
    };
    let service = CoreService::new(config, runner.clone(), Arc::new(FakeHost::default()));
    Harness {
        service,
        runner,
        _dirs: dirs,
    }
}

fn svm_body(name: &str) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "vlan_id": 100,
        "ip_cidr": "192.168.10.5/24",
    })
}

#[actix_web::test]
async fn svm_create_derives_vip_and_gateway_then_lists() {
    let harness = harness();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .configure(v1::configure),
    )
    .await;

    let request = test::TestRequest::post()
        .uri("/v1/svms")
        .set_json(svm_body("tenant_a"))
        .to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 201);
    let body: RestJson<Svm> = test::read_body_json(response).await;
    let svm = body.data.unwrap();
    assert_eq!(svm.vip, "192.168.10.5");
    assert_eq!(svm.gateway, "192.168.10.1");
    assert_eq!(svm.state.to_string(), "ready");

    let request = test::TestRequest::get().uri("/v1/svms").to_request();
    let response = test::call_service(&app, request).await;
    assert_eq!(response.status(), 200);
    let body: RestJson<Vec<Svm>> = test::read_body_json(response).await;
    assert!(body.data.unwrap().iter().any(|svm| svm.name == "tenant_a"));
}

#[actix_web::test]
async fn svm_create_is_idempotent_and_conflicts_are_kinded() {
    let harness = harness();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .configure(v1::configure),
    )
    .await;

    let first = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/v1/svms")
            .set_json(svm_body("tenant_a"))
            .to_request(),
    )
    .await;
    assert_eq!(first.status(), 201);

    // Identical parameters re-affirm.
    let again = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/v1/svms")
            .set_json(svm_body("tenant_a"))
            .to_request(),
    )
    .await;
    assert_eq!(again.status(), 200);

    // Same name, different parameters.
    let mut different = svm_body("tenant_a");
    different["vlan_id"] = serde_json::json!(200);
    different["ip_cidr"] = serde_json::json!("192.168.20.5/24");
    let conflict = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/v1/svms")
            .set_json(different)
            .to_request(),
    )
    .await;
    assert_eq!(conflict.status(), 409);
    let body: RestJson<()> = test::read_body_json(conflict).await;
    assert_eq!(body.error.as_deref(), Some("AlreadyExists"));

    // Different name, colliding vlan.
    let network = test::call_service(
        &app,
        test::TestRequest::post()
            .uri("/v1/svms")
            .set_json(svm_body("tenant_b"))
            .to_request(),
    )
    .await;
    assert_eq!(network.status(), 409);
    let body: RestJson<()> = test::read_body_json(network).await;
    assert_eq!(body.error.as_deref(), Some("NetworkConflict"));
}

#[actix_web::test]
async fn vlan_bounds_are_enforced_at_the_edge() {
    let harness = harness();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(harness.service.clone()))
            .configure(v1::configure),
    )
    .await;

    for (vlan, expected) in [(0u16, 400u16), (1, 201), (4094, 201), (4095, 400)] {
        let mut body = svm_body(&format!("tenant-{vlan}"));
        body["vlan_id"] = serde_json::json!(vlan);
        body["ip_cidr"] = serde_json::json!(format!("192.168.{}.5/24", (vlan % 200) + 1));
        let response = test::call_service(
            &app,
            test::TestRequest::post()
                .uri("/v1/svms")
                .set_json(body)
                .to_request(),
        )
        .await;
        assert_eq!(response.status(), expected, "vlan {vlan}");
    }
}

#[actix_web::test]
async fn delete_is_idempotent() {
    let harness = harness();
    let (_, created) = harness
        .service
        .create_svm(serde_json::from_value(svm_body("tenant_a")).unwrap())
        .await
        .unwrap();
    assert!(created);

    assert!(harness.service.delete_svm("tenant_a").await.unwrap());
    assert!(!harness.service.delete_svm("tenant_a").await.unwrap());
}

#[actix_web::test]
async fn volume_shrink_is_refused_and_equal_size_short_circuits() {
    let harness = harness();
    harness
        .service
        .create_svm(serde_json::from_value(svm_body("tenant_a")).unwrap())
        .await
        .unwrap();
    let (volume, _) = harness
        .service
        .create_volume(serde_json::from_value(serde_json::json!({
            "svm": "tenant_a", "name": "vol1", "size_bytes": 2147483648u64
        })).unwrap())
        .await
        .unwrap();
    assert_eq!(volume.size_bytes, 2147483648);

    let shrink = harness
        .service
        .resize_volume("tenant_a", "vol1", 1073741824)
        .await;
    assert!(shrink.is_err());

    // Equal size: no lvextend issued.
    let calls_before = harness.runner.calls().len();
    harness
        .service
        .resize_volume("tenant_a", "vol1", 2147483648)
        .await
        .unwrap();
    assert_eq!(harness.runner.calls().len(), calls_before);
}

#[actix_web::test]
async fn export_add_renders_config_and_reloads() {
    let harness = harness();
    harness
        .service
        .create_svm(serde_json::from_value(svm_body("tenant_a")).unwrap())
        .await
        .unwrap();
    harness
        .service
        .create_volume(serde_json::from_value(serde_json::json!({
            "svm": "tenant_a", "name": "vol1", "size_bytes": 1073741824u64
        })).unwrap())
        .await
        .unwrap();

    let (export, created) = harness
        .service
        .add_export(serde_json::from_value(serde_json::json!({
            "svm": "tenant_a", "volume": "vol1", "client_cidr": "10.0.0.0/24"
        })).unwrap())
        .await
        .unwrap();
    assert!(created);
    assert_eq!(export.export_id, 1);
    assert!(harness.runner.ran("systemctl reload arca-exporter@tenant_a"));

    // Same request re-affirms without a new id.
    let (again, created) = harness
        .service
        .add_export(serde_json::from_value(serde_json::json!({
            "svm": "tenant_a", "volume": "vol1", "client_cidr": "10.0.0.0/24"
        })).unwrap())
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.export_id, 1);

    // Different access on the same natural key is a parameter mismatch.
    let mismatch = harness
        .service
        .add_export(serde_json::from_value(serde_json::json!({
            "svm": "tenant_a", "volume": "vol1", "client_cidr": "10.0.0.0/24",
            "access": "ro"
        })).unwrap())
        .await;
    assert!(mismatch.is_err());
}

#[actix_web::test]
async fn restore_of_missing_snapshot_is_not_found() {
    let harness = harness();
    harness
        .service
        .create_svm(serde_json::from_value(svm_body("tenant_a")).unwrap())
        .await
        .unwrap();

    let error = harness
        .service
        .restore_snapshot(serde_json::from_value(serde_json::json!({
            "svm_name": "tenant_a",
            "snapshot_path": ".snapshots/nope",
            "target_path": "pvc-restored"
        })).unwrap())
        .await
        .unwrap_err();
    assert_eq!(error.kind, stor_port::ReplyErrorKind::NotFound);
}

#[actix_web::test]
async fn snapshot_create_is_idempotent_on_path() {
    let harness = harness();
    harness
        .service
        .create_svm(serde_json::from_value(svm_body("tenant_a")).unwrap())
        .await
        .unwrap();
    // Source exists on disk, destination appears after the first copy.
    harness.runner.respond("test -e", false, "", "");
    let root = harness.service.list_svms()[0].name.clone();
    assert_eq!(root, "tenant_a");
    harness
        .runner
        .respond(&format!("test -e {}", harness.exports_path("tenant_a/src")), true, "", "");

    let (first, created) = harness
        .service
        .create_snapshot(serde_json::from_value(serde_json::json!({
            "svm_name": "tenant_a", "source_path": "src", "snapshot_path": ".snapshots/s1"
        })).unwrap())
        .await
        .unwrap();
    assert!(created);
    assert!(first.ready_to_use);

    let (_, created) = harness
        .service
        .create_snapshot(serde_json::from_value(serde_json::json!({
            "svm_name": "tenant_a", "source_path": "src", "snapshot_path": ".snapshots/s1"
        })).unwrap())
        .await
        .unwrap();
    assert!(!created);
}

impl Harness {
    fn exports_path(&self, tail: &str) -> String {
        format!(
            "{}/{}",
            self._dirs.path().join("exports").to_string_lossy(),
            tail
        )
    }
}
