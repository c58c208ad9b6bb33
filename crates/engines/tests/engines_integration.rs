//! 엔진 + 코디네이터 통합 테스트
//!
//! - 코디네이터를 통한 생성/갱신/일괄 작업이 실제 엔진 배포로 이어지는지
//! - 무결성 검사의 대칭 차집합
//! - 커뮤니티 동기화 후 로컬 배포 상태

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rulekeeper_core::config::{ElastAlertConfig, StrelkaConfig};
use rulekeeper_core::engine::{DetectionEngine, RequestContext};
use rulekeeper_core::error::EngineError;
use rulekeeper_core::event::{SyncNotifier, SyncOutcome};
use rulekeeper_core::registry::EngineRegistry;
use rulekeeper_core::store::{AllowAll, DEFAULT_TEMPLATE_NAME, DetectionStore, MemoryDetectionStore};
use rulekeeper_core::types::{CompilationReport, Detection, EngineKind, User};
use rulekeeper_engines::{
    BulkAction, DetectionCoordinator, ElastAlertEngine, EngineContext, MockCommandRunner,
    StaticPackageFetcher, StrelkaEngine,
};

struct Harness {
    dir: tempfile::TempDir,
    store: Arc<MemoryDetectionStore>,
    strelka: Arc<StrelkaEngine<MockCommandRunner>>,
    elastalert: Arc<ElastAlertEngine<MockCommandRunner, StaticPackageFetcher>>,
    coordinator: DetectionCoordinator,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        let store = Arc::new(MemoryDetectionStore::new());
        let context = EngineContext::new(store.clone(), SyncNotifier::new(), DEFAULT_TEMPLATE_NAME);

        let strelka_config = StrelkaConfig {
            repos: Vec::new(),
            rules_folder: base.join("yara").display().to_string(),
            repos_folder: base.join("repos").display().to_string(),
            state_file: base.join("strelka.state").display().to_string(),
            compilation_report_path: base.join("strelka.json").display().to_string(),
            compiled_rules_path: String::new(),
            ..StrelkaConfig::default()
        };
        let strelka = Arc::new(
            StrelkaEngine::with_runner(strelka_config, context.clone(), MockCommandRunner::new())
                .unwrap(),
        );

        let elastalert_config = ElastAlertConfig {
            sigma_packages: Vec::new(),
            rules_folder: base.join("elastalert").display().to_string(),
            state_file: base.join("elastalert.state").display().to_string(),
            compilation_report_path: base.join("elastalert.json").display().to_string(),
            ..ElastAlertConfig::default()
        };
        let elastalert = Arc::new(
            ElastAlertEngine::with_parts(
                elastalert_config,
                context,
                MockCommandRunner::new().with_response("convert", "process where true", 0),
                StaticPackageFetcher::new(),
            )
            .unwrap(),
        );

        let mut registry = EngineRegistry::new();
        registry.register(strelka.clone()).unwrap();
        registry.register(elastalert.clone()).unwrap();

        let coordinator = DetectionCoordinator::new(registry, store.clone(), Arc::new(AllowAll));
        Self {
            dir,
            store,
            strelka,
            elastalert,
            coordinator,
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }
}

fn ctx() -> RequestContext {
    RequestContext::new(User {
        id: "analyst".to_owned(),
        email: "analyst@example.com".to_owned(),
        first_name: String::new(),
        last_name: String::new(),
    })
}

fn yara(content: &str) -> Detection {
    let mut det = Detection::new(EngineKind::Strelka);
    det.content = content.to_owned();
    det.is_enabled = true;
    det
}

fn sigma(id: &str) -> Detection {
    let mut det = Detection::new(EngineKind::ElastAlert);
    det.content = format!(
        "title: Sigma {id}\nid: {id}\nlogsource:\n    product: windows\ndetection:\n    sel:\n        Image: a.exe\n    condition: sel\nlevel: low\n"
    );
    det.is_enabled = true;
    det
}

fn write_report(path: &Path, success: &[&str]) {
    let report = CompilationReport {
        timestamp: "2024-01-01T00:00:00Z".to_owned(),
        success: success.iter().map(|s| (*s).to_owned()).collect(),
        failure: Vec::new(),
        compiled_rules_hash: String::new(),
    };
    std::fs::write(path, serde_json::to_string(&report).unwrap()).unwrap();
}

#[tokio::test]
async fn created_detections_are_deployed_by_their_engine() {
    let h = Harness::new();

    let saved = h
        .coordinator
        .create_detection(&ctx(), yara("rule Local { condition: true }"))
        .await
        .unwrap();
    assert_eq!(saved.detection.public_id, "Local");
    assert_eq!(saved.detection.author, "analyst@example.com");
    assert!(h.path("yara/Local.yar").exists());
    assert_eq!(h.strelka.runner().count_calls("python3"), 1);

    let saved = h
        .coordinator
        .create_detection(&ctx(), sigma("7d8f0e1a-0000-4000-8000-000000000001"))
        .await
        .unwrap();
    assert!(saved.errors.is_empty());
    assert!(h.path("elastalert/7d8f0e1a-0000-4000-8000-000000000001.yml").exists());
    assert_eq!(h.elastalert.runner().count_calls("convert"), 1);
    assert_eq!(h.strelka.runner().count_calls("python3"), 1);
}

#[tokio::test]
async fn duplicate_public_id_is_a_conflict() {
    let h = Harness::new();
    h.coordinator
        .create_detection(&ctx(), yara("rule Twin { condition: true }"))
        .await
        .unwrap();

    let err = h
        .coordinator
        .create_detection(&ctx(), yara("rule Twin { condition: false }"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::PublicIdExists { ref public_id } if public_id == "Twin"));
}

#[tokio::test]
async fn bulk_disable_removes_deployed_rule_files() {
    let h = Harness::new();
    let a = h
        .coordinator
        .create_detection(&ctx(), sigma("aaaaaaaa-0000-4000-8000-000000000001"))
        .await
        .unwrap()
        .detection;
    let b = h
        .coordinator
        .create_detection(&ctx(), sigma("bbbbbbbb-0000-4000-8000-000000000002"))
        .await
        .unwrap()
        .detection;

    let report = h
        .coordinator
        .bulk_update(&ctx(), &[a.id.clone(), b.id.clone()], BulkAction::Disable)
        .await
        .unwrap();

    assert_eq!(report.modified, 2);
    assert!(report.errors.is_empty());
    assert!(!h.path("elastalert/aaaaaaaa-0000-4000-8000-000000000001.yml").exists());
    assert!(!h.path("elastalert/bbbbbbbb-0000-4000-8000-000000000002.yml").exists());
}

#[tokio::test]
async fn integrity_check_reports_symmetric_difference() {
    let h = Harness::new();
    for id in ["B", "C", "D"] {
        let mut det = sigma(id);
        det.public_id = id.to_owned();
        h.store.create_detection(det).await.unwrap();
    }
    write_report(&h.path("elastalert.json"), &["A", "B", "C"]);

    let err = h.elastalert.integrity_check(false).await.unwrap_err();
    match err {
        EngineError::IntegrityDrift {
            deployed_not_enabled,
            enabled_not_deployed,
        } => {
            assert_eq!(deployed_not_enabled, vec!["A".to_owned()]);
            assert_eq!(enabled_not_deployed, vec!["D".to_owned()]);
        }
        other => panic!("unexpected error: {other}"),
    }

    write_report(&h.path("elastalert.json"), &["B", "C", "D"]);
    h.elastalert.integrity_check(false).await.unwrap();
}

#[tokio::test]
async fn missing_report_fails_integrity_check() {
    let h = Harness::new();
    let err = h.strelka.integrity_check(false).await.unwrap_err();
    assert!(matches!(err, EngineError::IntegrityCheckFailed(_)));
}

#[tokio::test]
async fn sync_engine_detections_rejects_unregistered_engine() {
    let h = Harness::new();
    h.coordinator
        .sync_engine_detections(&ctx(), "all", false)
        .unwrap();
    assert!(matches!(
        h.coordinator.sync_engine_detections(&ctx(), "suricata", true),
        Err(EngineError::UnsupportedEngine(_))
    ));
}

#[tokio::test]
async fn empty_package_list_cycle_succeeds() {
    let h = Harness::new();
    let report = h.elastalert.sync_community(true).await.unwrap();
    assert!(!report.skipped);
    assert_eq!(report.created, 0);
    assert_eq!(report.status(), SyncOutcome::Success);
    assert!(h.path("elastalert.state").exists());
}
