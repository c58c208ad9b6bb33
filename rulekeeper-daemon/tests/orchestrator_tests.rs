//! Orchestrator integration tests.
//!
//! Tests the flow: config -> store wiring -> engine registration -> health.

use std::path::Path;

use rulekeeper_core::config::RulekeeperConfig;
use rulekeeper_core::pipeline::HealthStatus;
use rulekeeper_core::types::EngineKind;
use rulekeeper_daemon::orchestrator::Orchestrator;

/// Config with every engine disabled and all paths inside `dir`.
fn test_config(dir: &Path) -> RulekeeperConfig {
    let mut config = RulekeeperConfig::default();
    config.general.pid_file = String::new();
    config.general.data_dir = dir.display().to_string();
    config.store.path = dir.join("detections.json").display().to_string();
    config.store.settings_path = dir.join("settings.json").display().to_string();
    config.strelka.enabled = false;
    config.suricata.enabled = false;
    config.elastalert.enabled = false;
    config
}

#[tokio::test]
async fn builds_without_engines() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::build_from_config(test_config(dir.path()))
        .await
        .unwrap();

    assert!(orchestrator.engine_kinds().is_empty());
    let health = orchestrator.health().await;
    assert!(health.status.is_healthy());
    assert_eq!(health.engines.len(), 3);
    assert!(health.engines.iter().all(|e| !e.enabled));
}

#[tokio::test]
async fn registers_enabled_engines_in_startup_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.elastalert.enabled = true;
    config.elastalert.rules_folder = dir.path().join("elastalert").display().to_string();
    config.suricata.enabled = true;

    let orchestrator = Orchestrator::build_from_config(config).await.unwrap();
    assert_eq!(
        orchestrator.engine_kinds(),
        vec![EngineKind::Suricata, EngineKind::ElastAlert]
    );
}

#[tokio::test]
async fn engines_that_are_not_running_make_the_daemon_unhealthy() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.suricata.enabled = true;

    let orchestrator = Orchestrator::build_from_config(config).await.unwrap();
    let health = orchestrator.health().await;

    match &health.status {
        HealthStatus::Unhealthy(reason) => assert!(reason.contains("suricata"), "got: {reason}"),
        other => panic!("expected unhealthy, got {other:?}"),
    }
    let strelka = health.engines.iter().find(|e| e.name == "strelka").unwrap();
    assert!(!strelka.enabled);
}

#[tokio::test]
async fn invalid_config_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.general.log_format = "xml".to_owned();

    let err = Orchestrator::build_from_config(config)
        .await
        .err()
        .expect("invalid log format must fail");
    assert!(err.to_string().contains("config validation failed"));
}

#[tokio::test]
async fn invalid_rule_filter_fails_engine_build() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.suricata.enabled = true;
    config.suricata.allow_regex = "([unclosed".to_owned();

    assert!(Orchestrator::build_from_config(config).await.is_err());
}

#[tokio::test]
async fn corrupt_store_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    std::fs::write(&config.store.path, "not json").unwrap();

    let err = Orchestrator::build_from_config(config)
        .await
        .err()
        .expect("corrupt store must fail");
    assert!(err.to_string().contains("failed to open detection store"));
}

#[tokio::test]
async fn builds_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("rulekeeper.toml");
    let toml_str = format!(
        r#"
[general]
log_level = "debug"
log_format = "pretty"
pid_file = ""

[store]
path = "{store}"
settings_path = "{settings}"

[strelka]
enabled = false

[suricata]
enabled = false

[elastalert]
enabled = false
"#,
        store = dir.path().join("detections.json").display(),
        settings = dir.path().join("settings.json").display(),
    );
    std::fs::write(&config_path, toml_str).unwrap();

    let orchestrator = Orchestrator::build(&config_path).await.unwrap();
    assert_eq!(orchestrator.config().general.log_level, "debug");
    assert_eq!(orchestrator.config().general.log_format, "pretty");
}

#[tokio::test]
async fn shutdown_without_engines_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let orchestrator = Orchestrator::build_from_config(test_config(dir.path()))
        .await
        .unwrap();
    orchestrator.shutdown().await.unwrap();
}
