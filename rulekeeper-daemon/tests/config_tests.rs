//! Daemon configuration loading tests.
//!
//! Environment overrides are process-global, so these run serially.

use rulekeeper_core::config::RulekeeperConfig;
use rulekeeper_daemon::orchestrator::Orchestrator;
use serial_test::serial;

fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
    let mut config = RulekeeperConfig::default();
    config.general.pid_file = String::new();
    config.store.path = dir.join("detections.json").display().to_string();
    config.store.settings_path = dir.join("settings.json").display().to_string();
    config.strelka.enabled = false;
    config.suricata.enabled = false;
    config.elastalert.enabled = false;

    let path = dir.join("rulekeeper.toml");
    std::fs::write(&path, toml::to_string(&config).unwrap()).unwrap();
    path
}

#[tokio::test]
#[serial]
async fn environment_overrides_file_values() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path());

    // SAFETY: serial test, no other thread reads the environment concurrently.
    unsafe { std::env::set_var("RULEKEEPER_GENERAL_LOG_LEVEL", "warn") };
    let result = Orchestrator::build(&path).await;
    unsafe { std::env::remove_var("RULEKEEPER_GENERAL_LOG_LEVEL") };

    let orchestrator = result.unwrap();
    assert_eq!(orchestrator.config().general.log_level, "warn");
}

#[tokio::test]
#[serial]
async fn invalid_environment_value_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path());

    // SAFETY: serial test, no other thread reads the environment concurrently.
    unsafe { std::env::set_var("RULEKEEPER_GENERAL_LOG_FORMAT", "xml") };
    let result = Orchestrator::build(&path).await;
    unsafe { std::env::remove_var("RULEKEEPER_GENERAL_LOG_FORMAT") };

    assert!(result.is_err());
}

#[tokio::test]
#[serial]
async fn missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = Orchestrator::build(&dir.path().join("absent.toml")).await;
    let err = result.err().expect("missing file must fail");
    assert!(err.to_string().contains("failed to load config"));
}
