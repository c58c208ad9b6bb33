//! rulekeeper.toml 통합 설정 테스트
//!
//! - rulekeeper.toml.example 파싱 테스트
//! - 부분 설정 (일부 섹션만) 로딩 테스트
//! - 환경변수 우선순위 테스트
//! - 파일 로딩 / 잘못된 형식 에러 테스트

use rulekeeper_core::config::RulekeeperConfig;
use rulekeeper_core::error::{ConfigError, RulekeeperError};

const EXAMPLE: &str = include_str!("../../../rulekeeper.toml.example");

// =============================================================================
// rulekeeper.toml.example 파싱 테스트
// =============================================================================

#[test]
fn example_config_parses_successfully() {
    let config = RulekeeperConfig::parse(EXAMPLE).expect("example config should parse");

    assert_eq!(config.general.log_level, "info");
    assert_eq!(config.general.log_format, "json");
    assert_eq!(config.general.pid_file, "/var/run/rulekeeper/rulekeeper.pid");
}

#[test]
fn example_config_passes_validation() {
    let config = RulekeeperConfig::parse(EXAMPLE).expect("should parse");
    config
        .validate()
        .expect("example config should pass validation");
}

#[test]
fn example_config_has_strelka_repo() {
    let config = RulekeeperConfig::parse(EXAMPLE).expect("should parse");

    assert_eq!(config.strelka.repos.len(), 1);
    let repo = &config.strelka.repos[0];
    assert!(repo.repo.ends_with("securityonion-yara"));
    assert_eq!(repo.license, "DRL");
    assert!(repo.community);
    assert!(repo.folder.is_none());
}

#[test]
fn example_config_matches_code_defaults() {
    let parsed = RulekeeperConfig::parse(EXAMPLE).expect("should parse");
    let defaults = RulekeeperConfig::default();

    assert_eq!(
        parsed.strelka.import_frequency_secs,
        defaults.strelka.import_frequency_secs
    );
    assert_eq!(
        parsed.suricata.ruleset_setting,
        defaults.suricata.ruleset_setting
    );
    assert_eq!(
        parsed.elastalert.package_download_template,
        defaults.elastalert.package_download_template
    );
    assert_eq!(parsed.store.template_name, defaults.store.template_name);
}

// =============================================================================
// 부분 설정 테스트
// =============================================================================

#[test]
fn partial_config_general_only() {
    let toml = r#"
[general]
log_level = "warn"
log_format = "pretty"
"#;
    let config = RulekeeperConfig::parse(toml).expect("should parse");
    assert_eq!(config.general.log_level, "warn");
    assert_eq!(config.general.log_format, "pretty");
    assert!(config.strelka.enabled);
    assert_eq!(config.elastalert.sigma_packages, vec!["core"]);
    config.validate().expect("should validate");
}

#[test]
fn partial_config_elastalert_only() {
    let toml = r#"
[elastalert]
sigma_packages = ["core+", "emerging_threats"]
import_frequency_secs = 7200
"#;
    let config = RulekeeperConfig::parse(toml).expect("should parse");
    assert_eq!(
        config.elastalert.sigma_packages,
        vec!["core+", "emerging_threats"]
    );
    assert_eq!(config.elastalert.import_frequency_secs, 7200);
    assert_eq!(config.elastalert.error_retry_secs, 300);
}

#[test]
fn empty_config_uses_defaults() {
    let config = RulekeeperConfig::parse("").expect("empty should parse");
    assert_eq!(config.general.log_level, "info");
    config.validate().expect("defaults should validate");
}

#[test]
fn wrong_type_is_parse_error() {
    let toml = r#"
[strelka]
import_frequency_secs = "daily"
"#;
    let err = RulekeeperConfig::parse(toml).unwrap_err();
    assert!(matches!(
        err,
        RulekeeperError::Config(ConfigError::ParseFailed { .. })
    ));
}

// =============================================================================
// 환경변수 우선순위 테스트
// =============================================================================

fn with_env<T>(key: &str, value: &str, f: impl FnOnce() -> T) -> T {
    let original = std::env::var(key).ok();
    // SAFETY: 테스트는 serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var(key, value);
    }

    let result = f();

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var(key, val),
            None => std::env::remove_var(key),
        }
    }
    result
}

#[test]
#[serial_test::serial]
fn env_override_takes_precedence_over_toml() {
    let toml = r#"
[general]
log_level = "info"
"#;
    let level = with_env("RULEKEEPER_GENERAL_LOG_LEVEL", "error", || {
        let mut config = RulekeeperConfig::parse(toml).expect("should parse");
        config.apply_env_overrides();
        config.general.log_level
    });
    assert_eq!(level, "error");
}

#[test]
#[serial_test::serial]
fn env_override_numeric_field() {
    let secs = with_env("RULEKEEPER_STRELKA_IMPORT_FREQUENCY_SECS", "3600", || {
        let mut config = RulekeeperConfig::default();
        config.apply_env_overrides();
        config.strelka.import_frequency_secs
    });
    assert_eq!(secs, 3600);
}

#[test]
#[serial_test::serial]
fn env_override_csv_for_packages() {
    let packages = with_env(
        "RULEKEEPER_ELASTALERT_SIGMA_PACKAGES",
        "core++, emerging_threats",
        || {
            let mut config = RulekeeperConfig::default();
            config.apply_env_overrides();
            config.elastalert.sigma_packages
        },
    );
    assert_eq!(packages, vec!["core++", "emerging_threats"]);
}

#[test]
#[serial_test::serial]
fn env_override_bool_field() {
    let enabled = with_env("RULEKEEPER_SURICATA_ENABLED", "false", || {
        let mut config = RulekeeperConfig::default();
        config.apply_env_overrides();
        config.suricata.enabled
    });
    assert!(!enabled);
}

#[tokio::test]
#[serial_test::serial]
async fn load_applies_env_then_validates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("rulekeeper.toml");
    std::fs::write(&path, EXAMPLE).expect("write config");

    let original = std::env::var("RULEKEEPER_GENERAL_LOG_FORMAT").ok();
    // SAFETY: 테스트는 serial_test로 직렬화되어 환경변수 조작이 안전합니다.
    unsafe {
        std::env::set_var("RULEKEEPER_GENERAL_LOG_FORMAT", "xml");
    }

    let result = RulekeeperConfig::load(&path).await;

    // SAFETY: 테스트 정리
    unsafe {
        match original {
            Some(val) => std::env::set_var("RULEKEEPER_GENERAL_LOG_FORMAT", val),
            None => std::env::remove_var("RULEKEEPER_GENERAL_LOG_FORMAT"),
        }
    }

    let err = result.expect_err("invalid env override should fail validation");
    assert!(err.to_string().contains("log_format"));
}
