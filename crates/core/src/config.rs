//! 설정 관리 -- rulekeeper.toml 파싱 및 런타임 설정
//!
//! [`RulekeeperConfig`]는 데몬과 모든 엔진의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. 환경변수 (`RULEKEEPER_STRELKA_IMPORT_FREQUENCY_SECS=3600` 형식)
//! 2. 설정 파일 (`rulekeeper.toml`)
//! 3. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), rulekeeper_core::error::RulekeeperError> {
//! use rulekeeper_core::config::RulekeeperConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = RulekeeperConfig::load("rulekeeper.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = RulekeeperConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, RulekeeperError};
use crate::store::DEFAULT_TEMPLATE_NAME;
use crate::types::{LICENSE_DRL, RuleRepo};

/// Rulekeeper 통합 설정
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulekeeperConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// 메트릭 노출 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
    /// 저장소 설정
    #[serde(default)]
    pub store: StoreConfig,
    /// YARA(Strelka) 엔진 설정
    #[serde(default)]
    pub strelka: StrelkaConfig,
    /// Suricata 엔진 설정
    #[serde(default)]
    pub suricata: SuricataConfig,
    /// Sigma(ElastAlert) 엔진 설정
    #[serde(default)]
    pub elastalert: ElastAlertConfig,
}

impl RulekeeperConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용한 뒤 검증합니다.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, RulekeeperError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드 없음).
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, RulekeeperError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RulekeeperError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                RulekeeperError::Io(e)
            }
        })?;
        let config = Self::parse(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, RulekeeperError> {
        toml::from_str(toml_str).map_err(|e| {
            RulekeeperError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `RULEKEEPER_{SECTION}_{FIELD}`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "RULEKEEPER_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "RULEKEEPER_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.data_dir, "RULEKEEPER_GENERAL_DATA_DIR");
        override_string(&mut self.general.pid_file, "RULEKEEPER_GENERAL_PID_FILE");

        // Metrics
        override_bool(&mut self.metrics.enabled, "RULEKEEPER_METRICS_ENABLED");
        override_string(&mut self.metrics.listen_addr, "RULEKEEPER_METRICS_LISTEN_ADDR");
        override_u16(&mut self.metrics.port, "RULEKEEPER_METRICS_PORT");

        // Store
        override_string(&mut self.store.path, "RULEKEEPER_STORE_PATH");
        override_string(&mut self.store.settings_path, "RULEKEEPER_STORE_SETTINGS_PATH");
        override_string(&mut self.store.template_name, "RULEKEEPER_STORE_TEMPLATE_NAME");

        // Strelka
        override_bool(&mut self.strelka.enabled, "RULEKEEPER_STRELKA_ENABLED");
        override_u64(
            &mut self.strelka.import_frequency_secs,
            "RULEKEEPER_STRELKA_IMPORT_FREQUENCY_SECS",
        );
        override_u64(
            &mut self.strelka.error_retry_secs,
            "RULEKEEPER_STRELKA_ERROR_RETRY_SECS",
        );
        override_usize(
            &mut self.strelka.fail_after_consecutive_errors,
            "RULEKEEPER_STRELKA_FAIL_AFTER_CONSECUTIVE_ERRORS",
        );
        override_u64(
            &mut self.strelka.integrity_check_frequency_secs,
            "RULEKEEPER_STRELKA_INTEGRITY_CHECK_FREQUENCY_SECS",
        );
        override_csv(
            &mut self.strelka.auto_enabled_rulesets,
            "RULEKEEPER_STRELKA_AUTO_ENABLED_RULESETS",
        );
        override_string(&mut self.strelka.rules_folder, "RULEKEEPER_STRELKA_RULES_FOLDER");
        override_string(&mut self.strelka.repos_folder, "RULEKEEPER_STRELKA_REPOS_FOLDER");
        override_string(&mut self.strelka.allow_regex, "RULEKEEPER_STRELKA_ALLOW_REGEX");
        override_string(&mut self.strelka.deny_regex, "RULEKEEPER_STRELKA_DENY_REGEX");

        // Suricata
        override_bool(&mut self.suricata.enabled, "RULEKEEPER_SURICATA_ENABLED");
        override_string(
            &mut self.suricata.community_rules_file,
            "RULEKEEPER_SURICATA_COMMUNITY_RULES_FILE",
        );
        override_u64(
            &mut self.suricata.import_frequency_secs,
            "RULEKEEPER_SURICATA_IMPORT_FREQUENCY_SECS",
        );
        override_string(&mut self.suricata.allow_regex, "RULEKEEPER_SURICATA_ALLOW_REGEX");
        override_string(&mut self.suricata.deny_regex, "RULEKEEPER_SURICATA_DENY_REGEX");

        // ElastAlert
        override_bool(&mut self.elastalert.enabled, "RULEKEEPER_ELASTALERT_ENABLED");
        override_csv(
            &mut self.elastalert.sigma_packages,
            "RULEKEEPER_ELASTALERT_SIGMA_PACKAGES",
        );
        override_string(
            &mut self.elastalert.package_download_template,
            "RULEKEEPER_ELASTALERT_PACKAGE_DOWNLOAD_TEMPLATE",
        );
        override_u64(
            &mut self.elastalert.import_frequency_secs,
            "RULEKEEPER_ELASTALERT_IMPORT_FREQUENCY_SECS",
        );
        override_string(&mut self.elastalert.allow_regex, "RULEKEEPER_ELASTALERT_ALLOW_REGEX");
        override_string(&mut self.elastalert.deny_regex, "RULEKEEPER_ELASTALERT_DENY_REGEX");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), RulekeeperError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.metrics.enabled && self.metrics.port == 0 {
            return Err(invalid("metrics.port", "must be greater than 0".to_owned()));
        }

        if self.strelka.enabled {
            self.strelka.timing().validate("strelka")?;
            if self.strelka.integrity_check_frequency_secs == 0 {
                return Err(invalid(
                    "strelka.integrity_check_frequency_secs",
                    "must be greater than 0".to_owned(),
                ));
            }
            if let Some(repo) = self.strelka.repos.iter().find(|r| r.repo.trim().is_empty()) {
                return Err(invalid(
                    "strelka.repos",
                    format!("repo url must not be empty (license: {})", repo.license),
                ));
            }
            validate_regex("strelka.allow_regex", &self.strelka.allow_regex)?;
            validate_regex("strelka.deny_regex", &self.strelka.deny_regex)?;
        }

        if self.suricata.enabled {
            self.suricata.timing().validate("suricata")?;
            validate_regex("suricata.allow_regex", &self.suricata.allow_regex)?;
            validate_regex("suricata.deny_regex", &self.suricata.deny_regex)?;
        }

        if self.elastalert.enabled {
            self.elastalert.timing().validate("elastalert")?;
            if !self.elastalert.package_download_template.contains("%s") {
                return Err(invalid(
                    "elastalert.package_download_template",
                    "must contain a %s placeholder for the package name".to_owned(),
                ));
            }
            validate_regex("elastalert.allow_regex", &self.elastalert.allow_regex)?;
            validate_regex("elastalert.deny_regex", &self.elastalert.deny_regex)?;
        }

        Ok(())
    }
}

fn invalid(field: &str, reason: String) -> RulekeeperError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason,
    }
    .into()
}

fn validate_regex(field: &str, pattern: &str) -> Result<(), RulekeeperError> {
    if pattern.is_empty() {
        return Ok(());
    }
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| invalid(field, e.to_string()))
}

// ─── 섹션별 설정 ─────────────────────────────────────────────────────

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// 데이터 디렉토리
    pub data_dir: String,
    /// PID 파일 경로
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            data_dir: "/var/lib/rulekeeper".to_owned(),
            pid_file: "/var/run/rulekeeper.pid".to_owned(),
        }
    }
}

/// 메트릭 노출 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Prometheus 엔드포인트 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 엔드포인트 경로
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9102,
            endpoint: "/metrics".to_owned(),
        }
    }
}

/// 저장소 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// 탐지 저장소 JSON 파일
    pub path: String,
    /// 설정(pillar) 저장소 JSON 파일
    pub settings_path: String,
    /// 가져오기 전에 존재해야 하는 인덱스 템플릿 이름
    pub template_name: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "/var/lib/rulekeeper/detections.json".to_owned(),
            settings_path: "/var/lib/rulekeeper/settings.json".to_owned(),
            template_name: DEFAULT_TEMPLATE_NAME.to_owned(),
        }
    }
}

/// 동기화 주기 타이밍
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncTiming {
    /// 정상 가져오기 간격 (초)
    pub import_frequency_secs: u64,
    /// 실패 후 재시도 간격 (초)
    pub error_retry_secs: u64,
    /// 연속 실패 허용 횟수
    pub fail_after_consecutive_errors: usize,
}

impl SyncTiming {
    fn validate(&self, section: &str) -> Result<(), RulekeeperError> {
        if self.import_frequency_secs == 0 {
            return Err(invalid(
                &format!("{section}.import_frequency_secs"),
                "must be greater than 0".to_owned(),
            ));
        }
        if self.error_retry_secs == 0 {
            return Err(invalid(
                &format!("{section}.error_retry_secs"),
                "must be greater than 0".to_owned(),
            ));
        }
        if self.fail_after_consecutive_errors == 0 {
            return Err(invalid(
                &format!("{section}.fail_after_consecutive_errors"),
                "must be greater than 0".to_owned(),
            ));
        }
        Ok(())
    }
}

/// YARA(Strelka) 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrelkaConfig {
    pub enabled: bool,
    pub import_frequency_secs: u64,
    pub error_retry_secs: u64,
    pub fail_after_consecutive_errors: usize,
    pub integrity_check_frequency_secs: u64,
    /// 새 커뮤니티 규칙을 자동 활성화할 룰셋 (대소문자 무시)
    pub auto_enabled_rulesets: Vec<String>,
    /// 규칙을 가져올 git 저장소
    pub repos: Vec<RuleRepo>,
    /// 활성화된 `.yar` 파일을 쓰는 폴더
    pub rules_folder: String,
    /// 저장소를 클론하는 폴더
    pub repos_folder: String,
    /// 컴파일 스크립트 (`python3 <script> <rules_folder>`)
    pub compile_script: String,
    /// 마지막 가져오기 시각 파일
    pub state_file: String,
    /// 컴파일 보고서 JSON 파일
    pub compilation_report_path: String,
    /// 컴파일된 규칙 파일
    pub compiled_rules_path: String,
    pub allow_regex: String,
    pub deny_regex: String,
}

impl StrelkaConfig {
    pub fn timing(&self) -> SyncTiming {
        SyncTiming {
            import_frequency_secs: self.import_frequency_secs,
            error_retry_secs: self.error_retry_secs,
            fail_after_consecutive_errors: self.fail_after_consecutive_errors,
        }
    }
}

impl Default for StrelkaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            import_frequency_secs: 86_400,
            error_retry_secs: 300,
            fail_after_consecutive_errors: 10,
            integrity_check_frequency_secs: 600,
            auto_enabled_rulesets: vec!["securityonion-yara".to_owned()],
            repos: vec![RuleRepo {
                repo: "https://github.com/Security-Onion-Solutions/securityonion-yara".to_owned(),
                license: LICENSE_DRL.to_owned(),
                folder: None,
                community: true,
            }],
            rules_folder: "/opt/sensoroni/yara/rules".to_owned(),
            repos_folder: "/opt/sensoroni/yara/repos".to_owned(),
            compile_script: "/opt/so/conf/strelka/compile_yara.py".to_owned(),
            state_file: "/opt/sensoroni/fingerprints/strelkaengine.state".to_owned(),
            compilation_report_path: "/opt/so/state/detections_yara_compilation-total.log"
                .to_owned(),
            compiled_rules_path: "/opt/so/saltstack/local/salt/strelka/rules/compiled/rules.compiled"
                .to_owned(),
            allow_regex: String::new(),
            deny_regex: String::new(),
        }
    }
}

/// Suricata 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuricataConfig {
    pub enabled: bool,
    /// 커뮤니티 규칙 파일 (한 줄에 한 규칙)
    pub community_rules_file: String,
    /// 마지막으로 가져온 규칙 파일의 SHA-256
    pub fingerprint_file: String,
    /// 마지막 가져오기 시각 파일
    pub state_file: String,
    pub import_frequency_secs: u64,
    pub error_retry_secs: u64,
    pub fail_after_consecutive_errors: usize,
    pub integrity_check_frequency_secs: u64,
    /// 룰셋 이름을 담은 설정 ID
    pub ruleset_setting: String,
    /// 컴파일 보고서 JSON 파일
    pub compilation_report_path: String,
    /// 배포된 규칙 산출물
    pub compiled_rules_path: String,
    pub allow_regex: String,
    pub deny_regex: String,
}

impl SuricataConfig {
    pub fn timing(&self) -> SyncTiming {
        SyncTiming {
            import_frequency_secs: self.import_frequency_secs,
            error_retry_secs: self.error_retry_secs,
            fail_after_consecutive_errors: self.fail_after_consecutive_errors,
        }
    }
}

impl Default for SuricataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            community_rules_file: "/nsm/rules/suricata/emerging-all.rules".to_owned(),
            fingerprint_file: "/opt/sensoroni/fingerprints/emerging-all.fingerprint".to_owned(),
            state_file: "/opt/sensoroni/fingerprints/suricataengine.state".to_owned(),
            import_frequency_secs: 86_400,
            error_retry_secs: 300,
            fail_after_consecutive_errors: 10,
            integrity_check_frequency_secs: 600,
            ruleset_setting: "idstools.config.ruleset".to_owned(),
            compilation_report_path: "/opt/so/state/detections_suricata_deployment.log".to_owned(),
            compiled_rules_path: "/opt/so/saltstack/local/salt/suricata/rules/all.rules"
                .to_owned(),
            allow_regex: String::new(),
            deny_regex: String::new(),
        }
    }
}

/// Sigma(ElastAlert) 엔진 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ElastAlertConfig {
    pub enabled: bool,
    /// 가져올 Sigma 패키지 (core, core+, core++, all_rules, emerging_threats)
    pub sigma_packages: Vec<String>,
    /// 패키지 다운로드 URL 템플릿 (`%s` = 패키지 이름)
    pub package_download_template: String,
    /// 변환된 `.yml` 규칙을 쓰는 폴더
    pub rules_folder: String,
    /// 마지막 가져오기 시각 파일
    pub state_file: String,
    pub import_frequency_secs: u64,
    pub error_retry_secs: u64,
    pub fail_after_consecutive_errors: usize,
    pub integrity_check_frequency_secs: u64,
    pub auto_enabled_rulesets: Vec<String>,
    /// sigma CLI 실행 파일
    pub sigma_cli_path: String,
    /// 패키지 다운로드 타임아웃 (초)
    pub request_timeout_secs: u64,
    /// 컴파일 보고서 JSON 파일
    pub compilation_report_path: String,
    pub allow_regex: String,
    pub deny_regex: String,
}

impl ElastAlertConfig {
    pub fn timing(&self) -> SyncTiming {
        SyncTiming {
            import_frequency_secs: self.import_frequency_secs,
            error_retry_secs: self.error_retry_secs,
            fail_after_consecutive_errors: self.fail_after_consecutive_errors,
        }
    }
}

impl Default for ElastAlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sigma_packages: vec!["core".to_owned()],
            package_download_template:
                "https://github.com/SigmaHQ/sigma/releases/latest/download/sigma_%s.zip".to_owned(),
            rules_folder: "/opt/sensoroni/elastalert".to_owned(),
            state_file: "/opt/sensoroni/fingerprints/elastalertengine.state".to_owned(),
            import_frequency_secs: 86_400,
            error_retry_secs: 300,
            fail_after_consecutive_errors: 10,
            integrity_check_frequency_secs: 600,
            auto_enabled_rulesets: Vec::new(),
            sigma_cli_path: "sigma".to_owned(),
            request_timeout_secs: 300,
            compilation_report_path: "/opt/so/state/detections_elastalert_deployment.log"
                .to_owned(),
            allow_regex: String::new(),
            deny_regex: String::new(),
        }
    }
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_values() {
        let config = RulekeeperConfig::default();
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.strelka.import_frequency_secs, 86_400);
        assert_eq!(config.strelka.error_retry_secs, 300);
        assert_eq!(config.strelka.fail_after_consecutive_errors, 10);
        assert_eq!(config.strelka.integrity_check_frequency_secs, 600);
        assert_eq!(config.strelka.repos.len(), 1);
        assert_eq!(config.strelka.repos[0].license, "DRL");
        assert_eq!(config.store.template_name, "so-detection");
        assert!(!config.metrics.enabled);
    }

    #[test]
    fn default_config_passes_validation() {
        RulekeeperConfig::default().validate().unwrap();
    }

    #[test]
    fn from_str_partial_toml_merges_with_defaults() {
        let toml = r#"
[general]
log_level = "debug"

[strelka]
import_frequency_secs = 3600

[[strelka.repos]]
repo = "https://github.com/example/yara-rules"
license = "MIT"
folder = "rules"
community = true
"#;
        let config = RulekeeperConfig::parse(toml).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.general.log_format, "json");
        assert_eq!(config.strelka.import_frequency_secs, 3600);
        assert_eq!(config.strelka.error_retry_secs, 300);
        assert_eq!(config.strelka.repos.len(), 1);
        assert_eq!(config.strelka.repos[0].folder.as_deref(), Some("rules"));
    }

    #[test]
    fn from_str_invalid_toml_returns_error() {
        let err = RulekeeperConfig::parse("invalid = [[[toml").unwrap_err();
        assert!(matches!(
            err,
            RulekeeperError::Config(ConfigError::ParseFailed { .. })
        ));
    }

    #[test]
    fn validate_rejects_invalid_log_format() {
        let mut config = RulekeeperConfig::default();
        config.general.log_format = "xml".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("log_format"));
    }

    #[test]
    fn validate_rejects_zero_error_threshold() {
        let mut config = RulekeeperConfig::default();
        config.elastalert.fail_after_consecutive_errors = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("elastalert.fail_after_consecutive_errors"));
    }

    #[test]
    fn validate_skips_disabled_engine() {
        let mut config = RulekeeperConfig::default();
        config.suricata.enabled = false;
        config.suricata.import_frequency_secs = 0;
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_bad_regex() {
        let mut config = RulekeeperConfig::default();
        config.strelka.deny_regex = "([unclosed".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("strelka.deny_regex"));
    }

    #[test]
    fn validate_rejects_template_without_placeholder() {
        let mut config = RulekeeperConfig::default();
        config.elastalert.package_download_template = "https://example.com/rules.zip".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("package_download_template"));
    }

    #[test]
    fn validate_rejects_empty_repo_url() {
        let mut config = RulekeeperConfig::default();
        config.strelka.repos[0].repo = "  ".to_owned();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("strelka.repos"));
    }

    #[test]
    fn env_override_u64_invalid_keeps_original() {
        let mut val = 42u64;
        // SAFETY: 테스트는 단일 스레드에서 실행되므로 환경변수 조작이 안전합니다.
        unsafe { std::env::set_var("TEST_RULEKEEPER_U64_BAD", "soon") };
        override_u64(&mut val, "TEST_RULEKEEPER_U64_BAD");
        assert_eq!(val, 42);
        unsafe { std::env::remove_var("TEST_RULEKEEPER_U64_BAD") };
    }

    #[test]
    fn env_override_csv_drops_empty_entries() {
        let mut val = vec!["a".to_owned()];
        // SAFETY: 테스트는 단일 스레드에서 실행되므로 환경변수 조작이 안전합니다.
        unsafe { std::env::set_var("TEST_RULEKEEPER_CSV", "core, ,emerging_threats") };
        override_csv(&mut val, "TEST_RULEKEEPER_CSV");
        assert_eq!(val, vec!["core", "emerging_threats"]);
        unsafe { std::env::remove_var("TEST_RULEKEEPER_CSV") };
    }

    #[test]
    fn config_serialize_roundtrip() {
        let config = RulekeeperConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed = RulekeeperConfig::parse(&toml_str).unwrap();
        assert_eq!(config.strelka.repos, parsed.strelka.repos);
        assert_eq!(config.elastalert.sigma_packages, parsed.elastalert.sigma_packages);
    }

    #[tokio::test]
    async fn from_file_not_found() {
        let err = RulekeeperConfig::from_file("/nonexistent/path/rulekeeper.toml")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            RulekeeperError::Config(ConfigError::FileNotFound { .. })
        ));
    }
}
