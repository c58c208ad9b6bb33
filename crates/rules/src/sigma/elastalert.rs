//! ElastAlert 규칙 래퍼 -- sigma CLI가 만든 EQL 쿼리를 ElastAlert YAML로 감쌈
//!
//! 필드 순서는 ElastAlert 규칙 파일에 기록되는 순서 그대로입니다.

use rulekeeper_core::types::{Detection, OverrideType, Severity};
use serde::{Deserialize, Serialize};

use crate::error::RuleParseError;

/// 알림을 전달할 ElastAlert 알리미
pub const PLAYBOOK_ALERTER: &str = "modules.so.playbook-es.PlaybookESAlerter";
/// 검색 대상 인덱스 패턴
pub const ALERT_INDEX: &str = ".ds-logs-*";

/// `sigma convert`에 넘길 인자 (규칙은 표준 입력으로 전달)
pub const SIGMA_CONVERT_ARGS: &[&str] = &["convert", "-t", "eql", "-p", "ecs_windows", "/dev/stdin"];

/// ElastAlert 규칙 파일 내용
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElastAlertRule {
    pub play_title: String,
    pub play_id: String,
    #[serde(rename = "event.module")]
    pub event_module: String,
    #[serde(rename = "event.dataset")]
    pub event_dataset: String,
    #[serde(rename = "event.severity")]
    pub event_severity: u8,
    #[serde(rename = "rule.category")]
    pub rule_category: String,
    pub sigma_level: String,
    pub alert: Vec<String>,
    pub index: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub filter: Vec<EqlFilter>,
    pub play_url: String,
    pub kibana_pivot: String,
    pub soc_pivot: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EqlFilter {
    pub eql: String,
}

impl ElastAlertRule {
    /// 탐지와 변환된 EQL 쿼리로 규칙을 만듭니다.
    ///
    /// 활성화된 custom filter 튜닝은 `(쿼리) and 필터` 형태로 덧붙입니다.
    pub fn wrap(det: &Detection, eql: &str) -> Self {
        let eql = det
            .enabled_overrides()
            .filter(|o| o.kind == OverrideType::CustomFilter)
            .filter_map(|o| o.custom_filter.as_deref())
            .fold(eql.trim().to_owned(), |query, filter| {
                format!("({query}) and {filter}")
            });

        Self {
            play_title: det.title.clone(),
            play_id: det.id.clone(),
            event_module: "elastalert".to_owned(),
            event_dataset: "elastalert.alert".to_owned(),
            event_severity: severity_number(det.severity),
            rule_category: String::new(),
            sigma_level: det.severity.to_string(),
            alert: vec![PLAYBOOK_ALERTER.to_owned()],
            index: ALERT_INDEX.to_owned(),
            name: format!("{} - {}", det.title, det.id),
            kind: "any".to_owned(),
            filter: vec![EqlFilter { eql }],
            play_url: "play_url".to_owned(),
            kibana_pivot: "kibana_pivot".to_owned(),
            soc_pivot: "soc_pivot".to_owned(),
        }
    }

    pub fn to_yaml(&self) -> Result<String, RuleParseError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// ElastAlert `event.severity` 숫자 (unknown 0 ~ critical 5)
pub fn severity_number(severity: Severity) -> u8 {
    match severity {
        Severity::Unknown => 0,
        Severity::Informational => 1,
        Severity::Low => 2,
        Severity::Medium => 3,
        Severity::High => 4,
        Severity::Critical => 5,
    }
}
