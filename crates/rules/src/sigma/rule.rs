//! Sigma 규칙 모델 -- YAML 역직렬화, 필수 필드 검증, 탐지 변환

use std::collections::BTreeMap;

use rulekeeper_core::types::{Detection, EngineKind, Severity};
use serde::{Deserialize, Serialize};

use crate::error::RuleParseError;

/// 단일 값 또는 목록
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMore {
    One(String),
    Many(Vec<String>),
}

impl OneOrMore {
    /// 비어 있는 값만 담고 있는지 확인합니다.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::One(v) => v.is_empty(),
            Self::Many(vs) => vs.is_empty(),
        }
    }

    pub fn values(&self) -> Vec<&str> {
        match self {
            Self::One(v) => vec![v.as_str()],
            Self::Many(vs) => vs.iter().map(String::as_str).collect(),
        }
    }
}

/// Sigma 규칙
///
/// 알려지지 않은 최상위 키는 `rest`에 보존됩니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigmaRule {
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, alias = "reference", skip_serializing_if = "Vec::is_empty")]
    pub references: Vec<String>,
    #[serde(default)]
    pub logsource: LogSource,
    #[serde(default)]
    pub detection: SigmaDetection,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub falsepositives: Option<OneOrMore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related: Vec<RelatedRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fields: Vec<String>,
    #[serde(flatten)]
    pub rest: BTreeMap<String, serde_yaml::Value>,
}

/// 로그 출처
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
}

impl LogSource {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.product.is_none()
            && self.service.is_none()
            && self.definition.is_none()
    }
}

/// detection 블록. 선택자(selection)는 `rest`에 그대로 둡니다.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SigmaDetection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<OneOrMore>,
    #[serde(flatten)]
    pub rest: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelatedRule {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl SigmaRule {
    /// YAML 텍스트를 파싱하고 필수 필드를 검증합니다.
    pub fn parse(data: &str) -> Result<Self, RuleParseError> {
        let rule: SigmaRule = serde_yaml::from_str(data)?;
        rule.validate()?;
        Ok(rule)
    }

    /// title, logsource, detection.condition이 있는지, `id`가 안전한 형식인지 확인합니다.
    pub fn validate(&self) -> Result<(), RuleParseError> {
        if let Some(id) = &self.id
            && !is_valid_rule_id(id)
        {
            return Err(RuleParseError::InvalidId(id.clone()));
        }

        let mut missing = Vec::new();

        if self.title.is_empty() {
            missing.push("title");
        }
        if self.logsource.is_empty() {
            missing.push("logsource");
        }
        if self.detection.condition.as_ref().is_none_or(OneOrMore::is_empty) {
            missing.push("detection.condition");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RuleParseError::MissingFields(missing.join(", ")))
        }
    }

    /// `level` 값에 해당하는 심각도
    pub fn severity(&self) -> Severity {
        self.level
            .as_deref()
            .and_then(Severity::from_str_loose)
            .unwrap_or(Severity::Unknown)
    }

    /// 탐지로 변환합니다.
    ///
    /// PublicID는 `id`, 없으면 제목입니다. `content`는 원문 텍스트입니다.
    pub fn to_detection(
        &self,
        content: &str,
        ruleset: &str,
        license: &str,
        is_community: bool,
    ) -> Detection {
        let mut det = Detection::new(EngineKind::ElastAlert);
        det.public_id = self.id.clone().unwrap_or_else(|| self.title.clone());
        det.title = self.title.clone();
        det.severity = self.severity();
        det.content = content.to_owned();
        det.description = self.description.clone().unwrap_or_default();
        det.author = self.author.clone().unwrap_or_default();
        det.ruleset = ruleset.to_owned();
        det.license = license.to_owned();
        det.is_community = is_community;

        let non_empty = |v: &Option<String>| v.clone().filter(|s| !s.is_empty());
        det.category = non_empty(&self.logsource.category).unwrap_or_default();
        det.product = non_empty(&self.logsource.product).unwrap_or_default();
        det.service = non_empty(&self.logsource.service).unwrap_or_default();

        det
    }
}

/// 규칙 ID는 배포 파일 이름이 되므로 영숫자, `-`, `_`만 허용합니다 (UUID 포함).
pub fn is_valid_rule_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALWAYS_ALERT: &str = r#"title: Always Alert
id: 00000000-0000-0000-0000-00000000
status: experimental
description: Always Alerts
author: Corey Ogburn
date: 2023/11/03
modified: 2023/11/03
logsource:
    product: windows
detection:
    filter:
       event.module: "zeek"
    condition: "filter"
level: high
tags:
    - attack.execution
"#;

    #[test]
    fn parses_and_maps_to_detection() {
        let rule = SigmaRule::parse(ALWAYS_ALERT).unwrap();
        assert_eq!(rule.title, "Always Alert");
        assert_eq!(rule.detection.condition, Some(OneOrMore::One("filter".to_owned())));
        assert!(rule.detection.rest.contains_key("filter"));
        assert!(rule.rest.contains_key("tags"));

        let det = rule.to_detection(ALWAYS_ALERT, "all_rules", "DRL", true);
        assert_eq!(det.public_id, "00000000-0000-0000-0000-00000000");
        assert_eq!(det.title, "Always Alert");
        assert_eq!(det.severity, Severity::High);
        assert_eq!(det.content, ALWAYS_ALERT);
        assert_eq!(det.product, "windows");
        assert_eq!(det.category, "");
        assert_eq!(det.ruleset, "all_rules");
        assert!(det.is_community);
        assert_eq!(det.engine, EngineKind::ElastAlert);
    }

    #[test]
    fn public_id_falls_back_to_title() {
        let rule = SigmaRule::parse(
            "title: No Id\nlogsource:\n  category: dns\ndetection:\n  sel:\n    a: b\n  condition:\n    - sel\n",
        )
        .unwrap();
        let det = rule.to_detection("", "core", "", false);
        assert_eq!(det.public_id, "No Id");
        assert_eq!(det.severity, Severity::Unknown);
        assert_eq!(det.category, "dns");
    }

    #[test]
    fn missing_fields_are_listed() {
        let err = SigmaRule::parse("id: x\ndetection:\n  sel: {}\n").unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required fields: title, logsource, detection.condition"
        );
    }

    #[test]
    fn path_like_id_is_rejected() {
        let rule = "title: T\nid: ../escaped\nlogsource:\n  product: linux\ndetection:\n  sel:\n    a: b\n  condition: sel\n";
        assert_eq!(
            SigmaRule::parse(rule).unwrap_err(),
            RuleParseError::InvalidId("../escaped".to_owned())
        );

        assert!(is_valid_rule_id("3b6ab547-8ec2-4991-b9d2-2b06702a48d7"));
        assert!(is_valid_rule_id("proc_creation_win"));
        assert!(!is_valid_rule_id("a/b"));
        assert!(!is_valid_rule_id(""));
    }

    #[test]
    fn non_mapping_yaml_is_error() {
        assert!(matches!(
            SigmaRule::parse("bad data"),
            Err(RuleParseError::Yaml(_))
        ));
    }

    #[test]
    fn one_or_more_values() {
        assert_eq!(OneOrMore::One("a".into()).values(), vec!["a"]);
        assert!(OneOrMore::Many(vec![]).is_empty());
    }
}
