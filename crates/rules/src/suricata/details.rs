//! Suricata 탐지 추출 -- sid/msg/심각도/라이선스를 탐지 필드로 변환

use std::sync::LazyLock;

use regex::Regex;
use rulekeeper_core::types::{
    Detection, EngineKind, LICENSE_BSD, LICENSE_COMMERCIAL, LICENSE_UNKNOWN, PLACEHOLDER_TITLE,
    Severity,
};
use tracing::debug;

use super::rule::SuricataRule;
use crate::error::RuleParseError;
use crate::filter::RuleFilter;

/// 규칙 텍스트에서 sid 값을 찾는 패턴
static SID_EXTRACTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bsid: ?['"]?(.*?)['"]?;"#).expect("SID_EXTRACTER pattern is valid")
});

/// 규칙 텍스트에서 sid를 추출합니다. sid가 정확히 하나일 때만 반환합니다.
pub fn extract_sid(rule: &str) -> Option<String> {
    let mut matches = SID_EXTRACTER.captures_iter(rule);
    let first = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(first.get(1)?.as_str().trim().to_owned())
}

/// 룰셋 이름에 해당하는 라이선스
pub fn lookup_license(ruleset: &str) -> &'static str {
    match ruleset.to_lowercase().as_str() {
        "etopen" => LICENSE_BSD,
        "etpro" => LICENSE_COMMERCIAL,
        _ => LICENSE_UNKNOWN,
    }
}

/// `signature_severity` 메타데이터에서 심각도를 계산합니다.
pub fn severity_of(rule: &SuricataRule) -> Severity {
    let Some(meta) = rule
        .parse_metadata()
        .into_iter()
        .find(|m| m.key.eq_ignore_ascii_case("signature_severity"))
    else {
        return Severity::Unknown;
    };

    match meta.value.to_uppercase().as_str() {
        "INFORMATIONAL" => Severity::Informational,
        "MINOR" => Severity::Low,
        "MAJOR" => Severity::High,
        "CRITICAL" => Severity::Critical,
        _ => Severity::Unknown,
    }
}

/// 탐지 원문(`content`)에서 PublicID, 제목, 심각도를 채웁니다.
pub fn extract_details(det: &mut Detection) -> Result<(), RuleParseError> {
    let rule = SuricataRule::parse(&det.content)?;

    if let Some(sid) = rule.get_option("sid") {
        det.public_id = unquote(sid);
    }
    if let Some(msg) = rule.get_option("msg") {
        det.title = title_from_msg(msg);
    }

    if det.public_id.is_empty() {
        return Err(RuleParseError::MissingSid);
    }
    if det.title.is_empty() {
        det.title = PLACEHOLDER_TITLE.to_owned();
    }

    det.severity = severity_of(&rule);
    Ok(())
}

/// 규칙을 파싱한 뒤 정규화된 형태로 다시 직렬화합니다.
pub fn validate_rule(line: &str) -> Result<String, RuleParseError> {
    SuricataRule::parse(line).map(|r| r.to_string())
}

/// 한 줄을 커뮤니티 탐지로 변환합니다.
///
/// 빈 줄, 주석 줄, 필터에 걸린 줄은 `Ok(None)`입니다.
pub fn parse_line(
    line: &str,
    ruleset: Option<&str>,
    filter: &RuleFilter,
) -> Result<Option<Detection>, RuleParseError> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    if !filter.keep(line) {
        debug!(rule = line, "suricata rule filtered out");
        return Ok(None);
    }

    let normalized = validate_rule(line)?;
    let rule = SuricataRule::parse(&normalized)?;

    let sid = rule
        .get_option("sid")
        .filter(|s| !s.is_empty())
        .map(unquote)
        .ok_or(RuleParseError::MissingSid)?;

    let msg = rule
        .get_option("msg")
        .filter(|m| !m.is_empty())
        .unwrap_or(sid.as_str());

    let mut det = Detection::new(EngineKind::Suricata);
    det.public_id = sid.clone();
    det.title = title_from_msg(msg);
    det.severity = severity_of(&rule);
    det.content = normalized;

    if let Some(ruleset) = ruleset {
        det.ruleset = ruleset.to_owned();
        det.license = lookup_license(ruleset).to_owned();
    }

    Ok(Some(det))
}

/// 한 줄에 규칙 하나씩 있는 텍스트를 모두 파싱합니다.
///
/// 하나라도 실패하면 줄 번호(1부터)를 담은 에러를 반환합니다.
pub fn parse_rules(
    content: &str,
    ruleset: Option<&str>,
    filter: &RuleFilter,
) -> Result<Vec<Detection>, RuleParseError> {
    let mut detections = Vec::new();

    for (i, line) in content.split('\n').enumerate() {
        match parse_line(line, ruleset, filter) {
            Ok(Some(det)) => detections.push(det),
            Ok(None) => {}
            Err(e) => {
                return Err(RuleParseError::AtLine {
                    line: i + 1,
                    reason: e.to_string(),
                });
            }
        }
    }

    Ok(detections)
}

/// msg 값에서 제목을 만듭니다 (`\;`, 따옴표, 이스케이프 처리).
fn title_from_msg(msg: &str) -> String {
    let msg = msg.replace(r"\;", ";");
    unquote(&msg).replace(r#"\""#, "\"").replace(r"\\", "\\")
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .filter(|_| value.len() >= 2)
        .unwrap_or(value)
        .to_owned()
}
