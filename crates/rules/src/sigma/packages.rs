//! Sigma 규칙 패키지 -- 패키지 이름 정규화와 패키지 파일 파싱
//!
//! 패키지는 포함 관계가 있습니다: `core ⊂ core+ ⊂ core++ ⊂ all_rules`,
//! 그리고 `all_rules`는 `emerging_threats_addon`도 포함합니다.
//! 상위 패키지가 선택되면 하위 패키지는 받지 않습니다.

use std::collections::BTreeSet;

use rulekeeper_core::types::{Detection, ErrorMap};
use tracing::debug;

use super::rule::SigmaRule;
use crate::filter::RuleFilter;

pub const PACKAGE_CORE: &str = "core";
pub const PACKAGE_CORE_PLUS: &str = "core+";
pub const PACKAGE_CORE_PLUS_PLUS: &str = "core++";
pub const PACKAGE_ALL_RULES: &str = "all_rules";
pub const PACKAGE_EMERGING_THREATS: &str = "emerging_threats_addon";

/// 설정의 패키지 목록을 정규화합니다.
///
/// 각 항목은 줄바꿈이나 쉼표로 여러 패키지를 담을 수 있습니다.
/// 결과는 정렬되어 있습니다.
pub fn normalize_packages<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut packages: BTreeSet<String> = items
        .into_iter()
        .flat_map(|item| {
            item.as_ref()
                .split(['\n', ','])
                .map(|p| p.trim().to_lowercase())
                .collect::<Vec<_>>()
        })
        .filter(|p| !p.is_empty())
        .map(|p| match p.as_str() {
            "all" => PACKAGE_ALL_RULES.to_owned(),
            "emerging_threats" => PACKAGE_EMERGING_THREATS.to_owned(),
            _ => p,
        })
        .collect();

    let superseded: &[&str] = if packages.contains(PACKAGE_ALL_RULES) {
        &[
            PACKAGE_CORE,
            PACKAGE_CORE_PLUS,
            PACKAGE_CORE_PLUS_PLUS,
            PACKAGE_EMERGING_THREATS,
        ]
    } else if packages.contains(PACKAGE_CORE_PLUS_PLUS) {
        &[PACKAGE_CORE, PACKAGE_CORE_PLUS]
    } else if packages.contains(PACKAGE_CORE_PLUS) {
        &[PACKAGE_CORE]
    } else {
        &[]
    };

    for name in superseded {
        packages.remove(*name);
    }

    packages.into_iter().collect()
}

/// 패키지 아카이브에서 꺼낸 `(경로, 내용)` 목록을 탐지로 변환합니다.
///
/// `.yml`/`.yaml`이 아닌 파일은 무시하고, 파싱에 실패한 파일은 경로를 키로
/// 에러 맵에 기록합니다.
pub fn parse_package_files<I>(
    package: &str,
    files: I,
    license: &str,
    filter: &RuleFilter,
) -> (Vec<Detection>, ErrorMap)
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut detections = Vec::new();
    let mut errors = ErrorMap::new();

    for (path, content) in files {
        if !(path.ends_with(".yml") || path.ends_with(".yaml")) {
            continue;
        }

        if !filter.keep(&content) {
            debug!(package, path = %path, "sigma rule filtered out");
            continue;
        }

        match SigmaRule::parse(&content) {
            Ok(rule) => detections.push(rule.to_detection(&content, package, license, true)),
            Err(e) => {
                errors.insert(path, e.to_string());
            }
        }
    }

    (detections, errors)
}
