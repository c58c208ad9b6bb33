//! 누락된 import 보완
//!
//! 한 파일 안에서 선언된 모듈을 다른 규칙이 `import` 없이 사용하면
//! 해당 import 줄을 규칙 원문 앞에 추가합니다. 정밀도보다 완전성을 우선하는
//! 휴리스틱이므로 오탐/미탐이 있을 수 있습니다.

use std::collections::BTreeMap;

use regex::Regex;

use super::rule::YaraRule;

/// 파일 단위 import 사용 검사기
#[derive(Debug, Default)]
pub(crate) struct ImportCheckers {
    checkers: BTreeMap<String, Option<Regex>>,
}

impl ImportCheckers {
    /// 파일에서 발견한 import를 등록합니다.
    pub(crate) fn register(&mut self, module: &str) {
        self.checkers
            .entry(module.to_owned())
            .or_insert_with(|| build_checker(module));
    }

    /// 규칙이 사용하지만 선언하지 않은 import를 추가합니다.
    pub(crate) fn add_missing(&self, rule: &mut YaraRule) {
        let mut new_imports = Vec::new();

        for (module, checker) in &self.checkers {
            if rule.imports.iter().any(|i| i == module) {
                continue;
            }
            let Some(checker) = checker else { continue };
            if checker.is_match(&rule.src) {
                rule.imports.push(module.clone());
                new_imports.push(format!("import \"{module}\""));
            }
        }

        if !new_imports.is_empty() {
            rule.src = format!("{}\n\n{}", new_imports.join("\n"), rule.src);
        }
    }
}

/// import 문이 아닌 곳에서 모듈 이름이 쓰였는지 찾는 정규식
fn build_checker(module: &str) -> Option<Regex> {
    Regex::new(&format!(r#"[^"]\b{}\b[^"]"#, regex::escape(module))).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule_with_src(src: &str) -> YaraRule {
        YaraRule {
            identifier: "r".to_owned(),
            src: src.to_owned(),
            ..Default::default()
        }
    }

    #[test]
    fn adds_import_when_module_used() {
        let mut checkers = ImportCheckers::default();
        checkers.register("pe");

        let mut rule = rule_with_src("rule r {\n\tcondition:\n\t\tpe.is_dll()\n}");
        checkers.add_missing(&mut rule);

        assert_eq!(rule.imports, vec!["pe"]);
        assert!(rule.src.starts_with("import \"pe\"\n\nrule r"));
    }

    #[test]
    fn skips_declared_or_unused_modules() {
        let mut checkers = ImportCheckers::default();
        checkers.register("pe");
        checkers.register("math");

        let mut rule = rule_with_src("rule r {\n\tcondition:\n\t\tpe.is_dll()\n}");
        rule.imports.push("pe".to_owned());
        checkers.add_missing(&mut rule);

        assert_eq!(rule.imports, vec!["pe"]);
        assert!(rule.src.starts_with("rule r"));
    }

    #[test]
    fn quoted_module_name_is_not_usage() {
        let mut checkers = ImportCheckers::default();
        checkers.register("pe");

        let mut rule = rule_with_src("$a = \"pe\"");
        checkers.add_missing(&mut rule);
        assert!(rule.imports.is_empty());
    }
}
