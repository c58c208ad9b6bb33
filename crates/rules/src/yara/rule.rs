//! YARA 규칙 모델 -- 메타데이터, 직렬화, ID 계산, 검증

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use rulekeeper_core::types::{Detection, EngineKind, PLACEHOLDER_TITLE, Severity};
use sha2::{Digest, Sha256};

use crate::error::RuleParseError;

/// 복제본 이름 변경용 규칙 헤더 패턴 (`rule X : tags {`)
static TITLE_UPDATER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rule\s+(\w+)(\s+:(\s*[^{]+))?(\s+)\{")
        .expect("TITLE_UPDATER pattern is valid")
});

/// 파싱된 YARA 규칙
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct YaraRule {
    /// `import "x"` 모듈 이름
    pub imports: Vec<String>,
    pub identifier: String,
    pub is_private: bool,
    pub meta: Metadata,
    /// strings 섹션의 줄 (앞뒤 공백 제거)
    pub strings: Vec<String>,
    /// condition 섹션 (여러 줄은 공백 하나로 연결)
    pub condition: String,
    /// 규칙 원문 (앞선 주석과 import 포함)
    pub src: String,
}

/// YARA meta 섹션
///
/// 알려진 키는 개별 필드로, 나머지는 `rest`에 소문자 키로 저장합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    pub id: Option<String>,
    pub author: Option<String>,
    pub date: Option<String>,
    pub version: Option<String>,
    pub reference: Option<String>,
    pub description: Option<String>,
    pub rest: BTreeMap<String, String>,
}

impl Metadata {
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.author.is_none()
            && self.date.is_none()
            && self.version.is_none()
            && self.reference.is_none()
            && self.description.is_none()
            && self.rest.is_empty()
    }

    /// 키는 소문자로, 값은 따옴표를 벗겨 저장합니다.
    pub fn set(&mut self, key: &str, value: &str) {
        let key = key.to_lowercase();
        let value = unquote(value);

        match key.as_str() {
            "id" => self.id = Some(value),
            "author" => self.author = Some(value),
            "date" => self.date = Some(value),
            "version" => self.version = Some(value),
            "reference" => self.reference = Some(value),
            "description" => self.description = Some(value),
            _ => {
                self.rest.insert(key, value);
            }
        }
    }

    /// 직렬화 순서대로 (키, 값) 쌍을 반환합니다.
    fn entries(&self) -> Vec<(&str, &str)> {
        let known = [
            ("id", &self.id),
            ("author", &self.author),
            ("date", &self.date),
            ("version", &self.version),
            ("reference", &self.reference),
            ("description", &self.description),
        ];

        known
            .into_iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (k, v)))
            .chain(self.rest.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .collect()
    }
}

impl YaraRule {
    /// 탐지 ID
    ///
    /// meta `id`가 있으면 그대로 쓰고, 없으면 식별자의 SHA-256에서
    /// UUIDv4 형태의 ID를 결정적으로 만듭니다.
    pub fn get_id(&self) -> String {
        if let Some(id) = &self.meta.id {
            return id.clone();
        }

        let mut hash: [u8; 32] = Sha256::digest(self.identifier.as_bytes()).into();
        hash[6] = 0x40 | (hash[6] & 0x0f);
        hash[8] = 0x80 | (hash[8] & 0x3f);

        let hex: String = hash[..16].iter().map(|b| format!("{b:02x}")).collect();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }

    /// 필수 필드(식별자, 조건)를 검증합니다.
    pub fn validate(&self) -> Result<(), RuleParseError> {
        let mut missing = Vec::new();
        if self.identifier.is_empty() {
            missing.push("identifier");
        }
        if self.condition.is_empty() {
            missing.push("condition");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(RuleParseError::MissingFields(missing.join(", ")))
        }
    }

    /// 탐지로 변환합니다. PublicID와 제목은 규칙 식별자입니다.
    pub fn to_detection(&self, license: &str, ruleset: &str, is_community: bool) -> Detection {
        let mut det = Detection::new(EngineKind::Strelka);
        det.public_id = self.identifier.clone();
        det.title = if self.identifier.is_empty() {
            PLACEHOLDER_TITLE.to_owned()
        } else {
            self.identifier.clone()
        };
        det.content = self.src.clone();
        det.severity = Severity::Unknown;
        det.description = self.meta.description.clone().unwrap_or_default();
        det.author = self.meta.author.clone().unwrap_or_default();
        det.license = license.to_owned();
        det.ruleset = ruleset.to_owned();
        det.is_community = is_community;
        det
    }
}

impl fmt::Display for YaraRule {
    /// imports, 규칙 헤더, meta, strings, condition 순서의 결정적 직렬화
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for import in &self.imports {
            writeln!(f, "import \"{import}\"")?;
        }
        if !self.imports.is_empty() {
            writeln!(f)?;
        }

        if self.is_private {
            f.write_str("private ")?;
        }
        writeln!(f, "rule {} {{", self.identifier)?;

        if !self.meta.is_empty() {
            writeln!(f, "\tmeta:")?;
            for (key, value) in self.meta.entries() {
                writeln!(f, "\t\t{key} = \"{}\"", quote_escape(value))?;
            }
            writeln!(f)?;
        }

        if !self.strings.is_empty() {
            writeln!(f, "\tstrings:")?;
            for s in &self.strings {
                writeln!(f, "\t\t{s}")?;
            }
        }

        write!(f, "\n\tcondition:\n\t\t{}\n}}", self.condition)
    }
}

/// 복제본용으로 규칙 이름에 `_copy` 접미사를 붙입니다.
///
/// 상속 표기(`rule X : Y {`)는 유지합니다.
pub fn rename_for_copy(src: &str) -> String {
    TITLE_UPDATER
        .replace_all(src, "rule ${1}_copy${2}${4}{")
        .into_owned()
}

/// 양끝 큰따옴표를 벗기고 `\"`, `\\` 이스케이프를 풉니다.
pub(crate) fn unquote(value: &str) -> String {
    let value = value.trim();
    match value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    {
        Some(inner) if value.len() >= 2 => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                match (c, chars.clone().next()) {
                    ('\\', Some(next @ ('"' | '\\'))) => {
                        out.push(next);
                        chars.next();
                    }
                    _ => out.push(c),
                }
            }
            out
        }
        _ => value.to_owned(),
    }
}

fn quote_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}
