//! 규칙 파싱 에러 타입
//!
//! [`RuleParseError`]는 세 규칙 언어의 파싱/검증 실패를 표현합니다.
//! `From<RuleParseError> for EngineError` 변환이 구현되어 있어
//! 엔진 계층에서 `?` 연산자로 전파할 수 있습니다.

use rulekeeper_core::error::EngineError;

/// 규칙 파싱 에러
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleParseError {
    /// YARA 식별자에 허용되지 않는 문자
    #[error("unexpected character in rule identifier around {offset}")]
    UnexpectedIdentifierChar {
        /// 문자 오프셋
        offset: usize,
    },

    /// YARA 식별자가 비어 있음
    #[error("expected rule identifier at {offset}")]
    MissingIdentifier {
        /// 문자 오프셋
        offset: usize,
    },

    /// meta / strings / condition 외의 섹션 헤더
    #[error("unexpected header at {offset}: {header}")]
    UnexpectedHeader { offset: usize, header: String },

    /// `key = value` 형식이 아닌 meta 줄
    #[error("invalid meta line at {offset}: {line}")]
    InvalidMeta { offset: usize, line: String },

    /// 규칙이 닫히지 않은 채 입력이 끝남
    #[error("unexpected end of rule")]
    UnexpectedEnd,

    /// 필수 필드 누락 (쉼표로 구분된 필드 이름)
    #[error("missing required fields: {0}")]
    MissingFields(String),

    /// 형식이 잘못된 Suricata 규칙
    #[error("malformed rule: {0}")]
    Malformed(String),

    /// 여러 줄 입력의 특정 줄에서 파싱 실패 (1부터 시작)
    #[error("unable to parse line {line}: {reason}")]
    AtLine { line: usize, reason: String },

    /// sid 옵션이 없는 Suricata 규칙
    #[error("rule does not contain a SID")]
    MissingSid,

    /// 파일 안에 규칙이 없음
    #[error("no rules found")]
    Empty,

    /// 파일 이름으로 쓸 수 없는 규칙 ID
    #[error("invalid rule id '{0}': only letters, digits, '-' and '_' are allowed")]
    InvalidId(String),

    /// YAML 역직렬화/직렬화 실패
    #[error("yaml error: {0}")]
    Yaml(String),
}

impl From<serde_yaml::Error> for RuleParseError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Yaml(err.to_string())
    }
}

impl From<RuleParseError> for EngineError {
    fn from(err: RuleParseError) -> Self {
        EngineError::Parse(err.to_string())
    }
}
