//! 도메인 타입 -- 탐지 규칙 관리 전역에서 사용되는 공통 타입
//!
//! 중심 엔티티는 [`Detection`]이며, 엔진별 자연 키인 `public_id`는
//! 같은 엔진 안에서 유일합니다.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// PublicID별 에러 메시지 맵
///
/// 비어 있지 않으면 부분 성공을 뜻합니다.
pub type ErrorMap = BTreeMap<String, String>;

/// 사용자가 직접 만든 탐지의 룰셋 이름
pub const RULESET_CUSTOM: &str = "custom";

/// 제목을 추출할 수 없을 때 사용하는 자리표시자
pub const PLACEHOLDER_TITLE: &str =
    "Detection title not yet provided - click here to update this title";

/// BSD 라이선스
pub const LICENSE_BSD: &str = "BSD";
/// 상용 라이선스
pub const LICENSE_COMMERCIAL: &str = "Commercial";
/// Detection Rule License
pub const LICENSE_DRL: &str = "DRL";
/// 알 수 없는 라이선스
pub const LICENSE_UNKNOWN: &str = "Unknown";

// ─── EngineKind / Language ───────────────────────────────────────────

/// 탐지 엔진 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// YARA 규칙을 사용하는 Strelka 파일 스캐너
    Strelka,
    /// Suricata IDS
    Suricata,
    /// Sigma 규칙을 ElastAlert로 변환해 실행하는 알림 엔진
    #[serde(rename = "elastalert")]
    ElastAlert,
}

impl EngineKind {
    /// 모든 엔진 종류
    pub const ALL: [EngineKind; 3] = [Self::Strelka, Self::Suricata, Self::ElastAlert];

    /// 엔진이 사용하는 규칙 언어
    pub fn language(&self) -> Language {
        match self {
            Self::Strelka => Language::Yara,
            Self::Suricata => Language::Suricata,
            Self::ElastAlert => Language::Sigma,
        }
    }

    /// 엔진 이름 문자열
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strelka => "strelka",
            Self::Suricata => "suricata",
            Self::ElastAlert => "elastalert",
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    /// 엔진 이름과 규칙 언어 이름을 모두 받습니다 (대소문자 무시).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "strelka" | "yara" => Ok(Self::Strelka),
            "suricata" => Ok(Self::Suricata),
            "elastalert" | "sigma" => Ok(Self::ElastAlert),
            other => Err(format!("unknown engine: {other}")),
        }
    }
}

/// 규칙 언어
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Yara,
    Suricata,
    Sigma,
}

// ─── Severity ────────────────────────────────────────────────────────

/// 심각도 레벨
///
/// `Ord` 구현으로 비교가 가능합니다
/// (`Unknown < Informational < Low < Medium < High < Critical`).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// 심각도 정보 없음
    #[default]
    Unknown,
    /// 정보성
    Informational,
    /// 낮음
    Low,
    /// 중간
    Medium,
    /// 높음
    High,
    /// 치명적
    Critical,
}

impl Severity {
    /// 문자열에서 심각도를 파싱합니다. 대소문자를 구분하지 않습니다.
    pub fn from_str_loose(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "informational" | "info" => Some(Self::Informational),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }

    /// 소문자 이름
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Informational => "informational",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Override ────────────────────────────────────────────────────────

/// 튜닝 규칙 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OverrideType {
    /// 특정 트래픽에 대한 알림 억제
    Suppress,
    /// 임계치 기반 알림 제한
    Threshold,
    /// 사용자 정의 필터 (Sigma)
    CustomFilter,
}

/// 탐지별 튜닝 규칙
///
/// 타임스탬프를 제외한 모든 파라미터가 같으면 같은 튜닝으로 취급합니다
/// ([`Override::same_parameters`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Override {
    #[serde(rename = "type")]
    pub kind: OverrideType,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gen_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seconds: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_filter: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Override {
    /// 주어진 종류의 빈 튜닝 규칙을 생성합니다.
    pub fn new(kind: OverrideType) -> Self {
        Self {
            kind,
            is_enabled: false,
            gen_id: None,
            threshold_type: None,
            track: None,
            count: None,
            seconds: None,
            ip: None,
            custom_filter: None,
            note: String::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// 타임스탬프를 제외한 모든 파라미터가 같은지 비교합니다.
    pub fn same_parameters(&self, other: &Override) -> bool {
        self.kind == other.kind
            && self.is_enabled == other.is_enabled
            && self.gen_id == other.gen_id
            && self.threshold_type == other.threshold_type
            && self.track == other.track
            && self.count == other.count
            && self.seconds == other.seconds
            && self.ip == other.ip
            && self.custom_filter == other.custom_filter
            && self.note == other.note
    }
}

// ─── Detection ───────────────────────────────────────────────────────

/// 탐지 규칙
///
/// 원본 규칙 텍스트(`content`)와 그로부터 추출한 메타데이터,
/// 그리고 사용자가 관리하는 상태(활성화, 튜닝)를 함께 담습니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Detection {
    /// 저장소 내부 ID
    #[serde(default)]
    pub id: String,
    /// 엔진별 자연 키 (Suricata SID, YARA 규칙명, Sigma 규칙 ID)
    #[serde(default)]
    pub public_id: String,
    pub engine: EngineKind,
    pub language: Language,
    /// 원본 규칙 텍스트
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub severity: Severity,
    /// 출처 태그 (예: "core", "all_rules", "custom")
    #[serde(default)]
    pub ruleset: String,
    #[serde(default)]
    pub is_community: bool,
    #[serde(default)]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_reporting: bool,
    #[serde(default)]
    pub pending_delete: bool,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub category: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub product: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub service: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub overrides: Vec<Override>,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_time: Option<DateTime<Utc>>,
}

impl Detection {
    /// 주어진 엔진의 빈 탐지를 생성합니다.
    pub fn new(engine: EngineKind) -> Self {
        Self {
            id: String::new(),
            public_id: String::new(),
            engine,
            language: engine.language(),
            content: String::new(),
            title: String::new(),
            description: String::new(),
            severity: Severity::Unknown,
            ruleset: String::new(),
            is_community: false,
            is_enabled: false,
            is_reporting: false,
            pending_delete: false,
            license: String::new(),
            author: String::new(),
            category: String::new(),
            product: String::new(),
            service: String::new(),
            tags: Vec::new(),
            overrides: Vec::new(),
            create_time: None,
            update_time: None,
        }
    }

    /// 활성화된 튜닝 규칙만 반환합니다.
    pub fn enabled_overrides(&self) -> impl Iterator<Item = &Override> {
        self.overrides.iter().filter(|o| o.is_enabled)
    }
}

impl fmt::Display for Detection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} ({})",
            self.engine, self.public_id, self.title, self.severity
        )
    }
}

/// 탐지에 달린 코멘트
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(default)]
    pub id: String,
    pub detection_id: String,
    pub value: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub create_time: Option<DateTime<Utc>>,
}

// ─── User ────────────────────────────────────────────────────────────

/// 요청을 수행하는 사용자
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
}

impl User {
    /// 작성자 표기에 사용할 이름. 이름이 없으면 이메일을 사용합니다.
    pub fn display_name(&self) -> String {
        let name = format!("{} {}", self.first_name, self.last_name);
        let name = name.trim();
        if name.is_empty() {
            self.email.clone()
        } else {
            name.to_owned()
        }
    }
}

/// 기존 작성자 문자열 뒤에 사용자를 덧붙입니다.
pub fn add_user(author: &str, user: &User, separator: &str) -> String {
    let name = user.display_name();
    if author.trim().is_empty() {
        name
    } else {
        format!("{author}{separator}{name}")
    }
}

// ─── RuleRepo ────────────────────────────────────────────────────────

/// 외부 규칙 저장소 설명
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleRepo {
    /// 저장소 URL
    pub repo: String,
    /// 저장소 규칙의 라이선스
    #[serde(default)]
    pub license: String,
    /// 규칙을 찾을 하위 폴더
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    /// 커뮤니티 규칙 여부
    #[serde(default = "default_true")]
    pub community: bool,
}

fn default_true() -> bool {
    true
}

// ─── CompilationReport ───────────────────────────────────────────────

/// 외부 컴파일러가 남기는 배포 보고서
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilationReport {
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub success: Vec<String>,
    #[serde(default)]
    pub failure: Vec<String>,
    /// 컴파일된 산출물의 SHA-256 (hex)
    #[serde(default, rename = "compiled_sha256")]
    pub compiled_rules_hash: String,
}

impl CompilationReport {
    /// 배포를 시도한 모든 PublicID (성공 + 실패)
    pub fn deployed(&self) -> Vec<String> {
        self.success
            .iter()
            .chain(self.failure.iter())
            .cloned()
            .collect()
    }
}

// ─── EngineState ─────────────────────────────────────────────────────

/// 엔진 관측용 상태 플래그
///
/// 엔진 자신의 백그라운드 태스크만 값을 바꿉니다.
#[derive(Debug, Default)]
pub struct EngineState {
    syncing: AtomicBool,
    importing: AtomicBool,
    migrating: AtomicBool,
    sync_failure: AtomicBool,
    integrity_failure: AtomicBool,
}

impl EngineState {
    pub fn set_syncing(&self, value: bool) {
        self.syncing.store(value, Ordering::SeqCst);
    }

    pub fn set_importing(&self, value: bool) {
        self.importing.store(value, Ordering::SeqCst);
    }

    pub fn set_migrating(&self, value: bool) {
        self.migrating.store(value, Ordering::SeqCst);
    }

    pub fn set_sync_failure(&self, value: bool) {
        self.sync_failure.store(value, Ordering::SeqCst);
    }

    pub fn set_integrity_failure(&self, value: bool) {
        self.integrity_failure.store(value, Ordering::SeqCst);
    }

    /// 현재 값의 복사본
    pub fn snapshot(&self) -> EngineStateSnapshot {
        EngineStateSnapshot {
            syncing: self.syncing.load(Ordering::SeqCst),
            importing: self.importing.load(Ordering::SeqCst),
            migrating: self.migrating.load(Ordering::SeqCst),
            sync_failure: self.sync_failure.load(Ordering::SeqCst),
            integrity_failure: self.integrity_failure.load(Ordering::SeqCst),
        }
    }
}

/// [`EngineState`]의 직렬화 가능한 스냅샷
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStateSnapshot {
    pub syncing: bool,
    pub importing: bool,
    pub migrating: bool,
    pub sync_failure: bool,
    pub integrity_failure: bool,
}
