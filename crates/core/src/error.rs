//! 에러 타입 -- 도메인별 에러 정의
//!
//! [`RulekeeperError`]는 모든 크레이트가 수렴하는 최상위 에러입니다.
//! 탐지 엔진 계층의 에러 분류는 [`EngineError`]에 모여 있습니다.

/// Rulekeeper 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum RulekeeperError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 생명주기 처리 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// 엔진 레지스트리 에러
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// 탐지 엔진 에러
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// 저장소 에러
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 생명주기 처리 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 이미 실행 중
    #[error("already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("not running")]
    NotRunning,

    /// 초기화 실패
    #[error("init failed: {0}")]
    InitFailed(String),
}

/// 엔진 레지스트리 에러
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// 같은 종류의 엔진이 이미 등록됨
    #[error("engine already registered: {name}")]
    AlreadyRegistered { name: String },

    /// 등록되지 않은 엔진
    #[error("engine not found: {name}")]
    NotFound { name: String },

    /// 하나 이상의 엔진 정지 실패
    #[error("stop failed: {0}")]
    StopFailed(String),
}

/// 탐지 저장소 / 설정 저장소 에러
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// 대상 문서가 없음
    #[error("object not found: {id}")]
    NotFound { id: String },

    /// 쓰기는 성공했지만 곧바로 다시 읽히지 않음
    #[error("object not found after write: {public_id}")]
    WriteNotVisible { public_id: String },

    /// 같은 키의 문서가 이미 존재
    #[error("conflict: {0}")]
    Conflict(String),

    /// 권한 없음
    #[error("unauthorized: {action} on {resource}")]
    Unauthorized { action: String, resource: String },

    /// 백엔드 처리 실패
    #[error("backend failure: {0}")]
    Backend(String),
}

/// 탐지 엔진 에러
///
/// 동기화 주기가 실패를 어떻게 다룰지는 변형별로 다릅니다.
/// - `Parse`: 규칙 단위로 보고, 배치 전체를 중단하지 않음
/// - `Transport`: 현재 주기 중단, 짧은 재시도 간격 사용
/// - `WriteNotRead`: 마지막 가져오기 시각을 기록하지 않고 다음 주기에 재확인
/// - `TooManyErrors`: 연속 실패 임계치 도달, 남은 항목을 건너뜀
/// - `PublicIdExists` / `CommunityDowngrade`: 충돌, 즉시 거부
/// - `ModuleStopped`: 종료 중, 실패가 아니라 미완료
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// 규칙 텍스트 파싱 실패
    #[error("parse error: {0}")]
    Parse(String),

    /// git / HTTP / 파일 시스템 전송 실패
    #[error("transport error: {0}")]
    Transport(String),

    /// 쓰기 후 읽기 불가
    #[error("detection {public_id} was written but could not be read back")]
    WriteNotRead { public_id: String },

    /// 연속 실패 임계치 도달
    #[error("too many consecutive errors ({count}), last error: {last}")]
    TooManyErrors { count: usize, last: String },

    /// 같은 PublicID를 가진 다른 탐지가 존재
    #[error("publicId already exists for this engine: {public_id}")]
    PublicIdExists { public_id: String },

    /// 비커뮤니티 탐지를 커뮤니티 탐지로 바꾸려는 시도
    #[error("cannot update an existing non-community detection to make it a community detection")]
    CommunityDowngrade,

    /// 커뮤니티 탐지를 직접 생성하려는 시도
    #[error("cannot create a community detection")]
    CommunityCreate,

    /// 일괄 삭제 대상에 커뮤니티 탐지가 포함됨
    #[error("cannot delete community detections")]
    CommunityDelete,

    /// 같은 PublicID가 한 배치에 두 번 등장
    #[error("duplicate detection with public ID {public_id}")]
    DuplicatePublicId { public_id: String },

    /// 모듈 정지 중 (실패가 아닌 미완료)
    #[error("module stopped")]
    ModuleStopped,

    /// 무결성 검사가 일시정지/정지로 중단됨
    #[error("integrity checker stopped")]
    IntegrityCheckerStopped,

    /// 배포 상태와 저장소 상태가 어긋남
    #[error(
        "integrity drift: {} deployed but not enabled, {} enabled but not deployed",
        deployed_not_enabled.len(),
        enabled_not_deployed.len()
    )]
    IntegrityDrift {
        deployed_not_enabled: Vec<String>,
        enabled_not_deployed: Vec<String>,
    },

    /// 무결성 검사 실패 (보고서 누락, 해시 불일치, 배포 실패 규칙)
    #[error("integrity check failed: {0}")]
    IntegrityCheckFailed(String),

    /// 컴파일러 서브프로세스 실패
    #[error("compile failed (exit code {exit_code:?}): {output}")]
    Compile {
        exit_code: Option<i32>,
        output: String,
    },

    /// 지원하지 않는 엔진 기능
    #[error("not implemented")]
    NotImplemented,

    /// 등록되지 않은 엔진 이름
    #[error("unsupported engine: {0}")]
    UnsupportedEngine(String),

    /// 저장소 에러
    #[error(transparent)]
    Store(#[from] StoreError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// 종료로 인한 미완료인지 확인합니다.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::ModuleStopped | Self::IntegrityCheckerStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_converts_to_rulekeeper_error() {
        let err = ConfigError::InvalidValue {
            field: "strelka.import_frequency_secs".to_owned(),
            reason: "must be greater than 0".to_owned(),
        };
        let top: RulekeeperError = err.into();
        assert!(matches!(top, RulekeeperError::Config(_)));
        assert!(top.to_string().contains("import_frequency_secs"));
    }

    #[test]
    fn store_error_converts_into_engine_error() {
        let err: EngineError = StoreError::NotFound {
            id: "abc".to_owned(),
        }
        .into();
        assert!(matches!(err, EngineError::Store(StoreError::NotFound { .. })));
        assert_eq!(err.to_string(), "object not found: abc");
    }

    #[test]
    fn shutdown_errors_are_distinct_from_failures() {
        assert!(EngineError::ModuleStopped.is_shutdown());
        assert!(EngineError::IntegrityCheckerStopped.is_shutdown());
        assert!(!EngineError::Transport("timeout".to_owned()).is_shutdown());
        assert!(!EngineError::CommunityDowngrade.is_shutdown());
    }

    #[test]
    fn integrity_drift_message_counts_both_sides() {
        let err = EngineError::IntegrityDrift {
            deployed_not_enabled: vec!["A".to_owned()],
            enabled_not_deployed: vec!["D".to_owned(), "E".to_owned()],
        };
        assert_eq!(
            err.to_string(),
            "integrity drift: 1 deployed but not enabled, 2 enabled but not deployed"
        );
    }

    #[test]
    fn community_downgrade_message() {
        assert_eq!(
            EngineError::CommunityDowngrade.to_string(),
            "cannot update an existing non-community detection to make it a community detection"
        );
    }
}
