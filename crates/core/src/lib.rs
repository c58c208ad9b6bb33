//! Rulekeeper 공통 크레이트 -- 탐지 규칙 관리의 타입, trait, 에러, 설정, 저장소 계약
//!
//! 모든 Rulekeeper 크레이트가 의존하는 기반 크레이트입니다.
//! 파서(`rulekeeper-rules`)와 엔진(`rulekeeper-engines`)은 이 크레이트의
//! 타입과 계약만을 공유합니다.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod metrics;
pub mod pipeline;
pub mod registry;
pub mod store;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{
    ConfigError, EngineError, PipelineError, RegistryError, RulekeeperError, StoreError,
};

// 설정
pub use config::RulekeeperConfig;

// 이벤트
pub use event::{SyncNotifier, SyncOutcome, SyncStatus};

// 엔진 trait
pub use engine::{DetectionEngine, DynDetectionEngine, RequestContext};
pub use pipeline::{BoxFuture, HealthStatus};
pub use registry::EngineRegistry;

// 저장소 계약
pub use store::{
    Authorizer, DetectionFilter, DetectionStore, MemoryDetectionStore, MemorySettingsStore,
    Setting, SettingsStore,
};

// 도메인 타입
pub use types::{
    CompilationReport, Detection, EngineKind, EngineState, EngineStateSnapshot, ErrorMap,
    Language, Override, OverrideType, RuleRepo, Severity, User,
};
