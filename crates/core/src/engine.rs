//! 탐지 엔진 trait -- 모든 구체 엔진(YARA, Suricata, Sigma)이 구현하는 계약
//!
//! [`DetectionEngine`]은 RPITIT를 사용하므로 `dyn`으로 쓸 수 없습니다.
//! 코디네이터와 레지스트리는 blanket impl로 자동 구현되는
//! [`DynDetectionEngine`]을 통해 엔진을 다룹니다.
//!
//! # 생명주기
//! ```text
//! new() → start() → Running (sync + integrity 태스크) → stop() → Stopped
//! ```

use std::future::Future;

use crate::error::{EngineError, RulekeeperError};
use crate::pipeline::{BoxFuture, HealthStatus};
use crate::types::{Detection, EngineKind, EngineStateSnapshot, ErrorMap, User};

/// 요청 컨텍스트
///
/// 작성자 표기를 위해 요청한 사용자를 담습니다.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub user: User,
}

impl RequestContext {
    pub fn new(user: User) -> Self {
        Self { user }
    }
}

/// 탐지 엔진 trait
///
/// 엔진은 코디네이터와 데몬이 `Arc`로 공유하므로 모든 메서드가 `&self`를 받습니다.
/// 백그라운드 태스크 상태는 내부 가변성으로 관리합니다.
pub trait DetectionEngine: Send + Sync {
    /// 엔진 종류
    fn kind(&self) -> EngineKind;

    /// 백그라운드 태스크(커뮤니티 동기화, 무결성 검사)를 시작합니다.
    fn start(&self) -> impl Future<Output = Result<(), RulekeeperError>> + Send;

    /// 백그라운드 태스크를 정지하고 종료를 기다립니다.
    fn stop(&self) -> impl Future<Output = Result<(), RulekeeperError>> + Send;

    /// 건강 상태
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;

    /// 실행 중 여부
    fn is_running(&self) -> bool;

    /// 규칙 텍스트를 검증하고 정규화된 텍스트를 반환합니다.
    fn validate_rule(&self, content: &str) -> Result<String, EngineError>;

    /// `content`에서 PublicID, 제목, 심각도 등을 추출해 채웁니다.
    fn extract_details(&self, detection: &mut Detection) -> Result<(), EngineError>;

    /// 구분 가능한 이름을 가진 사본을 만들고 요청자를 작성자에 추가합니다.
    fn duplicate_detection(
        &self,
        ctx: &RequestContext,
        detection: &Detection,
    ) -> impl Future<Output = Result<Detection, EngineError>> + Send;

    /// 다른 엔진 언어로 변환합니다.
    fn convert_rule(
        &self,
        detection: &Detection,
    ) -> impl Future<Output = Result<String, EngineError>> + Send;

    /// 사용되지 않은 PublicID를 생성합니다.
    fn generate_unused_public_id(&self)
    -> impl Future<Output = Result<String, EngineError>> + Send;

    /// 활성화된 탐지를 엔진 런타임 설정에 반영합니다.
    fn sync_local_detections(
        &self,
        detections: &[Detection],
    ) -> impl Future<Output = Result<ErrorMap, EngineError>> + Send;

    /// 대기 중인 동기화 주기를 깨웁니다. 이미 신호가 있으면 합쳐집니다.
    fn interrupt_sync(&self, full_upgrade: bool, notify: bool);

    /// 배포 상태와 활성화 상태를 비교합니다.
    fn integrity_check(
        &self,
        can_interrupt: bool,
    ) -> impl Future<Output = Result<(), EngineError>> + Send;

    /// 관측용 상태 스냅샷
    fn state(&self) -> EngineStateSnapshot;
}

// ─── DynDetectionEngine Trait ────────────────────────────────────────

/// dyn-compatible 탐지 엔진 trait
pub trait DynDetectionEngine: Send + Sync {
    fn kind(&self) -> EngineKind;

    fn start(&self) -> BoxFuture<'_, Result<(), RulekeeperError>>;

    fn stop(&self) -> BoxFuture<'_, Result<(), RulekeeperError>>;

    fn health_check(&self) -> BoxFuture<'_, HealthStatus>;

    fn is_running(&self) -> bool;

    fn validate_rule(&self, content: &str) -> Result<String, EngineError>;

    fn extract_details(&self, detection: &mut Detection) -> Result<(), EngineError>;

    fn duplicate_detection<'a>(
        &'a self,
        ctx: &'a RequestContext,
        detection: &'a Detection,
    ) -> BoxFuture<'a, Result<Detection, EngineError>>;

    fn convert_rule<'a>(&'a self, detection: &'a Detection)
    -> BoxFuture<'a, Result<String, EngineError>>;

    fn generate_unused_public_id(&self) -> BoxFuture<'_, Result<String, EngineError>>;

    fn sync_local_detections<'a>(
        &'a self,
        detections: &'a [Detection],
    ) -> BoxFuture<'a, Result<ErrorMap, EngineError>>;

    fn interrupt_sync(&self, full_upgrade: bool, notify: bool);

    fn integrity_check(&self, can_interrupt: bool) -> BoxFuture<'_, Result<(), EngineError>>;

    fn state(&self) -> EngineStateSnapshot;
}

/// DetectionEngine을 구현한 타입은 자동으로 DynDetectionEngine도 구현됩니다.
impl<T: DetectionEngine> DynDetectionEngine for T {
    fn kind(&self) -> EngineKind {
        DetectionEngine::kind(self)
    }

    fn start(&self) -> BoxFuture<'_, Result<(), RulekeeperError>> {
        Box::pin(DetectionEngine::start(self))
    }

    fn stop(&self) -> BoxFuture<'_, Result<(), RulekeeperError>> {
        Box::pin(DetectionEngine::stop(self))
    }

    fn health_check(&self) -> BoxFuture<'_, HealthStatus> {
        Box::pin(DetectionEngine::health_check(self))
    }

    fn is_running(&self) -> bool {
        DetectionEngine::is_running(self)
    }

    fn validate_rule(&self, content: &str) -> Result<String, EngineError> {
        DetectionEngine::validate_rule(self, content)
    }

    fn extract_details(&self, detection: &mut Detection) -> Result<(), EngineError> {
        DetectionEngine::extract_details(self, detection)
    }

    fn duplicate_detection<'a>(
        &'a self,
        ctx: &'a RequestContext,
        detection: &'a Detection,
    ) -> BoxFuture<'a, Result<Detection, EngineError>> {
        Box::pin(DetectionEngine::duplicate_detection(self, ctx, detection))
    }

    fn convert_rule<'a>(
        &'a self,
        detection: &'a Detection,
    ) -> BoxFuture<'a, Result<String, EngineError>> {
        Box::pin(DetectionEngine::convert_rule(self, detection))
    }

    fn generate_unused_public_id(&self) -> BoxFuture<'_, Result<String, EngineError>> {
        Box::pin(DetectionEngine::generate_unused_public_id(self))
    }

    fn sync_local_detections<'a>(
        &'a self,
        detections: &'a [Detection],
    ) -> BoxFuture<'a, Result<ErrorMap, EngineError>> {
        Box::pin(DetectionEngine::sync_local_detections(self, detections))
    }

    fn interrupt_sync(&self, full_upgrade: bool, notify: bool) {
        DetectionEngine::interrupt_sync(self, full_upgrade, notify)
    }

    fn integrity_check(&self, can_interrupt: bool) -> BoxFuture<'_, Result<(), EngineError>> {
        Box::pin(DetectionEngine::integrity_check(self, can_interrupt))
    }

    fn state(&self) -> EngineStateSnapshot {
        DetectionEngine::state(self)
    }
}
