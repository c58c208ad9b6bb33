//! 엔진 레지스트리 -- 엔진 등록, 종류별 조회, 일괄 생명주기 관리
//!
//! 엔진은 [`EngineKind`]로 조회합니다. 등록 순서대로 시작하고
//! 역순으로 정지합니다.

use std::sync::Arc;

use crate::engine::DynDetectionEngine;
use crate::error::{RegistryError, RulekeeperError};
use crate::pipeline::HealthStatus;
use crate::types::{EngineKind, EngineStateSnapshot};

/// 엔진 레지스트리
///
/// # 사용 예시
/// ```ignore
/// let mut registry = EngineRegistry::new();
/// registry.register(Arc::new(strelka))?;
/// registry.register(Arc::new(suricata))?;
///
/// registry.start_all().await?;
/// // ... 실행 중 ...
/// registry.stop_all().await?;
/// ```
#[derive(Clone, Default)]
pub struct EngineRegistry {
    engines: Vec<Arc<dyn DynDetectionEngine>>,
}

impl EngineRegistry {
    /// 빈 레지스트리를 생성합니다.
    pub fn new() -> Self {
        Self {
            engines: Vec::new(),
        }
    }

    /// 엔진을 등록합니다. 같은 종류가 이미 있으면 에러입니다.
    pub fn register(&mut self, engine: Arc<dyn DynDetectionEngine>) -> Result<(), RulekeeperError> {
        let kind = engine.kind();
        if self.engines.iter().any(|e| e.kind() == kind) {
            return Err(RegistryError::AlreadyRegistered {
                name: kind.to_string(),
            }
            .into());
        }
        self.engines.push(engine);
        Ok(())
    }

    /// 엔진을 해제하고 반환합니다.
    pub fn unregister(
        &mut self,
        kind: EngineKind,
    ) -> Result<Arc<dyn DynDetectionEngine>, RulekeeperError> {
        match self.engines.iter().position(|e| e.kind() == kind) {
            Some(idx) => Ok(self.engines.remove(idx)),
            None => Err(RegistryError::NotFound {
                name: kind.to_string(),
            }
            .into()),
        }
    }

    /// 종류로 엔진을 조회합니다.
    pub fn get(&self, kind: EngineKind) -> Option<&Arc<dyn DynDetectionEngine>> {
        self.engines.iter().find(|e| e.kind() == kind)
    }

    /// 등록된 엔진 종류 목록 (등록 순서)
    pub fn kinds(&self) -> Vec<EngineKind> {
        self.engines.iter().map(|e| e.kind()).collect()
    }

    /// 등록된 엔진 수
    pub fn count(&self) -> usize {
        self.engines.len()
    }

    /// 모든 엔진을 등록 순서대로 시작합니다.
    ///
    /// 첫 번째 실패 시 즉시 반환합니다.
    /// 이미 시작된 엔진은 롤백하지 않으므로, 호출자가 `stop_all`을 호출해야 합니다.
    pub async fn start_all(&self) -> Result<(), RulekeeperError> {
        for engine in &self.engines {
            engine.start().await?;
        }
        Ok(())
    }

    /// 모든 엔진을 역순으로 정지합니다.
    ///
    /// 개별 엔진 정지 실패 시에도 나머지 정지를 계속하고 모든 에러를 모아 반환합니다.
    pub async fn stop_all(&self) -> Result<(), RulekeeperError> {
        let mut errors = Vec::new();
        for engine in self.engines.iter().rev() {
            if let Err(e) = engine.stop().await {
                errors.push(format!("{}: {}", engine.kind(), e));
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(RegistryError::StopFailed(errors.join("; ")).into())
        }
    }

    /// 모든 엔진의 건강 상태를 조회합니다.
    pub async fn health_check_all(&self) -> Vec<(EngineKind, HealthStatus)> {
        let mut statuses = Vec::new();
        for engine in &self.engines {
            statuses.push((engine.kind(), engine.health_check().await));
        }
        statuses
    }

    /// 모든 엔진의 상태 스냅샷
    pub fn states(&self) -> Vec<(EngineKind, EngineStateSnapshot)> {
        self.engines.iter().map(|e| (e.kind(), e.state())).collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
