//! 무결성 검사 -- 배포된 규칙 목록과 저장소의 활성화 목록 비교
//!
//! # 검사 순서
//! 1. 컴파일 보고서 읽기
//! 2. 보고서의 해시와 현재 컴파일 산출물의 SHA-256 비교 (불일치 = 오래된 보고서)
//! 3. 배포 실패 규칙이 있으면 실패
//! 4. 배포 집합(success ∪ failure)과 활성화 집합의 대칭 차집합 계산
//!
//! 각 단계 전에 일시정지 여부를 확인합니다. 로그의 ID 목록은 최대 5개까지만 남깁니다.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tracing::{Instrument, debug, error, info, info_span};

use rulekeeper_core::error::EngineError;
use rulekeeper_core::metrics::{INTEGRITY_CHECKS_TOTAL, LABEL_ENGINE, LABEL_RESULT};
use rulekeeper_core::store::{DetectionFilter, DetectionStore};
use rulekeeper_core::types::{CompilationReport, EngineKind, EngineState};

use crate::handle::TaskHandle;
use crate::state::sha256_hex;

/// 로그에 남길 ID 샘플 최대 개수
pub const SAMPLE_SIZE: usize = 5;

/// 엔진별 무결성 검사 입력
#[derive(Debug, Clone)]
pub struct IntegritySource {
    pub engine: EngineKind,
    pub report_path: PathBuf,
    /// 컴파일 산출물 (없으면 해시 검증 생략)
    pub compiled_path: Option<PathBuf>,
}

/// 배포 집합과 활성화 집합의 차이
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityDiff {
    pub deployed_not_enabled: Vec<String>,
    pub enabled_not_deployed: Vec<String>,
}

impl IntegrityDiff {
    /// 대칭 차집합을 계산합니다. 결과는 정렬되어 있습니다.
    pub fn compute<'a>(
        deployed: impl IntoIterator<Item = &'a String>,
        enabled: impl IntoIterator<Item = &'a String>,
    ) -> Self {
        let deployed: BTreeSet<&String> = deployed.into_iter().collect();
        let enabled: BTreeSet<&String> = enabled.into_iter().collect();

        Self {
            deployed_not_enabled: deployed
                .difference(&enabled)
                .map(|s| (*s).clone())
                .collect(),
            enabled_not_deployed: enabled
                .difference(&deployed)
                .map(|s| (*s).clone())
                .collect(),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.deployed_not_enabled.is_empty() && self.enabled_not_deployed.is_empty()
    }

    /// 에러로 변환합니다 (차이가 없으면 `None`).
    pub fn into_error(self) -> Option<EngineError> {
        if self.is_clean() {
            return None;
        }
        Some(EngineError::IntegrityDrift {
            deployed_not_enabled: self.deployed_not_enabled,
            enabled_not_deployed: self.enabled_not_deployed,
        })
    }
}

/// 앞에서부터 최대 [`SAMPLE_SIZE`]개
pub fn sample(ids: &[String]) -> &[String] {
    &ids[..ids.len().min(SAMPLE_SIZE)]
}

/// 컴파일 보고서를 읽습니다.
pub async fn read_compilation_report(path: &Path) -> Result<CompilationReport, EngineError> {
    let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
        EngineError::IntegrityCheckFailed(format!(
            "failed to read compilation report {}: {e}",
            path.display()
        ))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        EngineError::IntegrityCheckFailed(format!("failed to unmarshal compilation report: {e}"))
    })
}

/// 컴파일 산출물의 해시가 보고서와 같은지 확인합니다.
///
/// 산출물이 없고 보고서 해시도 비어 있으면 활성 규칙이 없는 상태로 보고 통과합니다.
pub async fn verify_compiled_hash(path: &Path, expected: &str) -> Result<(), EngineError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound && expected.is_empty() => {
            return Ok(());
        }
        Err(e) => {
            return Err(EngineError::IntegrityCheckFailed(format!(
                "failed to read compiled rules {}: {e}",
                path.display()
            )));
        }
    };

    let actual = sha256_hex(&raw);
    if !actual.eq_ignore_ascii_case(expected) {
        return Err(EngineError::IntegrityCheckFailed(format!(
            "compiled rules hash mismatch: expected {expected}, got {actual}"
        )));
    }
    Ok(())
}

/// 무결성 검사를 한 번 수행합니다.
///
/// `can_interrupt`이면 동기화가 무결성 검사를 일시정지했을 때 `IntegrityCheckerStopped`로
/// 빠져나옵니다.
pub async fn check(
    source: &IntegritySource,
    store: &dyn DetectionStore,
    handle: &TaskHandle,
    can_interrupt: bool,
) -> Result<(), EngineError> {
    let escape = || -> Result<(), EngineError> {
        if can_interrupt && handle.is_integrity_paused() {
            return Err(EngineError::IntegrityCheckerStopped);
        }
        Ok(())
    };
    escape()?;

    let span = info_span!(
        "integrity_check",
        engine = %source.engine,
        int_check_id = %uuid::Uuid::new_v4()
    );

    let result = async {
        let report = read_compilation_report(&source.report_path)
            .await
            .inspect_err(|e| error!(error = %e, "unable to get compilation report"))?;

        if let Some(compiled) = &source.compiled_path {
            verify_compiled_hash(compiled, &report.compiled_rules_hash)
                .await
                .inspect_err(|e| {
                    error!(
                        error = %e,
                        "compiled rules hash mismatch, this report is not for the latest compiled rules"
                    )
                })?;
        }

        debug!(
            successfully_deployed = report.success.len(),
            failed_to_deploy = report.failure.len(),
            last_deployed = %report.timestamp,
            compiled_hash = %report.compiled_rules_hash,
            "deployed rules"
        );

        if !report.failure.is_empty() {
            error!(
                failed_public_ids = ?sample(&report.failure),
                "integrity check failed because some rules failed to deploy"
            );
            return Err(EngineError::IntegrityCheckFailed(format!(
                "{} rules failed to deploy",
                report.failure.len()
            )));
        }
        escape()?;

        let deployed = report.deployed();
        escape()?;

        let enabled = store
            .get_all_detections(DetectionFilter::engine(source.engine).enabled(true))
            .await
            .inspect_err(|e| error!(error = %e, "unable to query for enabled detections"))?;
        debug!(enabled_detections_count = enabled.len(), "enabled detections");

        if can_interrupt && handle.is_integrity_paused() {
            info!("integrity checker stopped");
            return Err(EngineError::IntegrityCheckerStopped);
        }

        let diff = IntegrityDiff::compute(&deployed, enabled.keys());
        info!(
            deployed_but_not_enabled = ?sample(&diff.deployed_not_enabled),
            enabled_but_not_deployed = ?sample(&diff.enabled_not_deployed),
            "integrity check report"
        );

        match diff.into_error() {
            Some(err) => {
                info!("integrity check failed");
                Err(err)
            }
            None => {
                info!("integrity check passed");
                Ok(())
            }
        }
    }
    .instrument(span)
    .await;

    if !matches!(result, Err(EngineError::IntegrityCheckerStopped)) {
        let outcome = if result.is_ok() { "pass" } else { "fail" };
        counter!(
            INTEGRITY_CHECKS_TOTAL,
            LABEL_ENGINE => source.engine.as_str(),
            LABEL_RESULT => outcome
        )
        .increment(1);
    }

    result
}

/// 주기적 무결성 검사 루프
///
/// 동기화가 진행 중(일시정지)이면 그 주기는 건너뜁니다.
pub async fn integrity_loop(
    source: IntegritySource,
    store: Arc<dyn DetectionStore>,
    handle: Arc<TaskHandle>,
    state: Arc<EngineState>,
    period: Duration,
) {
    info!(engine = %source.engine, period_secs = period.as_secs(), "integrity checker started");

    while handle.wait_integrity(period).await {
        match check(&source, store.as_ref(), &handle, true).await {
            Ok(()) => state.set_integrity_failure(false),
            Err(EngineError::IntegrityCheckerStopped) => {
                debug!(engine = %source.engine, "integrity check skipped while sync is running");
            }
            Err(e) => {
                error!(engine = %source.engine, error = %e, "integrity check failed");
                state.set_integrity_failure(true);
            }
        }
    }

    info!(engine = %source.engine, "integrity checker stopped");
}
