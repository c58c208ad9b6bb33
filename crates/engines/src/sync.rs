//! 커뮤니티 규칙 동기화 -- 엔진 공통 대기/가져오기/조정 루프
//!
//! 엔진은 [`CommunitySource`]로 규칙 원천(git 저장소, 규칙 파일, HTTP 패키지)과
//! 런타임 반영 방법만 제공하고, 주기 관리와 저장소 조정은 이 모듈이 담당합니다.
//!
//! # 주기
//! ```text
//! wait (timer | interrupt | cancel)
//!   → write-not-read 재확인 → 인덱스 템플릿 확인 (프로세스당 1회)
//!   → fetch (변경 없음 + 강제 아님 → 상태 파일만 기록)
//!   → 기존 커뮤니티 탐지 조회 → PublicID 중복 제거 → create / update / delete
//!   → 런타임 반영 → 상태 파일 기록 → 상태 알림 → 무결성 검사
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use tracing::{debug, error, info, warn};

use rulekeeper_core::config::SyncTiming;
use rulekeeper_core::error::{EngineError, StoreError};
use rulekeeper_core::event::{SyncNotifier, SyncOutcome};
use rulekeeper_core::metrics::{
    DETECTIONS_CREATED_TOTAL, DETECTIONS_DELETED_TOTAL, DETECTIONS_UPDATED_TOTAL, ENGINE_STATE,
    LABEL_ENGINE, LABEL_FLAG, LABEL_STATUS, SYNC_ABORTED_TOTAL, SYNC_CYCLES_TOTAL,
    SYNC_DURATION_SECONDS,
};
use rulekeeper_core::pipeline::HealthStatus;
use rulekeeper_core::store::{DetectionFilter, DetectionStore};
use rulekeeper_core::types::{Detection, EngineKind, EngineState, ErrorMap};

use crate::error_tracker::ErrorTracker;
use crate::handle::{TaskHandle, Wake};
use crate::state::{determine_wait_time, write_state_file};

/// 엔진이 공유하는 외부 협력자
#[derive(Clone)]
pub struct EngineContext {
    pub store: Arc<dyn DetectionStore>,
    pub notifier: SyncNotifier,
    /// 가져오기 전에 존재해야 하는 인덱스 템플릿
    pub template_name: String,
}

impl EngineContext {
    pub fn new(store: Arc<dyn DetectionStore>, notifier: SyncNotifier, template_name: &str) -> Self {
        Self {
            store,
            notifier,
            template_name: template_name.to_owned(),
        }
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("template_name", &self.template_name)
            .finish_non_exhaustive()
    }
}

// ─── Reconcile ───────────────────────────────────────────────────────

/// 새 커뮤니티 탐지의 활성화 규칙
#[derive(Debug, Clone, Copy)]
pub enum Enablement<'a> {
    /// 기존 탐지는 활성화 상태를 유지하고, 새 탐지는 룰셋이 목록에 있을 때만 활성화
    PreserveExisting { auto_enabled_rulesets: &'a [String] },
    /// 원천에서 계산한 `is_enabled`를 그대로 사용
    FromSource,
}

/// 조정 결과
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    /// PublicID → 에러 메시지
    pub errors: ErrorMap,
    /// 쓰기는 성공했지만 다시 읽히지 않은 PublicID
    pub write_not_read: Option<String>,
    /// 연속 실패 임계치 도달
    pub aborted: Option<EngineError>,
}

/// 같은 PublicID는 마지막 항목이 이깁니다. 첫 등장 순서는 유지합니다.
pub fn dedup_by_public_id(detections: Vec<Detection>) -> Vec<Detection> {
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut out: Vec<Detection> = Vec::with_capacity(detections.len());

    for det in detections {
        match positions.get(&det.public_id) {
            Some(&i) => out[i] = det,
            None => {
                positions.insert(det.public_id.clone(), out.len());
                out.push(det);
            }
        }
    }
    out
}

fn auto_enabled(rulesets: &[String], ruleset: &str) -> bool {
    rulesets.iter().any(|r| r.eq_ignore_ascii_case(ruleset))
}

fn is_write_not_read(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::NotFound { .. } | StoreError::WriteNotVisible { .. }
    )
}

/// 파싱한 커뮤니티 탐지를 저장소의 기존 커뮤니티 탐지와 맞춥니다.
///
/// 내용이나 룰셋이 바뀌었거나 원천이 튜닝을 담고 있으면 ID, 튜닝, 생성 시각을 유지한 채 갱신합니다.
/// 쓰기 후 읽기 실패나 연속 실패 임계치에 닿으면 삭제 단계 없이 멈춥니다.
/// 정지 신호를 받으면 `ModuleStopped`를 반환합니다.
pub async fn reconcile(
    store: &dyn DetectionStore,
    handle: &TaskHandle,
    engine: EngineKind,
    existing: &BTreeMap<String, Detection>,
    parsed: Vec<Detection>,
    enablement: Enablement<'_>,
    max_consecutive_errors: usize,
) -> Result<ReconcileOutcome, EngineError> {
    let mut outcome = ReconcileOutcome::default();
    let mut to_delete: BTreeSet<&String> = existing.keys().collect();
    let mut tracker = ErrorTracker::new(max_consecutive_errors);

    for mut det in parsed {
        handle.check_running()?;
        let public_id = det.public_id.clone();
        debug!(engine = %engine, public_id = %public_id, title = %det.title, "processing community rule");

        if let Some(old) = existing.get(&public_id) {
            to_delete.remove(&public_id);

            if old.content == det.content && old.ruleset == det.ruleset && det.overrides.is_empty()
            {
                outcome.unchanged += 1;
                continue;
            }

            if let Enablement::PreserveExisting { .. } = enablement {
                det.is_enabled = old.is_enabled;
            }
            det.id = old.id.clone();
            det.overrides = old.overrides.clone();
            det.create_time = old.create_time;

            let result = store.update_detection(det).await;
            if let Err(e) = &result
                && is_write_not_read(e)
            {
                error!(engine = %engine, public_id = %public_id, "unable to read back successful write");
                outcome.write_not_read = Some(public_id);
                break;
            }
            let tracked = tracker.record(&result);
            match result {
                Ok(_) => outcome.updated += 1,
                Err(e) => {
                    warn!(engine = %engine, public_id = %public_id, error = %e, "failed to update detection");
                    outcome
                        .errors
                        .insert(public_id, format!("unable to update detection; reason={e}"));
                }
            }
            if let Err(abort) = tracked {
                outcome.aborted = Some(abort);
                break;
            }
        } else {
            if let Enablement::PreserveExisting {
                auto_enabled_rulesets,
            } = enablement
            {
                det.is_enabled = auto_enabled(auto_enabled_rulesets, &det.ruleset);
            }

            let result = store.create_detection(det).await;
            if let Err(e) = &result
                && is_write_not_read(e)
            {
                error!(engine = %engine, public_id = %public_id, "unable to read back successful write");
                outcome.write_not_read = Some(public_id);
                break;
            }
            let tracked = tracker.record(&result);
            match result {
                Ok(_) => outcome.created += 1,
                Err(e) => {
                    warn!(engine = %engine, public_id = %public_id, error = %e, "failed to create detection");
                    outcome
                        .errors
                        .insert(public_id, format!("unable to create detection; reason={e}"));
                }
            }
            if let Err(abort) = tracked {
                outcome.aborted = Some(abort);
                break;
            }
        }
    }

    if outcome.aborted.is_none() && outcome.write_not_read.is_none() {
        for public_id in to_delete {
            handle.check_running()?;
            let Some(old) = existing.get(public_id) else {
                continue;
            };
            match store.delete_detection(&old.id).await {
                Ok(_) => outcome.deleted += 1,
                Err(e) => {
                    warn!(engine = %engine, public_id = %public_id, error = %e, "failed to delete unreferenced community detection");
                    outcome.errors.insert(
                        public_id.clone(),
                        format!("unable to delete detection; reason={e}"),
                    );
                }
            }
        }
    }

    let engine_label = engine.as_str();
    counter!(DETECTIONS_CREATED_TOTAL, LABEL_ENGINE => engine_label).increment(outcome.created as u64);
    counter!(DETECTIONS_UPDATED_TOTAL, LABEL_ENGINE => engine_label).increment(outcome.updated as u64);
    counter!(DETECTIONS_DELETED_TOTAL, LABEL_ENGINE => engine_label).increment(outcome.deleted as u64);

    info!(
        engine = %engine,
        added = outcome.created,
        updated = outcome.updated,
        removed = outcome.deleted,
        unchanged = outcome.unchanged,
        errors = outcome.errors.len(),
        "community diff"
    );

    Ok(outcome)
}

/// 이전 주기에서 읽히지 않은 쓰기가 이제 보이는지 확인합니다.
///
/// 여전히 보이지 않으면 `false`입니다.
pub async fn recheck_write_not_read(
    store: &dyn DetectionStore,
    engine: EngineKind,
    public_id: &str,
) -> bool {
    match store.get_detection_by_public_id(engine, public_id).await {
        Ok(Some(_)) => {
            info!(engine = %engine, public_id, "previously unreadable write is now visible");
            true
        }
        Ok(None) => {
            warn!(engine = %engine, public_id, "detection written last cycle is still not readable");
            false
        }
        Err(e) => {
            error!(engine = %engine, public_id, error = %e, "unable to recheck unreadable write");
            false
        }
    }
}

// ─── Community Source ────────────────────────────────────────────────

/// 원천에서 가져온 커뮤니티 규칙
#[derive(Debug, Default)]
pub struct FetchedRules {
    pub detections: Vec<Detection>,
    /// 파일/패키지 단위 에러 (부분 성공)
    pub errors: ErrorMap,
    /// 원천 내용의 지문 (반영 성공 후 기록)
    pub fingerprint: Option<String>,
}

/// 한 주기의 결과
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// 변경이 없어 조정을 건너뛰었는지
    pub skipped: bool,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub deleted: usize,
    pub errors: ErrorMap,
}

impl CycleReport {
    /// 알림에 사용할 결과
    pub fn status(&self) -> SyncOutcome {
        if self.errors.is_empty() {
            SyncOutcome::Success
        } else {
            SyncOutcome::Partial
        }
    }
}

/// 엔진별 커뮤니티 규칙 원천
pub(crate) trait CommunitySource: Send + Sync + 'static {
    fn kind(&self) -> EngineKind;

    fn context(&self) -> &EngineContext;

    fn handle(&self) -> &TaskHandle;

    fn engine_state(&self) -> &EngineState;

    fn timing(&self) -> SyncTiming;

    fn state_file(&self) -> &Path;

    fn enablement(&self) -> Enablement<'_>;

    /// 규칙을 가져옵니다. 변경이 없고 강제가 아니면 `None`입니다.
    fn fetch(
        &self,
        force: bool,
    ) -> impl Future<Output = Result<Option<FetchedRules>, EngineError>> + Send;

    /// 조정이 끝난 뒤 런타임에 반영합니다. `errors`는 지금까지 모인 에러 맵입니다.
    fn apply(
        &self,
        fingerprint: Option<&str>,
        errors: &ErrorMap,
    ) -> impl Future<Output = Result<ErrorMap, EngineError>> + Send;

    fn integrity(&self, can_interrupt: bool) -> impl Future<Output = Result<(), EngineError>> + Send;
}

/// 인덱스 템플릿이 있는지 확인합니다.
async fn ensure_template(context: &EngineContext) -> Result<(), EngineError> {
    let exists = context
        .store
        .does_template_exist(&context.template_name)
        .await
        .inspect_err(|e| error!(error = %e, "unable to check for detection index template"))?;
    if !exists {
        warn!(template = %context.template_name, "detection index template does not exist, skipping import");
        return Err(EngineError::Transport(format!(
            "detection index template {} does not exist",
            context.template_name
        )));
    }
    Ok(())
}

/// 동기화 한 주기를 실행합니다.
///
/// `template_found`가 `false`이면 먼저 인덱스 템플릿을 확인하고 결과를 기억합니다.
pub(crate) async fn run_cycle<S: CommunitySource>(
    source: &S,
    force: bool,
    template_found: &mut bool,
) -> Result<CycleReport, EngineError> {
    let kind = source.kind();
    let context = source.context();

    if !*template_found {
        ensure_template(context).await?;
        *template_found = true;
    }

    let Some(fetched) = source.fetch(force).await? else {
        info!(engine = %kind, "community sync found no changes");
        write_state_file(source.state_file()).await;
        return Ok(CycleReport {
            skipped: true,
            ..CycleReport::default()
        });
    };
    source.handle().check_running()?;

    let existing = context
        .store
        .get_all_detections(DetectionFilter::engine(kind).community(true))
        .await
        .inspect_err(|e| error!(engine = %kind, error = %e, "failed to get community detections"))?;

    let FetchedRules {
        detections,
        errors: fetch_errors,
        fingerprint,
    } = fetched;
    let parsed = dedup_by_public_id(detections);
    let outcome = reconcile(
        context.store.as_ref(),
        source.handle(),
        kind,
        &existing,
        parsed,
        source.enablement(),
        source.timing().fail_after_consecutive_errors,
    )
    .await?;

    if let Some(abort) = outcome.aborted {
        return Err(abort);
    }
    if let Some(public_id) = outcome.write_not_read {
        return Err(EngineError::WriteNotRead { public_id });
    }

    let mut errors = fetch_errors;
    errors.extend(outcome.errors);
    let apply_errors = source.apply(fingerprint.as_deref(), &errors).await?;
    errors.extend(apply_errors);

    write_state_file(source.state_file()).await;

    Ok(CycleReport {
        skipped: false,
        created: outcome.created,
        updated: outcome.updated,
        unchanged: outcome.unchanged,
        deleted: outcome.deleted,
        errors,
    })
}

/// 커뮤니티 동기화 백그라운드 루프
///
/// `last_sync_success`는 세 상태를 가집니다.
/// - `None`: 아직 주기를 돈 적 없음, 상태 파일 기반 대기 시간 사용
/// - `Some(true)`: 정상 간격
/// - `Some(false)`: 짧은 재시도 간격 + 강제 동기화
pub(crate) async fn run_sync_loop<S: CommunitySource>(source: Arc<S>) {
    let kind = source.kind();
    let handle = source.handle();
    let state = source.engine_state();
    let timing = source.timing();
    let frequency = Duration::from_secs(timing.import_frequency_secs);
    let error_retry = Duration::from_secs(timing.error_retry_secs);

    let (mut last_import, mut wait) = determine_wait_time(source.state_file(), frequency).await;
    let mut last_sync_success: Option<bool> = None;
    let mut write_not_read: Option<String> = None;
    let mut template_found = false;

    loop {
        if last_import.is_none() && last_sync_success == Some(true) {
            last_import = u64::try_from(Utc::now().timestamp()).ok();
        }

        state.set_syncing(false);
        state.set_importing(last_import.is_none());
        state.set_migrating(false);
        state.set_sync_failure(last_sync_success == Some(false));
        publish_state(kind, state);

        handle.reset_interrupt().await;

        let mut force = false;
        match last_sync_success {
            Some(true) => wait = frequency,
            Some(false) => {
                wait = error_retry;
                force = true;
            }
            None => {}
        }

        info!(
            engine = %kind,
            wait_time_secs = wait.as_secs(),
            force_sync = force,
            last_sync_success = ?last_sync_success,
            "waiting for next community rules sync"
        );

        handle.resume_integrity();
        let wake = handle.wait(wait).await;
        handle.pause_integrity();

        match wake {
            Wake::Cancelled => break,
            Wake::Interrupt { full } => force |= full,
            Wake::Timer => {}
        }

        last_sync_success = Some(false);
        let notify = handle.should_notify();

        if let Some(public_id) = &write_not_read {
            if !recheck_write_not_read(source.context().store.as_ref(), kind, public_id).await {
                broadcast(source.context(), kind, SyncOutcome::Error, notify);
                record_cycle(kind, SyncOutcome::Error, None);
                continue;
            }
            write_not_read = None;
        }

        force |= last_import.is_none();
        info!(engine = %kind, force_sync = force, "syncing community rules");
        state.set_syncing(true);
        publish_state(kind, state);
        let started = Instant::now();

        match run_cycle(source.as_ref(), force, &mut template_found).await {
            Ok(report) => {
                let status = report.status();
                broadcast(source.context(), kind, status, notify);
                record_cycle(kind, status, Some(started.elapsed()));

                let integrity = source.integrity(false).await;
                state.set_integrity_failure(integrity.is_err());
                last_sync_success = Some(integrity.is_ok());

                match &integrity {
                    Ok(()) => info!(engine = %kind, "post-sync integrity check passed"),
                    Err(e) => error!(engine = %kind, error = %e, "post-sync integrity check failed"),
                }
                info!(
                    engine = %kind,
                    skipped = report.skipped,
                    errors = report.errors.len(),
                    duration_secs = started.elapsed().as_secs_f64(),
                    "community rules sync finished"
                );
            }
            Err(EngineError::ModuleStopped) => {
                info!(engine = %kind, "incomplete sync of community detections due to module stopping");
                break;
            }
            Err(EngineError::WriteNotRead { public_id }) => {
                warn!(engine = %kind, public_id = %public_id, "detection was written but not read back, rechecking before next sync");
                write_not_read = Some(public_id);
                broadcast(source.context(), kind, SyncOutcome::Error, notify);
                record_cycle(kind, SyncOutcome::Error, Some(started.elapsed()));
            }
            Err(e) => {
                if matches!(e, EngineError::TooManyErrors { .. }) {
                    counter!(SYNC_ABORTED_TOTAL, LABEL_ENGINE => kind.as_str()).increment(1);
                }
                error!(engine = %kind, error = %e, "unable to sync community detections");
                broadcast(source.context(), kind, SyncOutcome::Error, notify);
                record_cycle(kind, SyncOutcome::Error, Some(started.elapsed()));
            }
        }
    }

    state.set_syncing(false);
    publish_state(kind, state);
    info!(engine = %kind, "community sync loop stopped");
}

fn broadcast(context: &EngineContext, kind: EngineKind, status: SyncOutcome, notify: bool) {
    if notify {
        context.notifier.notify(kind, status);
    }
}

/// 핸들과 상태 플래그로 건강 상태를 판단합니다.
pub(crate) fn engine_health(handle: &TaskHandle, state: &EngineState) -> HealthStatus {
    if !handle.is_running() {
        return HealthStatus::Unhealthy("engine not running".to_owned());
    }
    let snap = state.snapshot();
    match (snap.sync_failure, snap.integrity_failure) {
        (false, false) => HealthStatus::Healthy,
        (true, false) => HealthStatus::Degraded("last community sync failed".to_owned()),
        (false, true) => HealthStatus::Degraded("integrity check failed".to_owned()),
        (true, true) => HealthStatus::Degraded(
            "last community sync and integrity check failed".to_owned(),
        ),
    }
}

// ─── Metrics ─────────────────────────────────────────────────────────

fn record_cycle(kind: EngineKind, status: SyncOutcome, duration: Option<Duration>) {
    let status_label = match status {
        SyncOutcome::Success => "success",
        SyncOutcome::Partial => "partial",
        SyncOutcome::Error => "error",
    };
    counter!(SYNC_CYCLES_TOTAL, LABEL_ENGINE => kind.as_str(), LABEL_STATUS => status_label)
        .increment(1);
    if let Some(duration) = duration {
        histogram!(SYNC_DURATION_SECONDS, LABEL_ENGINE => kind.as_str())
            .record(duration.as_secs_f64());
    }
}

/// 엔진 상태 플래그를 게이지로 내보냅니다.
pub fn publish_state(kind: EngineKind, state: &EngineState) {
    let snap = state.snapshot();
    let flags = [
        ("syncing", snap.syncing),
        ("importing", snap.importing),
        ("migrating", snap.migrating),
        ("sync_failure", snap.sync_failure),
        ("integrity_failure", snap.integrity_failure),
    ];
    for (flag, value) in flags {
        gauge!(ENGINE_STATE, LABEL_ENGINE => kind.as_str(), LABEL_FLAG => flag)
            .set(if value { 1.0 } else { 0.0 });
    }
}
