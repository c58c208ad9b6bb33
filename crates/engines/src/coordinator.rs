//! 탐지 코디네이터 -- 저장 전 정리, 엔진별 배치 배포, 일괄 작업
//!
//! 변경된 탐지를 엔진별로 묶어 해당 엔진의 `sync_local_detections`만 호출하고
//! 결과 에러 맵을 합칩니다. 한 엔진의 실패는 다른 엔진으로의 배포를 막지 않습니다.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{error, info, warn};

use rulekeeper_core::engine::{DynDetectionEngine, RequestContext};
use rulekeeper_core::error::{EngineError, StoreError};
use rulekeeper_core::registry::EngineRegistry;
use rulekeeper_core::store::{Authorizer, DetectionStore};
use rulekeeper_core::types::{
    Detection, EngineKind, EngineStateSnapshot, ErrorMap, Override, RULESET_CUSTOM,
};

/// 권한 검사 대상 리소스
const RESOURCE_DETECTIONS: &str = "detections";
/// 로그에 남길 에러 샘플 최대 개수
const ERROR_SAMPLE_SIZE: usize = 10;

/// 일괄 작업 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkAction {
    Enable,
    Disable,
    Delete,
}

impl BulkAction {
    fn verb(self) -> &'static str {
        match self {
            Self::Enable | Self::Disable => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::str::FromStr for BulkAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "enable" => Ok(Self::Enable),
            "disable" => Ok(Self::Disable),
            "delete" => Ok(Self::Delete),
            other => Err(format!(
                "invalid status {other:?}; must be 'enable', 'disable' or 'delete'"
            )),
        }
    }
}

/// 엔진별 배포 결과
#[derive(Debug, Default)]
pub struct LocalSyncResult {
    /// PublicID → 에러 메시지
    pub errors: ErrorMap,
    /// 배포 자체가 실패한 엔진
    pub engine_errors: BTreeMap<EngineKind, EngineError>,
}

impl LocalSyncResult {
    /// 엔진 실패가 있으면 첫 번째 실패를, 없으면 에러 맵을 반환합니다.
    pub fn into_result(self) -> Result<ErrorMap, EngineError> {
        match self.engine_errors.into_values().next() {
            Some(err) => Err(err),
            None => Ok(self.errors),
        }
    }
}

/// 단건 저장 결과
#[derive(Debug)]
pub struct SavedDetection {
    pub detection: Detection,
    pub errors: ErrorMap,
    /// 배포 실패로 비활성화한 뒤 다시 배포했는지 여부
    pub disabled_after_failure: bool,
}

/// 일괄 작업 결과
#[derive(Debug, Default)]
pub struct BulkReport {
    pub total: usize,
    pub modified: usize,
    pub deleted: usize,
    /// 저장소 ID 또는 PublicID → 에러 메시지
    pub errors: ErrorMap,
}

/// 탐지 코디네이터
pub struct DetectionCoordinator {
    registry: EngineRegistry,
    store: Arc<dyn DetectionStore>,
    authorizer: Arc<dyn Authorizer>,
}

impl DetectionCoordinator {
    pub fn new(
        registry: EngineRegistry,
        store: Arc<dyn DetectionStore>,
        authorizer: Arc<dyn Authorizer>,
    ) -> Self {
        Self {
            registry,
            store,
            authorizer,
        }
    }

    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    fn engine(&self, kind: EngineKind) -> Result<&Arc<dyn DynDetectionEngine>, EngineError> {
        self.registry
            .get(kind)
            .ok_or_else(|| EngineError::UnsupportedEngine(kind.to_string()))
    }

    fn authorize(&self, ctx: &RequestContext, action: &str) -> Result<(), EngineError> {
        self.authorizer
            .check(&ctx.user, action, RESOURCE_DETECTIONS)
            .map_err(EngineError::from)
    }

    // ─── Single Detection ────────────────────────────────────────────

    /// 갱신 전에 탐지를 정리합니다.
    ///
    /// 1. 내용에서 상세 정보를 다시 추출
    /// 2. PublicID 충돌 확인, 기존 탐지 조회
    /// 3. 생성 시각, ruleset, 작성자, 라이선스 보존
    /// 4. 튜닝 규칙 타임스탬프 갱신 (파라미터가 같은 기존 규칙은 유지)
    /// 5. 커뮤니티 탐지는 활성화/보고/튜닝/태그만 반영, 비커뮤니티의 커뮤니티 전환은 거부
    pub async fn prepare_for_save(&self, detection: &mut Detection) -> Result<(), EngineError> {
        let engine = self.engine(detection.engine)?;
        engine.extract_details(detection)?;

        let mut old = None;
        if !detection.public_id.is_empty() {
            let dupe = self
                .store
                .get_detection_by_public_id(detection.engine, &detection.public_id)
                .await?;
            if let Some(dupe) = dupe {
                if dupe.id != detection.id {
                    return Err(EngineError::PublicIdExists {
                        public_id: detection.public_id.clone(),
                    });
                }
                old = Some(dupe);
            }
        }

        let old = match old {
            Some(old) => old,
            None => self
                .store
                .get_detection(&detection.id)
                .await?
                .ok_or_else(|| StoreError::NotFound {
                    id: detection.id.clone(),
                })?,
        };

        detection.create_time = old.create_time;
        detection.ruleset = old.ruleset.clone();
        if !old.author.is_empty() {
            detection.author = old.author.clone();
        }
        if !old.license.is_empty() {
            detection.license = old.license.clone();
        }

        stamp_overrides(&mut detection.overrides, &old.overrides, Utc::now());

        if old.is_community {
            info!(id = %detection.id, "existing detection is a community rule, only updating select fields");
            let mut kept = old;
            kept.is_enabled = detection.is_enabled;
            kept.is_reporting = detection.is_reporting;
            kept.overrides = std::mem::take(&mut detection.overrides);
            kept.tags = std::mem::take(&mut detection.tags);
            *detection = kept;
        } else if detection.is_community {
            return Err(EngineError::CommunityDowngrade);
        }

        Ok(())
    }

    /// 사용자 탐지를 만들고 배포합니다.
    pub async fn create_detection(
        &self,
        ctx: &RequestContext,
        mut detection: Detection,
    ) -> Result<SavedDetection, EngineError> {
        self.authorize(ctx, "write")?;
        if detection.is_community {
            return Err(EngineError::CommunityCreate);
        }

        let now = Utc::now();
        for over in &mut detection.overrides {
            over.created_at.get_or_insert(now);
            over.updated_at.get_or_insert(now);
        }
        detection.language = detection.engine.language();
        detection.ruleset = RULESET_CUSTOM.to_owned();

        let engine = self.engine(detection.engine)?;
        engine.validate_rule(&detection.content)?;
        engine.extract_details(&mut detection)?;
        detection.author = ctx.user.display_name();

        let public_id = detection.public_id.clone();
        let created = self
            .store
            .create_detection(detection)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => EngineError::PublicIdExists { public_id },
                other => other.into(),
            })?;

        let errors = self
            .sync_local(std::slice::from_ref(&created))
            .await
            .into_result()?;
        info!(engine = %created.engine, public_id = %created.public_id, "detection created");

        Ok(SavedDetection {
            detection: created,
            errors,
            disabled_after_failure: false,
        })
    }

    /// 탐지를 갱신하고 배포합니다.
    ///
    /// 활성화된 탐지의 배포가 실패하면 비활성화한 뒤 다시 배포합니다.
    pub async fn update_detection(
        &self,
        ctx: &RequestContext,
        mut detection: Detection,
    ) -> Result<SavedDetection, EngineError> {
        self.authorize(ctx, "write")?;
        self.engine(detection.engine)?
            .validate_rule(&detection.content)?;
        self.prepare_for_save(&mut detection).await?;

        let updated = self.store.update_detection(detection).await?;

        match self
            .sync_local(std::slice::from_ref(&updated))
            .await
            .into_result()
        {
            Ok(errors) => Ok(SavedDetection {
                detection: updated,
                errors,
                disabled_after_failure: false,
            }),
            Err(err) if updated.is_enabled => {
                error!(public_id = %updated.public_id, error = %err, "unable to sync detection; attempting to disable and resync");

                let mut disabled = updated;
                disabled.is_enabled = false;
                let disabled = self.store.update_detection(disabled).await.map_err(|uerr| {
                    warn!(error = %uerr, "unable to disable detection after failed sync");
                    err
                })?;

                let errors = self
                    .sync_local(std::slice::from_ref(&disabled))
                    .await
                    .into_result()?;
                Ok(SavedDetection {
                    detection: disabled,
                    errors,
                    disabled_after_failure: true,
                })
            }
            Err(err) => Err(err),
        }
    }

    /// 탐지를 삭제하고 런타임에서 제거합니다.
    pub async fn delete_detection(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<ErrorMap, EngineError> {
        self.authorize(ctx, "write")?;

        let mut old = self.store.delete_detection(id).await?;
        old.is_enabled = false;
        old.pending_delete = true;

        self.sync_local(std::slice::from_ref(&old))
            .await
            .into_result()
    }

    /// 탐지를 복제해 사용자 탐지로 저장합니다.
    pub async fn duplicate_detection(
        &self,
        ctx: &RequestContext,
        id: &str,
    ) -> Result<Detection, EngineError> {
        self.authorize(ctx, "write")?;

        let original = self
            .store
            .get_detection(id)
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })?;
        let copy = self
            .engine(original.engine)?
            .duplicate_detection(ctx, &original)
            .await?;

        Ok(self.store.create_detection(copy).await?)
    }

    // ─── Bulk ────────────────────────────────────────────────────────

    /// 여러 탐지를 한 번에 활성화, 비활성화 또는 삭제하고 배포합니다.
    ///
    /// 삭제 대상에 커뮤니티 탐지가 있으면 아무것도 하지 않고 거부합니다.
    pub async fn bulk_update(
        &self,
        ctx: &RequestContext,
        ids: &[String],
        action: BulkAction,
    ) -> Result<BulkReport, EngineError> {
        self.authorize(ctx, "write")?;

        let mut unique: Vec<&String> = ids.iter().collect();
        unique.sort();
        unique.dedup();

        if action == BulkAction::Delete {
            for id in &unique {
                if let Some(det) = self.store.get_detection(id).await?
                    && det.is_community
                {
                    return Err(EngineError::CommunityDelete);
                }
            }
        }

        let started = Instant::now();
        let mut report = BulkReport {
            total: unique.len(),
            ..BulkReport::default()
        };
        let mut dirty = Vec::with_capacity(unique.len());

        for id in unique {
            match action {
                BulkAction::Enable | BulkAction::Disable => {
                    match self.set_enabled(id, action == BulkAction::Enable).await {
                        Ok(det) => {
                            report.modified += 1;
                            dirty.push(det);
                        }
                        Err(e) => {
                            report.errors.insert(
                                id.clone(),
                                format!("unable to update detection; reason={e}"),
                            );
                        }
                    }
                }
                BulkAction::Delete => match self.store.delete_detection(id).await {
                    Ok(mut det) => {
                        det.is_enabled = false;
                        det.pending_delete = true;
                        report.deleted += 1;
                        dirty.push(det);
                    }
                    Err(e) => {
                        report.errors.insert(
                            id.clone(),
                            format!("unable to delete detection; reason={e}"),
                        );
                    }
                },
            }
        }
        let update_secs = started.elapsed().as_secs_f64();

        let synced = self.sync_local(&dirty).await;
        for (key, msg) in synced.errors {
            merge_error(&mut report.errors, key, msg);
        }
        for (kind, err) in synced.engine_errors {
            merge_error(&mut report.errors, kind.to_string(), err.to_string());
        }

        if report.errors.is_empty() {
            info!(
                verb = action.verb(),
                total = report.total,
                modified = report.modified,
                deleted = report.deleted,
                update_secs,
                total_secs = started.elapsed().as_secs_f64(),
                "bulk action detections finished"
            );
        } else {
            let sample: Vec<_> = report.errors.iter().take(ERROR_SAMPLE_SIZE).collect();
            error!(
                verb = action.verb(),
                total = report.total,
                errors = report.errors.len(),
                sample = ?sample,
                "bulk action detections finished with errors"
            );
        }

        Ok(report)
    }

    async fn set_enabled(&self, id: &str, enabled: bool) -> Result<Detection, EngineError> {
        let mut det = self
            .store
            .get_detection(id)
            .await?
            .ok_or_else(|| StoreError::NotFound { id: id.to_owned() })?;
        det.is_enabled = enabled;
        Ok(self.store.update_detection(det).await?)
    }

    // ─── Engines ─────────────────────────────────────────────────────

    /// 탐지를 엔진별로 묶어 각 엔진에 배포합니다.
    pub async fn sync_local(&self, detections: &[Detection]) -> LocalSyncResult {
        let mut by_engine: BTreeMap<EngineKind, Vec<Detection>> = BTreeMap::new();
        for det in detections {
            by_engine.entry(det.engine).or_default().push(det.clone());
        }

        let mut result = LocalSyncResult::default();
        for (kind, batch) in by_engine {
            let engine = match self.engine(kind) {
                Ok(engine) => engine,
                Err(e) => {
                    warn!(engine = %kind, count = batch.len(), "no engine registered for detections");
                    result.engine_errors.insert(kind, e);
                    continue;
                }
            };

            match engine.sync_local_detections(&batch).await {
                Ok(errors) => result.errors.extend(errors),
                Err(e) => {
                    error!(engine = %kind, error = %e, "local detection sync failed");
                    result.engine_errors.insert(kind, e);
                }
            }
        }

        result
    }

    /// 엔진(또는 `"all"`)의 커뮤니티 동기화를 즉시 깨웁니다.
    pub fn sync_engine_detections(
        &self,
        ctx: &RequestContext,
        target: &str,
        full_upgrade: bool,
    ) -> Result<(), EngineError> {
        self.authorize(ctx, "write")?;

        if target.trim().eq_ignore_ascii_case("all") {
            for kind in self.registry.kinds() {
                if let Some(engine) = self.registry.get(kind) {
                    engine.interrupt_sync(full_upgrade, true);
                }
            }
            return Ok(());
        }

        let kind: EngineKind = target
            .parse()
            .map_err(|_| EngineError::UnsupportedEngine(target.to_owned()))?;
        self.engine(kind)?.interrupt_sync(full_upgrade, true);
        Ok(())
    }

    /// 엔진에서 쓰이지 않은 PublicID를 받습니다.
    pub async fn generate_public_id(&self, kind: EngineKind) -> Result<String, EngineError> {
        self.engine(kind)?.generate_unused_public_id().await
    }

    /// Sigma 규칙을 ElastAlert 규칙으로 변환합니다.
    pub async fn convert_rule(&self, detection: &Detection) -> Result<String, EngineError> {
        self.engine(EngineKind::ElastAlert)?
            .convert_rule(detection)
            .await
    }

    pub fn engine_states(&self) -> Vec<(EngineKind, EngineStateSnapshot)> {
        self.registry.states()
    }
}

/// 튜닝 규칙 타임스탬프를 채웁니다.
///
/// 기존 목록에 파라미터가 같은 규칙이 있으면 `updated_at`을 유지합니다.
/// 기존 규칙 하나는 새 규칙 하나와만 짝지어집니다.
pub fn stamp_overrides(overrides: &mut [Override], previous: &[Override], now: DateTime<Utc>) {
    let mut unmatched: Vec<&Override> = previous.iter().collect();

    for over in overrides.iter_mut() {
        over.created_at.get_or_insert(now);

        match unmatched.iter().position(|old| over.same_parameters(old)) {
            Some(idx) => {
                let old = unmatched.remove(idx);
                if over.updated_at.is_none() {
                    over.updated_at = old.updated_at.or(Some(now));
                }
            }
            None => over.updated_at = Some(now),
        }
    }
}

fn merge_error(errors: &mut ErrorMap, key: String, msg: String) {
    errors
        .entry(key)
        .and_modify(|existing| *existing = format!("{existing}; {msg}"))
        .or_insert(msg);
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;
    use rulekeeper_core::engine::DetectionEngine;
    use rulekeeper_core::error::RulekeeperError;
    use rulekeeper_core::pipeline::HealthStatus;
    use rulekeeper_core::store::{AllowAll, MemoryDetectionStore};
    use rulekeeper_core::types::{OverrideType, User};

    use super::*;

    /// 배포 호출을 기록하는 테스트 엔진
    struct RecordingEngine {
        kind: EngineKind,
        synced: Mutex<Vec<Vec<String>>>,
        interrupts: Mutex<Vec<bool>>,
        fail_enabled_sync: bool,
    }

    impl RecordingEngine {
        fn new(kind: EngineKind) -> Self {
            Self {
                kind,
                synced: Mutex::new(Vec::new()),
                interrupts: Mutex::new(Vec::new()),
                fail_enabled_sync: false,
            }
        }

        fn failing_enabled(mut self) -> Self {
            self.fail_enabled_sync = true;
            self
        }

        fn synced(&self) -> Vec<Vec<String>> {
            self.synced.lock().unwrap().clone()
        }
    }

    impl DetectionEngine for RecordingEngine {
        fn kind(&self) -> EngineKind {
            self.kind
        }

        async fn start(&self) -> Result<(), RulekeeperError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), RulekeeperError> {
            Ok(())
        }

        async fn health_check(&self) -> HealthStatus {
            HealthStatus::Healthy
        }

        fn is_running(&self) -> bool {
            false
        }

        fn validate_rule(&self, content: &str) -> Result<String, EngineError> {
            if content.contains("invalid") {
                return Err(EngineError::Parse("invalid rule".to_owned()));
            }
            Ok(content.to_owned())
        }

        /// 내용의 첫 단어를 PublicID와 제목으로 씁니다.
        fn extract_details(&self, detection: &mut Detection) -> Result<(), EngineError> {
            let first = detection
                .content
                .split_whitespace()
                .next()
                .ok_or_else(|| EngineError::Parse("empty".to_owned()))?;
            detection.public_id = first.to_owned();
            detection.title = first.to_owned();
            Ok(())
        }

        async fn duplicate_detection(
            &self,
            _ctx: &RequestContext,
            detection: &Detection,
        ) -> Result<Detection, EngineError> {
            let mut copy = detection.clone();
            copy.id = String::new();
            copy.public_id = format!("{}_copy", detection.public_id);
            copy.is_community = false;
            copy.ruleset = RULESET_CUSTOM.to_owned();
            Ok(copy)
        }

        async fn convert_rule(&self, _detection: &Detection) -> Result<String, EngineError> {
            Err(EngineError::NotImplemented)
        }

        async fn generate_unused_public_id(&self) -> Result<String, EngineError> {
            Ok("generated".to_owned())
        }

        async fn sync_local_detections(
            &self,
            detections: &[Detection],
        ) -> Result<ErrorMap, EngineError> {
            self.synced
                .lock()
                .unwrap()
                .push(detections.iter().map(|d| d.public_id.clone()).collect());
            if self.fail_enabled_sync && detections.iter().any(|d| d.is_enabled) {
                return Err(EngineError::Compile {
                    exit_code: Some(1),
                    output: "bad rule".to_owned(),
                });
            }
            Ok(ErrorMap::new())
        }

        fn interrupt_sync(&self, full_upgrade: bool, _notify: bool) {
            self.interrupts.lock().unwrap().push(full_upgrade);
        }

        async fn integrity_check(&self, _can_interrupt: bool) -> Result<(), EngineError> {
            Ok(())
        }

        fn state(&self) -> EngineStateSnapshot {
            EngineStateSnapshot::default()
        }
    }

    struct Fixture {
        store: Arc<MemoryDetectionStore>,
        strelka: Arc<RecordingEngine>,
        suricata: Arc<RecordingEngine>,
        coordinator: DetectionCoordinator,
    }

    fn fixture_with(suricata: RecordingEngine) -> Fixture {
        let store = Arc::new(MemoryDetectionStore::new());
        let strelka = Arc::new(RecordingEngine::new(EngineKind::Strelka));
        let suricata = Arc::new(suricata);

        let mut registry = EngineRegistry::new();
        registry.register(strelka.clone()).unwrap();
        registry.register(suricata.clone()).unwrap();

        let coordinator = DetectionCoordinator::new(registry, store.clone(), Arc::new(AllowAll));
        Fixture {
            store,
            strelka,
            suricata,
            coordinator,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(RecordingEngine::new(EngineKind::Suricata))
    }

    fn ctx() -> RequestContext {
        RequestContext::new(User {
            id: "u1".to_owned(),
            email: "jo@example.com".to_owned(),
            first_name: "Jo".to_owned(),
            last_name: "Park".to_owned(),
        })
    }

    fn detection(engine: EngineKind, content: &str) -> Detection {
        let mut det = Detection::new(engine);
        det.content = content.to_owned();
        det.public_id = content.split_whitespace().next().unwrap_or_default().to_owned();
        det
    }

    async fn stored(fx: &Fixture, engine: EngineKind, content: &str, community: bool) -> Detection {
        let mut det = detection(engine, content);
        det.is_community = community;
        det.ruleset = if community { "core" } else { RULESET_CUSTOM }.to_owned();
        det.author = "Original Author".to_owned();
        det.license = "DRL".to_owned();
        fx.store.create_detection(det).await.unwrap()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn matching_override_keeps_updated_at() {
        let mut old = Override::new(OverrideType::Suppress);
        old.is_enabled = true;
        old.note = "same".to_owned();
        old.created_at = Some(at(100));
        old.updated_at = Some(at(200));

        let mut same = old.clone();
        same.updated_at = None;
        let mut changed = old.clone();
        changed.note = "different".to_owned();

        let mut incoming = vec![same, changed];
        stamp_overrides(&mut incoming, &[old], at(999));

        assert_eq!(incoming[0].updated_at, Some(at(200)));
        assert_eq!(incoming[0].created_at, Some(at(100)));
        assert_eq!(incoming[1].updated_at, Some(at(999)));
    }

    #[test]
    fn previous_override_matches_only_once() {
        let mut old = Override::new(OverrideType::Suppress);
        old.updated_at = Some(at(200));

        let mut incoming = vec![
            Override::new(OverrideType::Suppress),
            Override::new(OverrideType::Suppress),
        ];
        stamp_overrides(&mut incoming, &[old], at(999));

        assert_eq!(incoming[0].updated_at, Some(at(200)));
        assert_eq!(incoming[1].updated_at, Some(at(999)));
    }

    #[tokio::test]
    async fn update_preserves_override_timestamps() {
        let fx = fixture();
        let mut existing = detection(EngineKind::Strelka, "Rule body");
        let mut over = Override::new(OverrideType::CustomFilter);
        over.custom_filter = Some("x".to_owned());
        over.created_at = Some(at(100));
        over.updated_at = Some(at(200));
        existing.overrides = vec![over];
        let existing = fx.store.create_detection(existing).await.unwrap();

        let saved = fx
            .coordinator
            .update_detection(&ctx(), existing.clone())
            .await
            .unwrap();
        assert_eq!(saved.detection.overrides[0].updated_at, Some(at(200)));
    }

    #[tokio::test]
    async fn community_downgrade_is_rejected_and_store_untouched() {
        let fx = fixture();
        let existing = stored(&fx, EngineKind::Strelka, "Mine body", false).await;

        let mut edited = existing.clone();
        edited.is_community = true;
        edited.is_enabled = true;

        let err = fx
            .coordinator
            .update_detection(&ctx(), edited)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CommunityDowngrade));

        let after = fx.store.get_detection(&existing.id).await.unwrap().unwrap();
        assert_eq!(after, existing);
        assert!(fx.strelka.synced().is_empty());
    }

    #[tokio::test]
    async fn community_edit_only_applies_select_fields() {
        let fx = fixture();
        let existing = stored(&fx, EngineKind::Strelka, "Upstream body", true).await;

        let mut edited = existing.clone();
        edited.content = "Upstream changed".to_owned();
        edited.is_enabled = true;
        edited.tags = vec!["triaged".to_owned()];
        edited.license = "MIT".to_owned();

        let saved = fx.coordinator.update_detection(&ctx(), edited).await.unwrap();
        assert!(saved.detection.is_enabled);
        assert_eq!(saved.detection.tags, vec!["triaged".to_owned()]);
        assert_eq!(saved.detection.content, "Upstream body");
        assert_eq!(saved.detection.license, "DRL");
        assert!(saved.detection.is_community);
    }

    #[tokio::test]
    async fn public_id_conflict_is_rejected() {
        let fx = fixture();
        stored(&fx, EngineKind::Strelka, "Taken body", false).await;
        let other = stored(&fx, EngineKind::Strelka, "Other body", false).await;

        let mut edited = other;
        edited.content = "Taken now".to_owned();
        let err = fx
            .coordinator
            .update_detection(&ctx(), edited)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::PublicIdExists { ref public_id } if public_id == "Taken"));
    }

    #[tokio::test]
    async fn prepare_preserves_author_license_and_ruleset() {
        let fx = fixture();
        let existing = stored(&fx, EngineKind::Strelka, "Kept body", false).await;

        let mut edited = existing.clone();
        edited.author = "Someone Else".to_owned();
        edited.license = String::new();
        edited.ruleset = "core".to_owned();
        edited.create_time = None;

        fx.coordinator.prepare_for_save(&mut edited).await.unwrap();
        assert_eq!(edited.author, "Original Author");
        assert_eq!(edited.license, "DRL");
        assert_eq!(edited.ruleset, RULESET_CUSTOM);
        assert_eq!(edited.create_time, existing.create_time);
    }

    #[tokio::test]
    async fn create_forces_custom_ruleset_and_author() {
        let fx = fixture();
        let mut det = detection(EngineKind::Suricata, "10001 alert");
        det.ruleset = "core".to_owned();
        det.is_enabled = true;
        det.overrides = vec![Override::new(OverrideType::Threshold)];

        let saved = fx.coordinator.create_detection(&ctx(), det).await.unwrap();
        assert_eq!(saved.detection.ruleset, RULESET_CUSTOM);
        assert_eq!(saved.detection.author, "Jo Park");
        assert!(saved.detection.overrides[0].created_at.is_some());
        assert_eq!(fx.suricata.synced(), vec![vec!["10001".to_owned()]]);
        assert!(fx.strelka.synced().is_empty());

        let mut community = detection(EngineKind::Suricata, "10002 alert");
        community.is_community = true;
        assert!(matches!(
            fx.coordinator.create_detection(&ctx(), community).await,
            Err(EngineError::CommunityCreate)
        ));

        let invalid = detection(EngineKind::Suricata, "invalid rule");
        assert!(matches!(
            fx.coordinator.create_detection(&ctx(), invalid).await,
            Err(EngineError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn failed_sync_disables_and_resyncs() {
        let fx = fixture_with(RecordingEngine::new(EngineKind::Suricata).failing_enabled());
        let existing = stored(&fx, EngineKind::Suricata, "20001 alert", false).await;

        let mut edited = existing.clone();
        edited.is_enabled = true;
        let saved = fx.coordinator.update_detection(&ctx(), edited).await.unwrap();

        assert!(saved.disabled_after_failure);
        assert!(!saved.detection.is_enabled);
        assert_eq!(fx.suricata.synced().len(), 2);
        let after = fx.store.get_detection(&existing.id).await.unwrap().unwrap();
        assert!(!after.is_enabled);
    }

    #[tokio::test]
    async fn sync_local_fans_out_per_engine_and_isolates_failures() {
        let fx = fixture_with(RecordingEngine::new(EngineKind::Suricata).failing_enabled());

        let mut yara = detection(EngineKind::Strelka, "A body");
        yara.is_enabled = true;
        let mut suri = detection(EngineKind::Suricata, "30001 alert");
        suri.is_enabled = true;
        let sigma = detection(EngineKind::ElastAlert, "sigma body");

        let result = fx.coordinator.sync_local(&[yara, suri, sigma]).await;
        assert_eq!(fx.strelka.synced(), vec![vec!["A".to_owned()]]);
        assert_eq!(fx.suricata.synced().len(), 1);
        assert!(matches!(
            result.engine_errors.get(&EngineKind::Suricata),
            Some(EngineError::Compile { .. })
        ));
        assert!(matches!(
            result.engine_errors.get(&EngineKind::ElastAlert),
            Some(EngineError::UnsupportedEngine(_))
        ));
    }

    #[tokio::test]
    async fn bulk_delete_rejects_community_detections() {
        let fx = fixture();
        let mine = stored(&fx, EngineKind::Strelka, "Mine body", false).await;
        let upstream = stored(&fx, EngineKind::Strelka, "Upstream body", true).await;

        let err = fx
            .coordinator
            .bulk_update(&ctx(), &[mine.id.clone(), upstream.id.clone()], BulkAction::Delete)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::CommunityDelete));
        assert_eq!(fx.store.len(), 2);
    }

    #[tokio::test]
    async fn bulk_delete_marks_pending_and_removes() {
        let fx = fixture();
        let a = stored(&fx, EngineKind::Strelka, "A body", false).await;
        let b = stored(&fx, EngineKind::Suricata, "40001 alert", false).await;

        let report = fx
            .coordinator
            .bulk_update(
                &ctx(),
                &[a.id.clone(), b.id.clone(), "missing".to_owned()],
                BulkAction::Delete,
            )
            .await
            .unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.deleted, 2);
        assert!(report.errors["missing"].starts_with("unable to delete detection"));
        assert!(fx.store.is_empty());
        assert_eq!(fx.strelka.synced(), vec![vec!["A".to_owned()]]);
        assert_eq!(fx.suricata.synced(), vec![vec!["40001".to_owned()]]);
    }

    #[tokio::test]
    async fn bulk_enable_updates_and_syncs() {
        let fx = fixture();
        let a = stored(&fx, EngineKind::Strelka, "A body", true).await;
        let b = stored(&fx, EngineKind::Strelka, "B body", false).await;

        let report = fx
            .coordinator
            .bulk_update(&ctx(), &[a.id.clone(), b.id.clone(), a.id.clone()], BulkAction::Enable)
            .await
            .unwrap();

        assert_eq!(report.total, 2);
        assert_eq!(report.modified, 2);
        assert!(report.errors.is_empty());
        assert!(fx.store.get_detection(&a.id).await.unwrap().unwrap().is_enabled);
        assert_eq!(fx.strelka.synced()[0].len(), 2);
    }

    #[tokio::test]
    async fn delete_and_duplicate() {
        let fx = fixture();
        let original = stored(&fx, EngineKind::Strelka, "Dup body", true).await;

        let copy = fx
            .coordinator
            .duplicate_detection(&ctx(), &original.id)
            .await
            .unwrap();
        assert_eq!(copy.public_id, "Dup_copy");
        assert!(!copy.is_community);
        assert_ne!(copy.id, original.id);

        fx.coordinator.delete_detection(&ctx(), &copy.id).await.unwrap();
        assert!(fx.store.get_detection(&copy.id).await.unwrap().is_none());
        assert_eq!(fx.strelka.synced(), vec![vec!["Dup_copy".to_owned()]]);
    }

    #[tokio::test]
    async fn sync_engine_detections_interrupts_targets() {
        let fx = fixture();
        fx.coordinator
            .sync_engine_detections(&ctx(), "all", true)
            .unwrap();
        fx.coordinator
            .sync_engine_detections(&ctx(), "YARA", false)
            .unwrap();

        assert_eq!(*fx.strelka.interrupts.lock().unwrap(), vec![true, false]);
        assert_eq!(*fx.suricata.interrupts.lock().unwrap(), vec![true]);
        assert!(matches!(
            fx.coordinator.sync_engine_detections(&ctx(), "snort", false),
            Err(EngineError::UnsupportedEngine(_))
        ));
        assert!(matches!(
            fx.coordinator.sync_engine_detections(&ctx(), "sigma", false),
            Err(EngineError::UnsupportedEngine(_))
        ));
    }

    #[tokio::test]
    async fn generate_public_id_dispatches_by_kind() {
        let fx = fixture();
        assert_eq!(
            fx.coordinator
                .generate_public_id(EngineKind::Suricata)
                .await
                .unwrap(),
            "generated"
        );
        assert_eq!(fx.coordinator.engine_states().len(), 2);
    }

    #[test]
    fn bulk_action_parses_case_insensitively() {
        assert_eq!("Enable".parse::<BulkAction>().unwrap(), BulkAction::Enable);
        assert_eq!("DELETE".parse::<BulkAction>().unwrap(), BulkAction::Delete);
        assert!("archive".parse::<BulkAction>().is_err());
    }
}
