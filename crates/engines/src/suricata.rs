//! Suricata 엔진 -- 커뮤니티 규칙 파일 지문 기반 가져오기, 필러 설정 병합
//!
//! 커뮤니티 규칙은 하나의 규칙 파일에서 가져옵니다. 파일의 SHA-256이 저장된 지문과
//! 같으면 가져오기를 건너뜁니다. 활성화 여부는 disabled/modify 필러 목록에서 계산합니다.
//!
//! 런타임 반영은 필러 설정 값(로컬 규칙, enabled/disabled/modify SID 목록, 임계치 YAML)을
//! [`PillarMerger`]로 갱신하는 방식입니다.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use rulekeeper_core::config::{SuricataConfig, SyncTiming};
use rulekeeper_core::engine::{DetectionEngine, RequestContext};
use rulekeeper_core::error::{EngineError, RulekeeperError};
use rulekeeper_core::pipeline::HealthStatus;
use rulekeeper_core::store::{Setting, SettingsStore, setting_by_id};
use rulekeeper_core::types::{Detection, EngineKind, EngineState, EngineStateSnapshot, ErrorMap};
use rulekeeper_rules::RuleFilter;
use rulekeeper_rules::suricata::pillar::{
    DISABLED_SIDS_SETTING, ENABLED_SIDS_SETTING, LOCAL_RULES_SETTING, MODIFY_SIDS_SETTING,
    THRESHOLD_SETTING, index_enabled, index_modify,
};
use rulekeeper_rules::suricata::{self, PillarLists, PillarMerger};

use crate::handle::TaskHandle;
use crate::integrity::{self, IntegritySource, integrity_loop};
use crate::state::{read_and_hash, read_fingerprint, write_fingerprint};
use crate::sync::{
    CommunitySource, CycleReport, EngineContext, Enablement, FetchedRules, engine_health,
    run_cycle, run_sync_loop,
};

/// Suricata 탐지 엔진
pub struct SuricataEngine {
    inner: Arc<SuricataInner>,
}

struct SuricataInner {
    config: SuricataConfig,
    context: EngineContext,
    settings: Arc<dyn SettingsStore>,
    filter: RuleFilter,
    handle: Arc<TaskHandle>,
    state: Arc<EngineState>,
}

impl SuricataEngine {
    pub fn new(
        config: SuricataConfig,
        context: EngineContext,
        settings: Arc<dyn SettingsStore>,
    ) -> Result<Self, EngineError> {
        let filter = RuleFilter::from_patterns(&config.allow_regex, &config.deny_regex)
            .map_err(|e| EngineError::Parse(format!("invalid suricata rule filter: {e}")))?;

        Ok(Self {
            inner: Arc::new(SuricataInner {
                config,
                context,
                settings,
                filter,
                handle: Arc::new(TaskHandle::new()),
                state: Arc::new(EngineState::default()),
            }),
        })
    }

    /// 커뮤니티 동기화 한 주기를 즉시 실행합니다.
    pub async fn sync_community(&self, force: bool) -> Result<CycleReport, EngineError> {
        let mut template_found = false;
        run_cycle(self.inner.as_ref(), force, &mut template_found).await
    }
}

fn required<'a>(settings: &'a [Setting], id: &str, name: &str) -> Result<&'a Setting, EngineError> {
    setting_by_id(settings, id)
        .ok_or_else(|| EngineError::Transport(format!("unable to find {name} setting")))
}

impl SuricataInner {
    fn integrity_source(&self) -> IntegritySource {
        IntegritySource {
            engine: EngineKind::Suricata,
            report_path: PathBuf::from(&self.config.compilation_report_path),
            compiled_path: Some(PathBuf::from(&self.config.compiled_rules_path))
                .filter(|p| !p.as_os_str().is_empty()),
        }
    }

    async fn load_settings(&self) -> Result<Vec<Setting>, EngineError> {
        self.settings
            .get_settings()
            .await
            .inspect_err(|e| error!(error = %e, "unable to get settings"))
            .map_err(EngineError::from)
    }

    /// 탐지 배치를 필러 설정에 병합하고 저장합니다.
    async fn merge_pillars(&self, detections: &[Detection]) -> Result<ErrorMap, EngineError> {
        let settings = self.load_settings().await?;

        let lists = PillarLists {
            local_rules: required(&settings, LOCAL_RULES_SETTING, "local rules")?.value.clone(),
            enabled: required(&settings, ENABLED_SIDS_SETTING, "enabled")?.value.clone(),
            disabled: required(&settings, DISABLED_SIDS_SETTING, "disabled")?.value.clone(),
            modify: required(&settings, MODIFY_SIDS_SETTING, "modify")?.value.clone(),
            threshold: setting_by_id(&settings, THRESHOLD_SETTING)
                .map(|s| s.value.clone())
                .unwrap_or_default(),
        };

        let mut merger = PillarMerger::new(&lists)?;
        let errors = merger.merge_all(detections);
        let merged = merger.finish()?;

        let updates = [
            (LOCAL_RULES_SETTING, merged.local_rules),
            (ENABLED_SIDS_SETTING, merged.enabled),
            (DISABLED_SIDS_SETTING, merged.disabled),
            (MODIFY_SIDS_SETTING, merged.modify),
            (THRESHOLD_SETTING, merged.threshold),
        ];
        for (id, value) in updates {
            self.settings.update_setting(&Setting::new(id, value)).await?;
        }

        info!(
            engine = %EngineKind::Suricata,
            detections = detections.len(),
            errors = errors.len(),
            "suricata pillars updated"
        );
        Ok(errors)
    }
}

// ─── Community Source ────────────────────────────────────────────────

impl CommunitySource for SuricataInner {
    fn kind(&self) -> EngineKind {
        EngineKind::Suricata
    }

    fn context(&self) -> &EngineContext {
        &self.context
    }

    fn handle(&self) -> &TaskHandle {
        &self.handle
    }

    fn engine_state(&self) -> &EngineState {
        &self.state
    }

    fn timing(&self) -> SyncTiming {
        self.config.timing()
    }

    fn state_file(&self) -> &Path {
        Path::new(&self.config.state_file)
    }

    fn enablement(&self) -> Enablement<'_> {
        Enablement::FromSource
    }

    async fn fetch(&self, force: bool) -> Result<Option<FetchedRules>, EngineError> {
        let (rules, hash) = read_and_hash(Path::new(&self.config.community_rules_file))
            .await
            .inspect_err(|e| error!(error = %e, "unable to read community rules file"))?;

        let fingerprint = read_fingerprint(Path::new(&self.config.fingerprint_file))
            .await
            .inspect_err(|e| error!(error = %e, "unable to read rules fingerprint file"))?;

        if !force && fingerprint.is_some_and(|fp| fp.eq_ignore_ascii_case(&hash)) {
            return Ok(None);
        }

        let settings = self.load_settings().await?;
        self.handle.check_running()?;

        let ruleset = setting_by_id(&settings, &self.config.ruleset_setting).map(|s| s.value.trim());
        if ruleset.is_none() {
            warn!(setting = %self.config.ruleset_setting, "ruleset setting not found, community rules will have no ruleset");
        }

        let disabled = required(&settings, DISABLED_SIDS_SETTING, "disabled")?;
        let modify = required(&settings, MODIFY_SIDS_SETTING, "modify")?;
        let disabled_lines: Vec<String> = disabled.value.split('\n').map(str::to_owned).collect();
        let modify_lines: Vec<String> = modify.value.split('\n').map(str::to_owned).collect();
        let disabled_index = index_enabled(&disabled_lines, true);
        let modify_index = index_modify(&modify_lines);

        let mut detections = suricata::parse_rules(&rules, ruleset, &self.filter)
            .inspect_err(|e| error!(error = %e, "unable to parse community rules"))?;

        for det in &mut detections {
            det.is_community = true;
            det.is_enabled = !(disabled_index.contains_key(&det.public_id)
                || modify_index.contains_key(&det.public_id));
        }

        Ok(Some(FetchedRules {
            detections,
            errors: ErrorMap::new(),
            fingerprint: Some(hash),
        }))
    }

    /// 에러가 없을 때만 지문을 기록합니다. 다음 주기에 다시 시도할 수 있도록.
    async fn apply(
        &self,
        fingerprint: Option<&str>,
        errors: &ErrorMap,
    ) -> Result<ErrorMap, EngineError> {
        match fingerprint {
            Some(hash) if errors.is_empty() => {
                if let Err(e) = write_fingerprint(Path::new(&self.config.fingerprint_file), hash).await {
                    error!(path = %self.config.fingerprint_file, error = %e, "unable to write rules fingerprint file");
                }
            }
            Some(_) => {
                error!(errors = errors.len(), "unable to sync all community detections, fingerprint not saved");
            }
            None => {}
        }
        Ok(ErrorMap::new())
    }

    async fn integrity(&self, can_interrupt: bool) -> Result<(), EngineError> {
        integrity::check(
            &self.integrity_source(),
            self.context.store.as_ref(),
            &self.handle,
            can_interrupt,
        )
        .await
    }
}

// ─── DetectionEngine ─────────────────────────────────────────────────

impl DetectionEngine for SuricataEngine {
    fn kind(&self) -> EngineKind {
        EngineKind::Suricata
    }

    async fn start(&self) -> Result<(), RulekeeperError> {
        let inner = &self.inner;
        inner.handle.begin()?;

        inner.handle.spawn(run_sync_loop(Arc::clone(inner)));
        inner.handle.spawn(integrity_loop(
            inner.integrity_source(),
            Arc::clone(&inner.context.store),
            Arc::clone(&inner.handle),
            Arc::clone(&inner.state),
            Duration::from_secs(inner.config.integrity_check_frequency_secs),
        ));

        info!(
            engine = %EngineKind::Suricata,
            community_rules_file = %inner.config.community_rules_file,
            "suricata engine started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), RulekeeperError> {
        self.inner.handle.shutdown().await?;
        info!(engine = %EngineKind::Suricata, "suricata engine stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        engine_health(&self.inner.handle, &self.inner.state)
    }

    fn is_running(&self) -> bool {
        self.inner.handle.is_running()
    }

    fn validate_rule(&self, content: &str) -> Result<String, EngineError> {
        Ok(suricata::validate_rule(content)?)
    }

    fn extract_details(&self, detection: &mut Detection) -> Result<(), EngineError> {
        Ok(suricata::extract_details(detection)?)
    }

    async fn duplicate_detection(
        &self,
        _ctx: &RequestContext,
        _detection: &Detection,
    ) -> Result<Detection, EngineError> {
        Err(EngineError::NotImplemented)
    }

    async fn convert_rule(&self, _detection: &Detection) -> Result<String, EngineError> {
        Err(EngineError::NotImplemented)
    }

    async fn generate_unused_public_id(&self) -> Result<String, EngineError> {
        Err(EngineError::NotImplemented)
    }

    async fn sync_local_detections(&self, detections: &[Detection]) -> Result<ErrorMap, EngineError> {
        self.inner.merge_pillars(detections).await
    }

    fn interrupt_sync(&self, full_upgrade: bool, notify: bool) {
        self.inner.handle.interrupt(full_upgrade, notify);
    }

    async fn integrity_check(&self, can_interrupt: bool) -> Result<(), EngineError> {
        self.inner.integrity(can_interrupt).await
    }

    fn state(&self) -> EngineStateSnapshot {
        self.inner.state.snapshot()
    }
}
