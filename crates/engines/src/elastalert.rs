//! Sigma(ElastAlert) 엔진 -- 패키지 가져오기, sigma CLI 변환, 규칙 파일 배포
//!
//! # 내부 아키텍처
//! ```text
//! sigma_{package}.zip ──extract──▶ *.yml ──SigmaRule::parse──▶ Detection ──reconcile──▶ store
//!                                                                            │
//! store ──▶ sigma convert (stdin) ──▶ ElastAlertRule YAML ──▶ rules_folder/{PublicID}.yml
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use tracing::{debug, error, info, warn};

use rulekeeper_core::config::{ElastAlertConfig, SyncTiming};
use rulekeeper_core::engine::{DetectionEngine, RequestContext};
use rulekeeper_core::error::{EngineError, RulekeeperError};
use rulekeeper_core::metrics::{COMPILE_DURATION_SECONDS, LABEL_ENGINE};
use rulekeeper_core::pipeline::HealthStatus;
use rulekeeper_core::store::DetectionFilter;
use rulekeeper_core::types::{
    Detection, EngineKind, EngineState, EngineStateSnapshot, ErrorMap, LICENSE_DRL,
    RULESET_CUSTOM, add_user,
};
use rulekeeper_rules::RuleFilter;
use rulekeeper_rules::sigma::{
    ElastAlertRule, SIGMA_CONVERT_ARGS, SigmaRule, normalize_packages, parse_package_files,
};

use crate::command::{CommandRunner, CommandSpec, ProcessRunner};
use crate::handle::TaskHandle;
use crate::integrity::{self, IntegritySource, integrity_loop};
use crate::package::{
    HttpPackageFetcher, PackageFetcher, UNSUPPORTED_PACKAGE, download_packages, extract_rule_files,
};
use crate::sync::{
    CommunitySource, CycleReport, EngineContext, Enablement, FetchedRules, engine_health,
    run_cycle, run_sync_loop,
};

/// 규칙 파일 확장자
const RULE_EXTENSION: &str = "yml";
/// 미사용 PublicID 생성 시도 횟수
const PUBLIC_ID_ATTEMPTS: usize = 10;

/// Sigma 탐지 엔진
pub struct ElastAlertEngine<R: CommandRunner = ProcessRunner, F: PackageFetcher = HttpPackageFetcher> {
    inner: Arc<ElastAlertInner<R, F>>,
}

struct ElastAlertInner<R: CommandRunner, F: PackageFetcher> {
    config: ElastAlertConfig,
    context: EngineContext,
    runner: R,
    fetcher: F,
    filter: RuleFilter,
    handle: Arc<TaskHandle>,
    state: Arc<EngineState>,
}

impl ElastAlertEngine<ProcessRunner, HttpPackageFetcher> {
    /// sigma CLI 서브프로세스와 HTTP 다운로드를 사용하는 엔진을 만듭니다.
    pub fn new(config: ElastAlertConfig, context: EngineContext) -> Result<Self, EngineError> {
        let fetcher = HttpPackageFetcher::new(Duration::from_secs(config.request_timeout_secs))?;
        Self::with_parts(config, context, ProcessRunner, fetcher)
    }
}

impl<R: CommandRunner, F: PackageFetcher> ElastAlertEngine<R, F> {
    /// 명령 실행기와 패키지 수신기를 지정해 엔진을 만듭니다.
    pub fn with_parts(
        config: ElastAlertConfig,
        context: EngineContext,
        runner: R,
        fetcher: F,
    ) -> Result<Self, EngineError> {
        let filter = RuleFilter::from_patterns(&config.allow_regex, &config.deny_regex)
            .map_err(|e| EngineError::Parse(format!("invalid sigma rule filter: {e}")))?;

        Ok(Self {
            inner: Arc::new(ElastAlertInner {
                config,
                context,
                runner,
                fetcher,
                filter,
                handle: Arc::new(TaskHandle::new()),
                state: Arc::new(EngineState::default()),
            }),
        })
    }

    pub fn runner(&self) -> &R {
        &self.inner.runner
    }

    /// 커뮤니티 동기화 한 주기를 즉시 실행합니다.
    pub async fn sync_community(&self, force: bool) -> Result<CycleReport, EngineError> {
        let mut template_found = false;
        run_cycle(self.inner.as_ref(), force, &mut template_found).await
    }
}

impl<R: CommandRunner, F: PackageFetcher> ElastAlertInner<R, F> {
    fn integrity_source(&self) -> IntegritySource {
        IntegritySource {
            engine: EngineKind::ElastAlert,
            report_path: PathBuf::from(&self.config.compilation_report_path),
            compiled_path: None,
        }
    }

    fn rule_path(&self, public_id: &str) -> PathBuf {
        Path::new(&self.config.rules_folder).join(format!("{public_id}.{RULE_EXTENSION}"))
    }

    /// Sigma 규칙을 EQL로 변환해 ElastAlert 규칙 YAML로 감쌉니다.
    async fn render(&self, det: &Detection) -> Result<String, EngineError> {
        let spec = CommandSpec::new(self.config.sigma_cli_path.as_str())
            .args(SIGMA_CONVERT_ARGS.iter().copied())
            .stdin(det.content.as_str());

        let out = self
            .runner
            .run(&spec)
            .await
            .map_err(|e| EngineError::Transport(format!("problem with sigma cli: {e}")))?;

        histogram!(COMPILE_DURATION_SECONDS, LABEL_ENGINE => EngineKind::ElastAlert.as_str())
            .record(out.duration.as_secs_f64());

        if !out.success() {
            debug!(public_id = %det.public_id, output = %out.output.trim(), "sigma conversion failed");
            return Err(EngineError::Compile {
                exit_code: out.exit_code,
                output: format!("problem with sigma cli: {}", out.output.trim()),
            });
        }

        Ok(ElastAlertRule::wrap(det, &out.output).to_yaml()?)
    }

    /// 활성화된 탐지는 `{PublicID}.yml`로 쓰고, 비활성화된 탐지의 파일은 지웁니다.
    ///
    /// 탐지별 실패는 PublicID를 키로 에러 맵에 기록합니다.
    async fn write_rules(&self, detections: &[Detection]) -> Result<ErrorMap, EngineError> {
        let folder = Path::new(&self.config.rules_folder);
        tokio::fs::create_dir_all(folder).await.map_err(|e| {
            EngineError::Transport(format!(
                "failed to create rules folder {}: {e}",
                folder.display()
            ))
        })?;

        let mut errors = ErrorMap::new();
        for det in detections {
            self.handle.check_running()?;
            if !is_safe_file_stem(&det.public_id) {
                warn!(public_id = %det.public_id, "refusing to deploy rule with unsafe public id");
                errors.insert(
                    det.public_id.clone(),
                    format!("invalid public id for rule file name: {}", det.public_id),
                );
                continue;
            }
            let path = self.rule_path(&det.public_id);

            if det.is_enabled && !det.pending_delete {
                let yaml = match self.render(det).await {
                    Ok(yaml) => yaml,
                    Err(e) => {
                        warn!(public_id = %det.public_id, error = %e, "unable to convert sigma rule");
                        errors.insert(det.public_id.clone(), e.to_string());
                        continue;
                    }
                };
                if let Err(e) = tokio::fs::write(&path, yaml).await {
                    errors.insert(
                        det.public_id.clone(),
                        format!("failed to write rule file: {e}"),
                    );
                }
            } else if tokio::fs::try_exists(&path).await.unwrap_or(false)
                && let Err(e) = tokio::fs::remove_file(&path).await
            {
                errors.insert(
                    det.public_id.clone(),
                    format!("failed to delete rule file: {e}"),
                );
            }
        }

        Ok(errors)
    }

    /// 저장소의 모든 Sigma 탐지를 반영하고 저장소에 없는 규칙 파일을 지웁니다.
    async fn deploy(&self) -> Result<ErrorMap, EngineError> {
        let all = self
            .context
            .store
            .get_all_detections(DetectionFilter::engine(EngineKind::ElastAlert))
            .await?;
        self.handle.check_running()?;

        let detections: Vec<Detection> = all.values().cloned().collect();
        let errors = self.write_rules(&detections).await?;

        let known: BTreeSet<&str> = all.keys().map(String::as_str).collect();
        let mut entries = tokio::fs::read_dir(&self.config.rules_folder)
            .await
            .map_err(|e| EngineError::Transport(format!("failed to read directory: {e}")))?;

        let mut pruned = 0usize;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_rule = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case(RULE_EXTENSION));
            let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
            if is_rule && !known.contains(stem) {
                tokio::fs::remove_file(&path).await.map_err(|e| {
                    EngineError::Transport(format!(
                        "failed to delete orphaned rule file {}: {e}",
                        path.display()
                    ))
                })?;
                pruned += 1;
            }
        }

        info!(
            engine = %EngineKind::ElastAlert,
            detections = detections.len(),
            pruned,
            errors = errors.len(),
            "elastalert rules deployed"
        );
        Ok(errors)
    }
}

// ─── Community Source ────────────────────────────────────────────────

impl<R: CommandRunner, F: PackageFetcher> CommunitySource for ElastAlertInner<R, F> {
    fn kind(&self) -> EngineKind {
        EngineKind::ElastAlert
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
        Enablement::PreserveExisting {
            auto_enabled_rulesets: &self.config.auto_enabled_rulesets,
        }
    }

    /// 패키지는 변경 여부를 알 수 없으므로 매 주기 새로 받습니다.
    async fn fetch(&self, _force: bool) -> Result<Option<FetchedRules>, EngineError> {
        let packages = normalize_packages(&self.config.sigma_packages);
        let (archives, download_errors) = download_packages(
            &self.fetcher,
            &packages,
            &self.config.package_download_template,
        )
        .await;

        // 404가 아닌 실패는 해당 패키지의 탐지가 삭제되지 않도록 주기 전체를 중단
        let failed: Vec<String> = download_errors
            .iter()
            .filter(|(_, msg)| msg.as_str() != UNSUPPORTED_PACKAGE)
            .map(|(package, msg)| format!("{package}: {msg}"))
            .collect();
        if !failed.is_empty() {
            return Err(EngineError::Transport(format!(
                "unable to download sigma packages: {}",
                failed.join("; ")
            )));
        }

        let mut fetched = FetchedRules {
            errors: download_errors,
            ..FetchedRules::default()
        };

        for (package, archive) in archives {
            self.handle.check_running()?;

            let (files, extract_errors) = extract_rule_files(&archive).inspect_err(|e| {
                error!(package = %package, error = %e, "unable to open sigma package");
            })?;
            let (detections, parse_errors) =
                parse_package_files(&package, files, LICENSE_DRL, &self.filter);

            debug!(
                package = %package,
                detections = detections.len(),
                errors = extract_errors.len() + parse_errors.len(),
                "parsed sigma package"
            );
            fetched.detections.extend(detections);
            fetched.errors.extend(extract_errors);
            fetched.errors.extend(parse_errors);
        }

        Ok(Some(fetched))
    }

    async fn apply(
        &self,
        _fingerprint: Option<&str>,
        _errors: &ErrorMap,
    ) -> Result<ErrorMap, EngineError> {
        self.deploy().await
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

impl<R: CommandRunner, F: PackageFetcher> DetectionEngine for ElastAlertEngine<R, F> {
    fn kind(&self) -> EngineKind {
        EngineKind::ElastAlert
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
            engine = %EngineKind::ElastAlert,
            packages = ?normalize_packages(&inner.config.sigma_packages),
            "elastalert engine started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), RulekeeperError> {
        self.inner.handle.shutdown().await?;
        info!(engine = %EngineKind::ElastAlert, "elastalert engine stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        engine_health(&self.inner.handle, &self.inner.state)
    }

    fn is_running(&self) -> bool {
        self.inner.handle.is_running()
    }

    fn validate_rule(&self, content: &str) -> Result<String, EngineError> {
        SigmaRule::parse(content)?;
        Ok(content.to_owned())
    }

    fn extract_details(&self, detection: &mut Detection) -> Result<(), EngineError> {
        let rule = SigmaRule::parse(&detection.content)?;
        let details = rule.to_detection(
            &detection.content,
            &detection.ruleset,
            &detection.license,
            detection.is_community,
        );

        if rule.id.is_some() || detection.public_id.is_empty() {
            detection.public_id = details.public_id;
        }
        detection.title = details.title;
        detection.severity = details.severity;
        detection.description = details.description;
        detection.category = details.category;
        detection.product = details.product;
        detection.service = details.service;
        if rule.author.is_some() {
            detection.author = details.author;
        }
        Ok(())
    }

    async fn duplicate_detection(
        &self,
        ctx: &RequestContext,
        detection: &Detection,
    ) -> Result<Detection, EngineError> {
        let mut rule = SigmaRule::parse(&detection.content)?;
        let public_id = self.generate_unused_public_id().await?;

        rule.id = Some(public_id);
        rule.title = format!("{} (copy)", rule.title);
        let content = serde_yaml::to_string(&rule)
            .map_err(|e| EngineError::Parse(format!("unable to serialize sigma rule: {e}")))?;

        let mut copy = rule.to_detection(&content, RULESET_CUSTOM, &detection.license, false);
        copy.author = add_user(&copy.author, &ctx.user, ", ");
        Ok(copy)
    }

    async fn convert_rule(&self, detection: &Detection) -> Result<String, EngineError> {
        self.inner.render(detection).await
    }

    async fn generate_unused_public_id(&self) -> Result<String, EngineError> {
        for _ in 0..PUBLIC_ID_ATTEMPTS {
            let candidate = uuid::Uuid::new_v4().to_string();
            let existing = self
                .inner
                .context
                .store
                .get_detection_by_public_id(EngineKind::ElastAlert, &candidate)
                .await?;
            if existing.is_none() {
                return Ok(candidate);
            }
        }
        Err(EngineError::Transport(
            "unable to generate an unused public id".to_owned(),
        ))
    }

    async fn sync_local_detections(&self, detections: &[Detection]) -> Result<ErrorMap, EngineError> {
        self.inner.write_rules(detections).await
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

/// 규칙 폴더 밖을 가리키지 않는 파일 이름인지 확인합니다.
///
/// `id`가 없는 Sigma 규칙은 제목이 PublicID가 되므로 공백 등은 허용합니다.
fn is_safe_file_stem(public_id: &str) -> bool {
    !public_id.is_empty()
        && !public_id.starts_with('.')
        && !public_id.contains(['/', '\\', '\0'])
}
