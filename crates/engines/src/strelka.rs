//! YARA(Strelka) 엔진 -- git 저장소 규칙 동기화, 규칙 파일 배포, 컴파일
//!
//! # 내부 아키텍처
//! ```text
//! git repos ──update_repos──▶ *.yar ──parse_rules──▶ Detection ──reconcile──▶ store
//!                                                                     │
//! store (enabled) ──▶ rules_folder/{PublicID}.yar ──python3 compile──▶ compiled rules
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use metrics::histogram;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use rulekeeper_core::config::{StrelkaConfig, SyncTiming};
use rulekeeper_core::engine::{DetectionEngine, RequestContext};
use rulekeeper_core::error::{EngineError, RulekeeperError};
use rulekeeper_core::metrics::{COMPILE_DURATION_SECONDS, LABEL_ENGINE};
use rulekeeper_core::pipeline::HealthStatus;
use rulekeeper_core::store::DetectionFilter;
use rulekeeper_core::types::{
    Detection, EngineKind, EngineState, EngineStateSnapshot, ErrorMap, RULESET_CUSTOM, add_user,
};
use rulekeeper_rules::RuleFilter;
use rulekeeper_rules::error::RuleParseError;
use rulekeeper_rules::yara::{self, YaraRule, rename_for_copy};

use crate::command::{CommandRunner, CommandSpec, ProcessRunner};
use crate::handle::TaskHandle;
use crate::integrity::{self, IntegritySource, integrity_loop};
use crate::repos::update_repos;
use crate::sync::{
    CommunitySource, CycleReport, EngineContext, Enablement, FetchedRules, engine_health,
    run_cycle, run_sync_loop,
};

/// 규칙 파일 확장자
const RULE_EXTENSION: &str = "yar";
/// 배포 전 정리하는 확장자
const CLEARED_EXTENSIONS: [&str; 2] = ["yar", "compiled"];

/// YARA 탐지 엔진
///
/// 커뮤니티 규칙은 설정된 git 저장소에서 가져오고, 활성화된 규칙은
/// `rules_folder`에 파일로 쓴 뒤 컴파일 스크립트를 실행해 배포합니다.
pub struct StrelkaEngine<R: CommandRunner = ProcessRunner> {
    inner: Arc<StrelkaInner<R>>,
}

struct StrelkaInner<R: CommandRunner> {
    config: StrelkaConfig,
    context: EngineContext,
    runner: R,
    filter: RuleFilter,
    handle: Arc<TaskHandle>,
    state: Arc<EngineState>,
}

impl StrelkaEngine<ProcessRunner> {
    /// 서브프로세스로 git과 컴파일러를 실행하는 엔진을 만듭니다.
    pub fn new(config: StrelkaConfig, context: EngineContext) -> Result<Self, EngineError> {
        Self::with_runner(config, context, ProcessRunner)
    }
}

impl<R: CommandRunner> StrelkaEngine<R> {
    /// 명령 실행기를 지정해 엔진을 만듭니다.
    pub fn with_runner(
        config: StrelkaConfig,
        context: EngineContext,
        runner: R,
    ) -> Result<Self, EngineError> {
        let filter = RuleFilter::from_patterns(&config.allow_regex, &config.deny_regex)
            .map_err(|e| EngineError::Parse(format!("invalid strelka rule filter: {e}")))?;

        Ok(Self {
            inner: Arc::new(StrelkaInner {
                config,
                context,
                runner,
                filter,
                handle: Arc::new(TaskHandle::new()),
                state: Arc::new(EngineState::default()),
            }),
        })
    }

    /// 명령 실행기 (테스트에서 호출 기록 확인용)
    pub fn runner(&self) -> &R {
        &self.inner.runner
    }

    /// 커뮤니티 동기화 한 주기를 즉시 실행합니다.
    ///
    /// 백그라운드 루프와 달리 상태 알림과 사후 무결성 검사는 하지 않습니다.
    pub async fn sync_community(&self, force: bool) -> Result<CycleReport, EngineError> {
        let mut template_found = false;
        run_cycle(self.inner.as_ref(), force, &mut template_found).await
    }
}

impl<R: CommandRunner> StrelkaInner<R> {
    fn integrity_source(&self) -> IntegritySource {
        IntegritySource {
            engine: EngineKind::Strelka,
            report_path: PathBuf::from(&self.config.compilation_report_path),
            compiled_path: Some(PathBuf::from(&self.config.compiled_rules_path))
                .filter(|p| !p.as_os_str().is_empty()),
        }
    }

    /// 활성화된 YARA 탐지를 규칙 폴더에 쓰고 컴파일합니다.
    async fn deploy(&self) -> Result<ErrorMap, EngineError> {
        let enabled = self
            .context
            .store
            .get_all_detections(DetectionFilter::engine(EngineKind::Strelka).enabled(true))
            .await?;
        self.handle.check_running()?;

        let folder = Path::new(&self.config.rules_folder);
        clear_rules_folder(folder).await?;

        for (public_id, det) in &enabled {
            self.handle.check_running()?;
            let path = folder.join(format!("{public_id}.{RULE_EXTENSION}"));
            tokio::fs::write(&path, &det.content).await.map_err(|e| {
                EngineError::Transport(format!(
                    "failed to write file for detection {public_id}: {e}"
                ))
            })?;
        }

        // 규칙이 없어도 컴파일은 실행 (빈 산출물과 보고서 갱신)
        let spec = CommandSpec::new("python3")
            .arg(self.config.compile_script.as_str())
            .arg(self.config.rules_folder.as_str());
        let out = self.runner.run(&spec).await?;

        histogram!(COMPILE_DURATION_SECONDS, LABEL_ENGINE => EngineKind::Strelka.as_str())
            .record(out.duration.as_secs_f64());
        info!(
            command = %spec,
            exit_code = ?out.exit_code,
            duration_secs = out.duration.as_secs_f64(),
            rules = enabled.len(),
            "yara compilation results"
        );

        if !out.success() {
            error!(output = %out.output.trim(), "yara compilation failed");
            return Err(EngineError::Compile {
                exit_code: out.exit_code,
                output: out.output,
            });
        }

        Ok(ErrorMap::new())
    }
}

/// `.yar`, `.compiled` 파일을 지웁니다. 폴더가 없으면 만듭니다.
async fn clear_rules_folder(folder: &Path) -> Result<(), EngineError> {
    tokio::fs::create_dir_all(folder).await.map_err(|e| {
        EngineError::Transport(format!(
            "failed to create rules folder {}: {e}",
            folder.display()
        ))
    })?;

    let mut entries = tokio::fs::read_dir(folder)
        .await
        .map_err(|e| EngineError::Transport(format!("failed to read directory: {e}")))?;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if has_extension(&path, &CLEARED_EXTENSIONS) {
            tokio::fs::remove_file(&path).await.map_err(|e| {
                EngineError::Transport(format!(
                    "failed to delete existing rule file {}: {e}",
                    path.display()
                ))
            })?;
        }
    }
    Ok(())
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|x| ext.eq_ignore_ascii_case(x)))
}

/// 저장소 하위의 `.yar` 파일 목록
fn rule_files(dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "failed while walking repo");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| has_extension(path, &[RULE_EXTENSION]))
        .collect()
}

fn first_rule(content: &str) -> Result<YaraRule, RuleParseError> {
    yara::parse_rules(content, None)?
        .into_iter()
        .next()
        .ok_or(RuleParseError::Empty)
}

// ─── Community Source ────────────────────────────────────────────────

impl<R: CommandRunner> CommunitySource for StrelkaInner<R> {
    fn kind(&self) -> EngineKind {
        EngineKind::Strelka
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

    async fn fetch(&self, force: bool) -> Result<Option<FetchedRules>, EngineError> {
        let update = update_repos(
            &self.runner,
            &self.handle,
            Path::new(&self.config.repos_folder),
            &self.config.repos,
        )
        .await?;

        if !update.anything_new && !force {
            return Ok(None);
        }

        // 조정 단계는 기존 커뮤니티 탐지 전체와 비교하므로 바뀌지 않은 저장소도 읽어야 함
        let mut fetched = FetchedRules::default();
        for repo in update.repos.values() {
            let ruleset = repo.folder_name();
            for path in rule_files(&repo.rules_dir()) {
                self.handle.check_running()?;

                let raw = match tokio::fs::read_to_string(&path).await {
                    Ok(raw) => raw,
                    Err(e) => {
                        error!(yara_rule_file = %path.display(), error = %e, "failed to read yara rule file");
                        fetched
                            .errors
                            .insert(path.display().to_string(), e.to_string());
                        continue;
                    }
                };

                match yara::parse_rules(&raw, Some(&self.filter)) {
                    Ok(rules) => {
                        debug!(yara_rule_file = %path.display(), rules = rules.len(), "parsed yara rule file");
                        fetched.detections.extend(rules.iter().map(|rule| {
                            rule.to_detection(&repo.repo.license, &ruleset, repo.repo.community)
                        }));
                    }
                    Err(e) => {
                        error!(yara_rule_file = %path.display(), error = %e, "failed to parse yara rule file");
                        fetched
                            .errors
                            .insert(path.display().to_string(), e.to_string());
                    }
                }
            }
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

impl<R: CommandRunner> DetectionEngine for StrelkaEngine<R> {
    fn kind(&self) -> EngineKind {
        EngineKind::Strelka
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
            engine = %EngineKind::Strelka,
            repos = inner.config.repos.len(),
            "strelka engine started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), RulekeeperError> {
        self.inner.handle.shutdown().await?;
        info!(engine = %EngineKind::Strelka, "strelka engine stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        engine_health(&self.inner.handle, &self.inner.state)
    }

    fn is_running(&self) -> bool {
        self.inner.handle.is_running()
    }

    fn validate_rule(&self, content: &str) -> Result<String, EngineError> {
        yara::parse_rules(content, None)?;
        Ok(content.to_owned())
    }

    fn extract_details(&self, detection: &mut Detection) -> Result<(), EngineError> {
        let rule = first_rule(&detection.content)?;
        let details = rule.to_detection(&detection.license, &detection.ruleset, detection.is_community);

        detection.title = details.title;
        detection.public_id = detection.title.clone();
        detection.severity = details.severity;
        if rule.meta.description.is_some() {
            detection.description = details.description;
        }
        if rule.meta.author.is_some() {
            detection.author = details.author;
        }
        Ok(())
    }

    async fn duplicate_detection(
        &self,
        ctx: &RequestContext,
        detection: &Detection,
    ) -> Result<Detection, EngineError> {
        let rule = first_rule(&detection.content)?;
        let renamed = rename_for_copy(&rule.src);

        let mut copy = first_rule(&renamed)?.to_detection(&detection.license, RULESET_CUSTOM, false);
        self.extract_details(&mut copy)?;
        copy.author = add_user(&copy.author, &ctx.user, "; ");
        Ok(copy)
    }

    async fn convert_rule(&self, _detection: &Detection) -> Result<String, EngineError> {
        Err(EngineError::NotImplemented)
    }

    /// YARA의 PublicID는 규칙 이름이므로 임의로 만들 수 없습니다.
    async fn generate_unused_public_id(&self) -> Result<String, EngineError> {
        Err(EngineError::NotImplemented)
    }

    async fn sync_local_detections(&self, _detections: &[Detection]) -> Result<ErrorMap, EngineError> {
        self.inner.deploy().await
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
