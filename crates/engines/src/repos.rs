//! git 규칙 저장소 갱신 -- 얕은 clone / reset + pull, 변경 여부 추적
//!
//! 저장소 폴더 이름은 URL 경로의 마지막 구간입니다. 설정에서 빠진 저장소 폴더는 삭제합니다.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use rulekeeper_core::error::EngineError;
use rulekeeper_core::types::RuleRepo;

use crate::command::{CommandRunner, CommandSpec};
use crate::handle::TaskHandle;

/// git 명령 하나의 제한 시간
const GIT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// 갱신된 저장소
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyRepo {
    /// 로컬 작업 폴더
    pub path: PathBuf,
    pub repo: RuleRepo,
    /// 이번 갱신에서 새 커밋을 받았는지
    pub was_modified: bool,
}

impl DirtyRepo {
    /// 규칙을 찾을 기준 폴더 (`folder`가 있으면 하위 폴더)
    pub fn rules_dir(&self) -> PathBuf {
        match &self.repo.folder {
            Some(folder) => self.path.join(folder),
            None => self.path.clone(),
        }
    }

    /// 저장소 폴더 이름 (커뮤니티 규칙의 룰셋으로 사용)
    pub fn folder_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// 저장소 갱신 결과
#[derive(Debug, Default)]
pub struct RepoUpdate {
    /// 로컬 경로 → 저장소
    pub repos: BTreeMap<PathBuf, DirtyRepo>,
    /// 하나라도 새로 받았는지
    pub anything_new: bool,
}

/// URL에서 저장소 폴더 이름을 구합니다.
pub fn repo_folder_name(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let name = without_query
        .trim_end_matches('/')
        .rsplit(['/', ':'])
        .next()
        .unwrap_or_default();
    if name.is_empty() {
        None
    } else {
        Some(name.to_owned())
    }
}

/// 설정된 저장소를 모두 clone 또는 pull 합니다.
///
/// 저장소 하나의 실패는 로그만 남기고 건너뜁니다. 정지 신호를 받으면
/// `ModuleStopped`를 반환합니다.
pub async fn update_repos<R: CommandRunner>(
    runner: &R,
    handle: &TaskHandle,
    base_folder: &Path,
    repos: &[RuleRepo],
) -> Result<RepoUpdate, EngineError> {
    tokio::fs::create_dir_all(base_folder).await.map_err(|e| {
        EngineError::Transport(format!(
            "failed to create repos folder {}: {e}",
            base_folder.display()
        ))
    })?;

    let mut existing = existing_repo_folders(base_folder).await?;
    let mut update = RepoUpdate::default();

    for repo in repos {
        handle.check_running()?;

        let Some(folder) = repo_folder_name(&repo.repo) else {
            error!(repo_url = %repo.repo, "failed to parse repo URL, doing nothing with it");
            continue;
        };
        let path = base_folder.join(&folder);
        let mut dirty = DirtyRepo {
            path: path.clone(),
            repo: repo.clone(),
            was_modified: false,
        };

        let was_present = existing.remove(&folder);
        let mut reclone = false;

        if was_present {
            match pull(runner, &path).await {
                Ok(modified) => dirty.was_modified = modified,
                Err(e) => {
                    error!(repo_path = %path.display(), error = %e, "failed to pull repo, recloning");
                    reclone = true;
                }
            }
        }

        if reclone {
            info!(repo_path = %path.display(), "removing problematic repo before re-clone");
            if let Err(e) = tokio::fs::remove_dir_all(&path).await {
                error!(repo_path = %path.display(), error = %e, "failed to remove repo, doing nothing with it");
                update.repos.insert(path, dirty);
                continue;
            }
        }

        if !was_present || reclone {
            match clone(runner, &repo.repo, &path).await {
                Ok(()) => dirty.was_modified = true,
                Err(e) => {
                    error!(repo_path = %path.display(), error = %e, "failed to clone repo, doing nothing with it");
                    update.repos.insert(path, dirty);
                    continue;
                }
            }
        }

        update.anything_new |= dirty.was_modified;
        update.repos.insert(path, dirty);
    }

    // 설정에서 빠진 저장소 정리
    for folder in existing {
        let path = base_folder.join(&folder);
        info!(repo_path = %path.display(), "removing repo no longer configured");
        if let Err(e) = tokio::fs::remove_dir_all(&path).await {
            warn!(repo_path = %path.display(), error = %e, "failed to remove repo, doing nothing with it");
        }
    }

    Ok(update)
}

async fn existing_repo_folders(base: &Path) -> Result<HashSet<String>, EngineError> {
    let mut folders = HashSet::new();
    let mut entries = tokio::fs::read_dir(base).await.map_err(|e| {
        EngineError::Transport(format!("failed to read repos folder {}: {e}", base.display()))
    })?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            folders.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(folders)
}

/// reset --hard 후 얕게 pull 합니다. HEAD가 바뀌었으면 `true`입니다.
async fn pull<R: CommandRunner>(runner: &R, path: &Path) -> Result<bool, EngineError> {
    let before = git(runner, path, &["rev-parse", "HEAD"]).await?;
    git(runner, path, &["reset", "--hard"]).await?;
    git(runner, path, &["pull", "--depth", "1"]).await?;
    let after = git(runner, path, &["rev-parse", "HEAD"]).await?;
    Ok(before.trim() != after.trim())
}

async fn clone<R: CommandRunner>(runner: &R, url: &str, path: &Path) -> Result<(), EngineError> {
    let spec = CommandSpec::new("git").args([
        "clone".to_owned(),
        "--depth".to_owned(),
        "1".to_owned(),
        "--single-branch".to_owned(),
        url.to_owned(),
        path.display().to_string(),
    ]);
    run_git(runner, spec).await.map(|_| ())
}

async fn git<R: CommandRunner>(
    runner: &R,
    path: &Path,
    args: &[&str],
) -> Result<String, EngineError> {
    let spec = CommandSpec::new("git")
        .arg("-C")
        .arg(path.display().to_string())
        .args(args.iter().copied());
    run_git(runner, spec).await
}

async fn run_git<R: CommandRunner>(runner: &R, spec: CommandSpec) -> Result<String, EngineError> {
    let out = tokio::time::timeout(GIT_TIMEOUT, runner.run(&spec))
        .await
        .map_err(|_| EngineError::Transport(format!("'{spec}' timed out")))??;
    if !out.success() {
        return Err(EngineError::Transport(format!(
            "'{spec}' exited with {:?}: {}",
            out.exit_code,
            out.output.trim()
        )));
    }
    Ok(out.output)
}
