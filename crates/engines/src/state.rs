//! 상태 파일 -- 마지막 가져오기 시각과 규칙 파일 지문
//!
//! 상태 파일은 Unix 초 하나만 담은 텍스트 파일입니다. 파일이 없으면 첫 실행으로 보고
//! 유예 시간을 기다립니다. 손상된 파일은 삭제하고 없는 것으로 취급합니다.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};

use rulekeeper_core::error::EngineError;

/// 상태 파일이 없을 때 첫 가져오기까지의 유예 시간
pub const FIRST_IMPORT_GRACE: Duration = Duration::from_secs(20 * 60);

/// 마지막 가져오기 시각과 다음 주기까지의 대기 시간을 계산합니다.
///
/// 다음 예정 시각이 이미 지났으면 대기 시간은 0입니다.
pub async fn determine_wait_time(path: &Path, frequency: Duration) -> (Option<u64>, Duration) {
    let last_import = match read_state_file(path).await {
        Ok(last) => last,
        Err(e) => {
            error!(path = %path.display(), error = %e, "unable to read state file, deleting it");
            if let Err(e) = tokio::fs::remove_file(path).await {
                error!(path = %path.display(), error = %e, "unable to remove state file, ignoring it");
            }
            None
        }
    };

    match last_import {
        Some(last) => {
            let next = last.saturating_add(frequency.as_secs());
            let now = now_unix();
            (Some(last), Duration::from_secs(next.saturating_sub(now)))
        }
        None => {
            info!(path = %path.display(), "no state file found, waiting for first import");
            (None, FIRST_IMPORT_GRACE)
        }
    }
}

/// 상태 파일을 읽습니다. 파일이 없으면 `Ok(None)`입니다.
pub async fn read_state_file(path: &Path) -> Result<Option<u64>, EngineError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    raw.trim().parse::<u64>().map(Some).map_err(|e| {
        EngineError::Transport(format!(
            "unable to parse state file {}: {e}",
            path.display()
        ))
    })
}

/// 현재 시각을 상태 파일에 기록합니다. 실패는 로그만 남깁니다.
pub async fn write_state_file(path: &Path) {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
        && let Err(e) = tokio::fs::create_dir_all(parent).await
    {
        warn!(path = %parent.display(), error = %e, "unable to create state directory");
    }

    if let Err(e) = tokio::fs::write(path, now_unix().to_string()).await {
        error!(path = %path.display(), error = %e, "unable to write state file");
    }
}

/// 파일 내용과 SHA-256(hex)을 함께 반환합니다.
pub async fn read_and_hash(path: &Path) -> Result<(String, String), EngineError> {
    let raw = tokio::fs::read(path).await.map_err(|e| {
        EngineError::Transport(format!("unable to read {}: {e}", path.display()))
    })?;
    let hash = sha256_hex(&raw);
    let content = String::from_utf8_lossy(&raw).into_owned();
    Ok((content, hash))
}

/// 지문 파일을 읽습니다. 파일이 없으면 `Ok(None)`입니다.
pub async fn read_fingerprint(path: &Path) -> Result<Option<String>, EngineError> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => Ok(Some(raw.trim().to_owned())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// 지문 파일을 기록합니다.
pub async fn write_fingerprint(path: &Path, hash: &str) -> Result<(), EngineError> {
    tokio::fs::write(path, hash).await?;
    Ok(())
}

/// 바이트열의 SHA-256 (소문자 hex)
pub fn sha256_hex(data: &[u8]) -> String {
    Sha256::digest(data)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn now_unix() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}
