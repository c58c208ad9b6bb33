//! 이벤트 -- 엔진 동기화 결과 알림
//!
//! 동기화 주기가 끝날 때마다 [`SyncStatus`]가 broadcast 채널로 전송됩니다.
//! 전달 실패는 동기화 결과에 영향을 주지 않습니다.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::types::EngineKind;

/// 동기화 이벤트 채널 용량
pub const SYNC_STATUS_CHANNEL_CAPACITY: usize = 64;

/// 동기화 주기 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncOutcome {
    /// 모든 항목 성공
    Success,
    /// 일부 항목 실패
    Partial,
    /// 주기 실패
    Error,
}

impl fmt::Display for SyncOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Partial => write!(f, "partial"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// 엔진 동기화 상태 알림
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub engine: EngineKind,
    pub status: SyncOutcome,
}

/// 동기화 상태 알림 송신기
///
/// 수신자가 없어도 에러 없이 무시합니다.
#[derive(Debug, Clone)]
pub struct SyncNotifier {
    tx: broadcast::Sender<SyncStatus>,
}

impl SyncNotifier {
    /// 새 채널을 만들고 송신기를 반환합니다.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(SYNC_STATUS_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// 새 수신자를 구독합니다.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    /// 상태를 전송합니다.
    pub fn notify(&self, engine: EngineKind, status: SyncOutcome) {
        if self.tx.send(SyncStatus { engine, status }).is_err() {
            debug!(engine = %engine, status = %status, "no sync status subscribers");
        }
    }
}

impl Default for SyncNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_status() {
        let notifier = SyncNotifier::new();
        let mut rx = notifier.subscribe();
        notifier.notify(EngineKind::Strelka, SyncOutcome::Partial);

        let status = rx.recv().await.unwrap();
        assert_eq!(status.engine, EngineKind::Strelka);
        assert_eq!(status.status, SyncOutcome::Partial);
    }

    #[test]
    fn notify_without_subscribers_does_not_fail() {
        let notifier = SyncNotifier::new();
        notifier.notify(EngineKind::Suricata, SyncOutcome::Error);
    }

    #[test]
    fn outcome_serializes_lowercase() {
        let json = serde_json::to_string(&SyncStatus {
            engine: EngineKind::ElastAlert,
            status: SyncOutcome::Success,
        })
        .unwrap();
        assert_eq!(json, r#"{"engine":"elastalert","status":"success"}"#);
    }
}
