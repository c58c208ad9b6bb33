//! 엔진 태스크 핸들 -- 취소 토큰, 용량 1 인터럽트 큐, 무결성 검사 일시정지 플래그
//!
//! 엔진마다 하나씩 소유하며 동기화 태스크와 무결성 검사 태스크가 공유합니다.
//!
//! ```text
//! interrupt(full, notify) ──try_send──▶ [cap 1] ──▶ wait() ──▶ Wake::Interrupt
//! shutdown() ──cancel──▶ CancellationToken ──▶ wait() ──▶ Wake::Cancelled
//! ```

use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use rulekeeper_core::error::{EngineError, PipelineError, RulekeeperError};

/// 대기가 끝난 이유
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// 타이머 만료
    Timer,
    /// 수동 인터럽트 (`full` = 전체 재동기화 요청)
    Interrupt { full: bool },
    /// 엔진 정지
    Cancelled,
}

/// 엔진 백그라운드 태스크 핸들
pub struct TaskHandle {
    cancel: CancellationToken,
    interrupt_tx: mpsc::Sender<bool>,
    interrupt_rx: AsyncMutex<mpsc::Receiver<bool>>,
    notify: AtomicBool,
    integrity_active: AtomicBool,
    integrity_wake: Notify,
    running: AtomicBool,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskHandle {
    pub fn new() -> Self {
        let (interrupt_tx, interrupt_rx) = mpsc::channel(1);
        Self {
            cancel: CancellationToken::new(),
            interrupt_tx,
            interrupt_rx: AsyncMutex::new(interrupt_rx),
            notify: AtomicBool::new(false),
            integrity_active: AtomicBool::new(false),
            integrity_wake: Notify::new(),
            running: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────

    /// 실행 상태로 전환합니다.
    ///
    /// 한 번 정지된 핸들은 재사용할 수 없습니다. 재시작하려면 엔진을 새로 만들어야 합니다.
    pub fn begin(&self) -> Result<(), RulekeeperError> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::InitFailed(
                "engine was stopped, build a new instance to restart".to_owned(),
            )
            .into());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::AlreadyRunning.into());
        }
        Ok(())
    }

    /// 백그라운드 태스크를 등록합니다.
    pub fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        match self.tasks.lock() {
            Ok(mut tasks) => tasks.push(handle),
            Err(_) => {
                warn!("task list lock poisoned, aborting spawned task");
                handle.abort();
            }
        }
    }

    /// 취소 신호를 보내고 모든 태스크의 종료를 기다립니다.
    pub async fn shutdown(&self) -> Result<(), RulekeeperError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Err(PipelineError::NotRunning.into());
        }

        self.pause_integrity();
        self.cancel.cancel();
        self.integrity_wake.notify_waiters();

        let tasks: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };

        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "engine task ended abnormally");
            }
        }
        Ok(())
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }

    /// 정지 중이면 `ModuleStopped`를 반환합니다.
    pub fn check_running(&self) -> Result<(), EngineError> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::ModuleStopped);
        }
        Ok(())
    }

    /// 취소 토큰 (하위 작업 전달용)
    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    // ─── Interrupt ───────────────────────────────────────────────────

    /// 대기 중인 동기화를 깨웁니다. 이미 대기 중인 신호가 있으면 합쳐집니다.
    pub fn interrupt(&self, full_upgrade: bool, notify: bool) {
        self.notify.store(notify, Ordering::SeqCst);
        if self.interrupt_tx.try_send(full_upgrade).is_err() {
            debug!(full_upgrade, "interrupt already pending, coalesced");
        }
    }

    /// 알림 요청 플래그를 지우고 남은 인터럽트를 비웁니다.
    pub async fn reset_interrupt(&self) {
        self.notify.store(false, Ordering::SeqCst);
        let mut rx = self.interrupt_rx.lock().await;
        while rx.try_recv().is_ok() {}
    }

    /// 타이머, 인터럽트, 취소 중 먼저 오는 것을 기다립니다.
    pub async fn wait(&self, duration: Duration) -> Wake {
        let mut rx = self.interrupt_rx.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => Wake::Cancelled,
            Some(full) = rx.recv() => Wake::Interrupt { full },
            _ = tokio::time::sleep(duration) => Wake::Timer,
        }
    }

    /// 마지막 인터럽트가 상태 알림을 요청했는지 확인합니다.
    pub fn should_notify(&self) -> bool {
        self.notify.load(Ordering::SeqCst)
    }

    // ─── Integrity ───────────────────────────────────────────────────

    /// 주기적 무결성 검사를 멈춥니다 (동기화 진행 중).
    pub fn pause_integrity(&self) {
        self.integrity_active.store(false, Ordering::SeqCst);
    }

    /// 주기적 무결성 검사를 재개합니다.
    pub fn resume_integrity(&self) {
        self.integrity_active.store(true, Ordering::SeqCst);
    }

    /// 무결성 검사가 일시정지 상태인지 확인합니다.
    pub fn is_integrity_paused(&self) -> bool {
        !self.integrity_active.load(Ordering::SeqCst)
    }

    /// 무결성 검사 주기를 기다립니다. 정지 시 `false`를 반환합니다.
    pub async fn wait_integrity(&self, period: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = self.integrity_wake.notified() => !self.cancel.is_cancelled(),
            _ = tokio::time::sleep(period) => true,
        }
    }
}

impl Default for TaskHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("running", &self.is_running())
            .field("integrity_paused", &self.is_integrity_paused())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn wait_returns_timer_when_nothing_happens() {
        let handle = TaskHandle::new();
        assert_eq!(handle.wait(Duration::from_secs(60)).await, Wake::Timer);
    }

    #[tokio::test(start_paused = true)]
    async fn pending_interrupts_are_coalesced() {
        let handle = TaskHandle::new();
        handle.interrupt(true, true);
        handle.interrupt(false, false);

        assert_eq!(
            handle.wait(Duration::from_secs(60)).await,
            Wake::Interrupt { full: true }
        );
        // 두 번째 신호는 첫 번째에 합쳐졌으므로 다음 대기는 타이머로 끝남
        assert_eq!(handle.wait(Duration::from_secs(60)).await, Wake::Timer);
        assert!(!handle.should_notify());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_interrupt_drains_pending_signal() {
        let handle = TaskHandle::new();
        handle.interrupt(true, true);
        assert!(handle.should_notify());

        handle.reset_interrupt().await;
        assert!(!handle.should_notify());
        assert_eq!(handle.wait(Duration::from_secs(1)).await, Wake::Timer);
    }

    #[tokio::test]
    async fn shutdown_cancels_waiters_and_joins_tasks() {
        let handle = std::sync::Arc::new(TaskHandle::new());
        handle.begin().unwrap();

        let waiter = std::sync::Arc::clone(&handle);
        let (tx, rx) = tokio::sync::oneshot::channel();
        handle.spawn(async move {
            let wake = waiter.wait(Duration::from_secs(3600)).await;
            let _ = tx.send(wake);
        });

        handle.shutdown().await.unwrap();
        assert_eq!(rx.await.unwrap(), Wake::Cancelled);
        assert!(!handle.is_running());
        assert!(matches!(
            handle.check_running(),
            Err(EngineError::ModuleStopped)
        ));
    }

    #[tokio::test]
    async fn stopped_handle_cannot_restart() {
        let handle = TaskHandle::new();
        handle.begin().unwrap();
        assert!(handle.begin().is_err());
        handle.shutdown().await.unwrap();

        let err = handle.begin().unwrap_err();
        assert!(err.to_string().contains("build a new instance"));
        assert!(handle.shutdown().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn integrity_pause_flag_and_wait() {
        let handle = TaskHandle::new();
        assert!(handle.is_integrity_paused());
        handle.resume_integrity();
        assert!(!handle.is_integrity_paused());
        assert!(handle.wait_integrity(Duration::from_secs(600)).await);
        handle.pause_integrity();
        assert!(handle.is_integrity_paused());
    }
}
