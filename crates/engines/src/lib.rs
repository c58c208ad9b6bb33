#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`strelka`], [`suricata`], [`elastalert`]: 구체 탐지 엔진 (YARA, Suricata, Sigma)
//! - [`coordinator`]: 저장 전 정리, 엔진별 배치 배포, 일괄 작업
//! - [`sync`]: 엔진 공통 커뮤니티 동기화 루프와 저장소 조정
//! - [`integrity`]: 배포 상태와 활성화 상태 비교
//! - [`error_tracker`]: 연속 실패 임계치
//! - [`handle`]: 백그라운드 태스크 핸들 (취소 토큰 + 인터럽트 슬롯)
//! - [`state`]: 마지막 가져오기 시각, 지문 파일
//! - [`repos`]: git 규칙 저장소 갱신
//! - [`package`]: Sigma 패키지 다운로드와 압축 해제
//! - [`command`]: 서브프로세스 실행 seam
//!
//! # 아키텍처
//!
//! ```text
//! git / HTTP / rules file ──fetch──▶ parse ──reconcile──▶ DetectionStore
//!                                                              │
//! DetectionCoordinator ──sync_local_detections──▶ engine ──▶ rule files / pillar / compile
//!                                                              │
//!                           integrity loop ◀── compilation report
//! ```

pub mod command;
pub mod coordinator;
pub mod elastalert;
pub mod error_tracker;
pub mod handle;
pub mod integrity;
pub mod package;
pub mod repos;
pub mod state;
pub mod strelka;
pub mod suricata;
pub mod sync;

// --- 주요 타입 re-export ---

// 엔진
pub use elastalert::ElastAlertEngine;
pub use strelka::StrelkaEngine;
pub use suricata::SuricataEngine;

// 코디네이터
pub use coordinator::{BulkAction, BulkReport, DetectionCoordinator, LocalSyncResult, SavedDetection};

// 동기화
pub use sync::{CycleReport, EngineContext};

// 실행기 / 수신기
pub use command::{CommandRunner, MockCommandRunner, ProcessRunner};
pub use package::{HttpPackageFetcher, PackageFetcher, StaticPackageFetcher};

pub use error_tracker::ErrorTracker;
pub use handle::TaskHandle;
