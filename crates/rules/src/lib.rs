#![doc = include_str!("../README.md")]
//!
//! # 모듈 구성
//!
//! - [`yara`]: 문자 단위 상태 기계 파서, 직렬화, 누락 import 보완
//! - [`suricata`]: 한 줄 규칙 파서, 탐지 추출, 필러 병합기
//! - [`sigma`]: Sigma 규칙 모델, 패키지 선택, ElastAlert 래퍼
//! - [`filter`]: 허용/거부 정규식 필터
//! - [`error`]: 파싱 에러 타입
//!
//! # 흐름
//!
//! ```text
//! rule text ──parse──▶ YaraRule / SuricataRule / SigmaRule ──to_detection──▶ Detection
//!                                  │
//!                              Display / to_yaml
//!                                  ▼
//!                            rule text (정규화)
//! ```

pub mod error;
pub mod filter;
pub mod sigma;
pub mod suricata;
pub mod yara;

// --- 주요 타입 re-export ---

pub use error::RuleParseError;
pub use filter::RuleFilter;

pub use sigma::{ElastAlertRule, SigmaRule};
pub use suricata::{PillarLists, PillarMerger, SuricataRule};
pub use yara::YaraRule;
