//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `rulekeeper_`
//! - 영역: `sync_`, `detections_`, `integrity_`, `compile_`, `engine_`, `daemon_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//! use rulekeeper_core::metrics::{LABEL_ENGINE, LABEL_STATUS, SYNC_CYCLES_TOTAL};
//!
//! counter!(SYNC_CYCLES_TOTAL, LABEL_ENGINE => "strelka", LABEL_STATUS => "success").increment(1);
//! ```

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 엔진 레이블 키 (strelka, suricata, elastalert)
pub const LABEL_ENGINE: &str = "engine";

/// 동기화 결과 레이블 키 (success, partial, error)
pub const LABEL_STATUS: &str = "status";

/// 결과 레이블 키 (pass, fail)
pub const LABEL_RESULT: &str = "result";

/// 상태 플래그 레이블 키 (syncing, importing, migrating, sync_failure, integrity_failure)
pub const LABEL_FLAG: &str = "flag";

// ─── 동기화 메트릭 ─────────────────────────────────────────────────

/// 완료된 동기화 주기 수 (counter, labels: engine, status)
pub const SYNC_CYCLES_TOTAL: &str = "rulekeeper_sync_cycles_total";

/// 동기화 주기 소요 시간 (histogram, 초, label: engine)
pub const SYNC_DURATION_SECONDS: &str = "rulekeeper_sync_duration_seconds";

/// 연속 실패 임계치로 중단된 주기 수 (counter, label: engine)
pub const SYNC_ABORTED_TOTAL: &str = "rulekeeper_sync_aborted_total";

// ─── 탐지 메트릭 ───────────────────────────────────────────────────

/// 생성된 탐지 수 (counter, label: engine)
pub const DETECTIONS_CREATED_TOTAL: &str = "rulekeeper_detections_created_total";

/// 갱신된 탐지 수 (counter, label: engine)
pub const DETECTIONS_UPDATED_TOTAL: &str = "rulekeeper_detections_updated_total";

/// 삭제된 탐지 수 (counter, label: engine)
pub const DETECTIONS_DELETED_TOTAL: &str = "rulekeeper_detections_deleted_total";

/// 파싱에 실패한 규칙 수 (counter, label: engine)
pub const DETECTIONS_PARSE_ERRORS_TOTAL: &str = "rulekeeper_detections_parse_errors_total";

// ─── 무결성 / 컴파일 메트릭 ────────────────────────────────────────

/// 무결성 검사 결과 수 (counter, labels: engine, result)
pub const INTEGRITY_CHECKS_TOTAL: &str = "rulekeeper_integrity_checks_total";

/// 규칙 컴파일 소요 시간 (histogram, 초, label: engine)
pub const COMPILE_DURATION_SECONDS: &str = "rulekeeper_compile_duration_seconds";

// ─── 엔진 / 데몬 메트릭 ────────────────────────────────────────────

/// 엔진 상태 플래그 (gauge, 0 또는 1, labels: engine, flag)
pub const ENGINE_STATE: &str = "rulekeeper_engine_state";

/// 데몬 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "rulekeeper_daemon_uptime_seconds";

/// 등록된 엔진 수 (gauge)
pub const DAEMON_ENGINES_REGISTERED: &str = "rulekeeper_daemon_engines_registered";

/// 빌드 정보 (gauge, 항상 1, labels: version)
pub const DAEMON_BUILD_INFO: &str = "rulekeeper_daemon_build_info";

// ─── 히스토그램 버킷 정의 ────────────────────────────────────────────

/// 동기화 주기 히스토그램 버킷 (초)
///
/// 1s ~ 1h 범위 (git clone, 수만 개 규칙 upsert 포함)
pub const SYNC_DURATION_BUCKETS: [f64; 10] = [
    1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0,
];

/// 컴파일 히스토그램 버킷 (초)
pub const COMPILE_DURATION_BUCKETS: [f64; 8] = [0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0];

// ─── 설명 등록 함수 ─────────────────────────────────────────────────

/// 모든 메트릭의 설명(description)을 등록합니다.
///
/// 전역 레코더 설치 후 한 번만 호출해야 합니다.
/// 일반적으로 `rulekeeper-daemon`의 시작 시점에서 호출합니다.
pub fn describe_all() {
    use metrics::{describe_counter, describe_gauge, describe_histogram};

    // Sync
    describe_counter!(
        SYNC_CYCLES_TOTAL,
        "Completed community sync cycles by engine and outcome"
    );
    describe_histogram!(
        SYNC_DURATION_SECONDS,
        "Duration of a community sync cycle in seconds"
    );
    describe_counter!(
        SYNC_ABORTED_TOTAL,
        "Sync cycles aborted after too many consecutive errors"
    );

    // Detections
    describe_counter!(
        DETECTIONS_CREATED_TOTAL,
        "Detections created in the store"
    );
    describe_counter!(
        DETECTIONS_UPDATED_TOTAL,
        "Detections updated in the store"
    );
    describe_counter!(
        DETECTIONS_DELETED_TOTAL,
        "Detections deleted from the store"
    );
    describe_counter!(
        DETECTIONS_PARSE_ERRORS_TOTAL,
        "Rules that failed to parse during import"
    );

    // Integrity / compile
    describe_counter!(
        INTEGRITY_CHECKS_TOTAL,
        "Integrity check outcomes by engine and result"
    );
    describe_histogram!(
        COMPILE_DURATION_SECONDS,
        "Rule compiler subprocess duration in seconds"
    );

    // Engine / daemon
    describe_gauge!(ENGINE_STATE, "Engine state flags (1 = set)");
    describe_gauge!(DAEMON_UPTIME_SECONDS, "Rulekeeper daemon uptime in seconds");
    describe_gauge!(
        DAEMON_ENGINES_REGISTERED,
        "Number of detection engines registered in the daemon"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_METRIC_NAMES: &[&str] = &[
        SYNC_CYCLES_TOTAL,
        SYNC_DURATION_SECONDS,
        SYNC_ABORTED_TOTAL,
        DETECTIONS_CREATED_TOTAL,
        DETECTIONS_UPDATED_TOTAL,
        DETECTIONS_DELETED_TOTAL,
        DETECTIONS_PARSE_ERRORS_TOTAL,
        INTEGRITY_CHECKS_TOTAL,
        COMPILE_DURATION_SECONDS,
        ENGINE_STATE,
        DAEMON_UPTIME_SECONDS,
        DAEMON_ENGINES_REGISTERED,
        DAEMON_BUILD_INFO,
    ];

    #[test]
    fn all_metrics_start_with_rulekeeper_prefix() {
        for name in ALL_METRIC_NAMES {
            assert!(
                name.starts_with("rulekeeper_"),
                "Metric '{}' does not start with 'rulekeeper_' prefix",
                name
            );
        }
    }

    #[test]
    fn metric_names_are_unique() {
        let mut names = ALL_METRIC_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), ALL_METRIC_NAMES.len());
    }

    #[test]
    fn counters_end_with_total() {
        for name in [
            SYNC_CYCLES_TOTAL,
            SYNC_ABORTED_TOTAL,
            DETECTIONS_CREATED_TOTAL,
            DETECTIONS_UPDATED_TOTAL,
            DETECTIONS_DELETED_TOTAL,
            DETECTIONS_PARSE_ERRORS_TOTAL,
            INTEGRITY_CHECKS_TOTAL,
        ] {
            assert!(name.ends_with("_total"), "{name}");
        }
    }

    #[test]
    fn describe_all_does_not_panic() {
        describe_all();
    }

    #[test]
    fn label_keys_are_lowercase() {
        for label in [LABEL_ENGINE, LABEL_STATUS, LABEL_RESULT, LABEL_FLAG] {
            assert_eq!(label.to_lowercase(), label);
        }
    }

    #[test]
    fn histogram_buckets_are_sorted() {
        for buckets in [&SYNC_DURATION_BUCKETS[..], &COMPILE_DURATION_BUCKETS[..]] {
            for pair in buckets.windows(2) {
                assert!(pair[1] > pair[0], "Bucket values must be in ascending order");
            }
        }
    }
}
