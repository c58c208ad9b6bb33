//! 연속 실패 추적기 -- 동기화 주기 안에서 연속 실패가 임계치에 닿으면 중단 신호
//!
//! 성공 한 번으로 카운터가 0으로 돌아갑니다. 한 주기 동안만 사용하며 영속화하지 않습니다.

use std::fmt::Display;

use rulekeeper_core::error::EngineError;

/// 연속 실패 추적기
#[derive(Debug, Clone)]
pub struct ErrorTracker {
    max_consecutive: usize,
    consecutive: usize,
}

impl ErrorTracker {
    /// `max_consecutive`번 연속 실패하면 중단 신호를 냅니다.
    ///
    /// 0은 1로 취급합니다.
    pub fn new(max_consecutive: usize) -> Self {
        Self {
            max_consecutive: max_consecutive.max(1),
            consecutive: 0,
        }
    }

    /// 작업 결과를 기록합니다.
    ///
    /// 임계치에 닿으면 `TooManyErrors`를 반환하고, 호출자는 남은 항목을 건너뛰어야 합니다.
    pub fn record<T, E: Display>(&mut self, result: &Result<T, E>) -> Result<(), EngineError> {
        match result {
            Ok(_) => {
                self.consecutive = 0;
                Ok(())
            }
            Err(e) => self.add_error(e),
        }
    }

    /// 실패 하나를 기록합니다.
    pub fn add_error(&mut self, err: impl Display) -> Result<(), EngineError> {
        self.consecutive += 1;
        if self.consecutive >= self.max_consecutive {
            return Err(EngineError::TooManyErrors {
                count: self.consecutive,
                last: err.to_string(),
            });
        }
        Ok(())
    }

    /// 현재 연속 실패 횟수
    pub fn consecutive(&self) -> usize {
        self.consecutive
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fail() -> Result<(), String> {
        Err("store unavailable".to_owned())
    }

    #[test]
    fn aborts_when_threshold_reached() {
        let mut tracker = ErrorTracker::new(3);
        let mut attempted = 0;

        for _ in 0..4 {
            attempted += 1;
            if tracker.record(&fail()).is_err() {
                break;
            }
        }

        // 세 번째 실패에서 중단되므로 네 번째 작업은 시도되지 않음
        assert_eq!(attempted, 3);
    }

    #[test]
    fn abort_carries_count_and_last_error() {
        let mut tracker = ErrorTracker::new(2);
        assert!(tracker.record(&fail()).is_ok());
        let err = tracker.record(&fail()).unwrap_err();
        match err {
            EngineError::TooManyErrors { count, last } => {
                assert_eq!(count, 2);
                assert_eq!(last, "store unavailable");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn success_resets_counter() {
        let mut tracker = ErrorTracker::new(3);
        tracker.record(&fail()).unwrap();
        tracker.record(&fail()).unwrap();
        assert_eq!(tracker.consecutive(), 2);

        tracker.record(&Ok::<(), String>(())).unwrap();
        assert_eq!(tracker.consecutive(), 0);

        tracker.record(&fail()).unwrap();
        tracker.record(&fail()).unwrap();
        assert!(tracker.record(&fail()).is_err());
    }

    #[test]
    fn zero_threshold_aborts_on_first_error() {
        let mut tracker = ErrorTracker::new(0);
        assert!(tracker.add_error("boom").is_err());
    }
}
