//! 생명주기 공통 타입 -- 건강 상태와 dyn 호환 Future

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::{Deserialize, Serialize};

/// dyn-compatible trait에서 사용하는 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 컴포넌트 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작은 하지만 문제가 있음
    Degraded(String),
    /// 동작 불가
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 여부
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 동작 불가 여부
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_status_predicates() {
        assert!(HealthStatus::Healthy.is_healthy());
        assert!(!HealthStatus::Degraded("x".to_owned()).is_healthy());
        assert!(HealthStatus::Unhealthy("x".to_owned()).is_unhealthy());
        assert!(!HealthStatus::Degraded("x".to_owned()).is_unhealthy());
    }

    #[test]
    fn health_status_display() {
        assert_eq!(
            HealthStatus::Degraded("integrity drift".to_owned()).to_string(),
            "degraded: integrity drift"
        );
    }
}
