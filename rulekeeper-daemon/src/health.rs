//! Aggregated health check reporting.
//!
//! Polls each registered engine's `health_check()` and produces a unified
//! [`DaemonHealth`] report. The overall daemon status is the worst status
//! among all enabled engines.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use serde::Serialize;

use rulekeeper_core::pipeline::HealthStatus;
use rulekeeper_core::types::EngineStateSnapshot;

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall daemon health status (worst of all engines).
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Per-engine health reports.
    pub engines: Vec<EngineHealth>,
}

/// Health status for a single detection engine.
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    /// Engine name ("strelka", "suricata", "elastalert").
    pub name: String,
    /// Whether the engine is enabled in configuration.
    pub enabled: bool,
    /// Current health status of the engine.
    pub status: HealthStatus,
    /// Sync/integrity flags at the time of the check.
    pub state: EngineStateSnapshot,
}

/// Aggregate engine health statuses into a single status.
///
/// Returns the worst status found: Unhealthy > Degraded > Healthy.
/// Disabled engines are ignored.
pub fn aggregate_status(engines: &[EngineHealth]) -> HealthStatus {
    let mut worst = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    for engine in engines.iter().filter(|e| e.enabled) {
        match &engine.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                if !worst.is_unhealthy() {
                    worst = HealthStatus::Degraded(String::new());
                }
                reasons.push(format!("{}: {}", engine.name, reason));
            }
            HealthStatus::Unhealthy(reason) => {
                reasons.push(format!("{}: {}", engine.name, reason));
                worst = HealthStatus::Unhealthy(String::new());
            }
        }
    }

    match worst {
        HealthStatus::Healthy => HealthStatus::Healthy,
        HealthStatus::Degraded(_) => HealthStatus::Degraded(reasons.join("; ")),
        HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(reasons.join("; ")),
    }
}
