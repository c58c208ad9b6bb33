//! `rulekeeper status` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::{debug, warn};

use rulekeeper_core::config::RulekeeperConfig;
use rulekeeper_core::store::{DetectionFilter, DetectionStore, MemoryDetectionStore};
use rulekeeper_core::types::EngineKind;
use rulekeeper_engines::integrity::read_compilation_report;
use rulekeeper_engines::state::read_state_file;

use crate::cli::StatusArgs;
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `status` command.
pub async fn execute(
    args: StatusArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = RulekeeperConfig::load(config_path).await?;
    let store = MemoryDetectionStore::open(&config.store.path).await?;

    let report = build_status_report(&config, &store, args.verbose).await?;
    writer.render(&report)?;
    Ok(())
}

/// Per-engine files the status report reads.
struct EnginePaths<'a> {
    enabled: bool,
    state_file: &'a str,
    report_path: &'a str,
    rules_location: &'a str,
}

fn engine_paths(config: &RulekeeperConfig, kind: EngineKind) -> EnginePaths<'_> {
    match kind {
        EngineKind::Strelka => EnginePaths {
            enabled: config.strelka.enabled,
            state_file: &config.strelka.state_file,
            report_path: &config.strelka.compilation_report_path,
            rules_location: &config.strelka.rules_folder,
        },
        EngineKind::Suricata => EnginePaths {
            enabled: config.suricata.enabled,
            state_file: &config.suricata.state_file,
            report_path: &config.suricata.compilation_report_path,
            rules_location: &config.suricata.community_rules_file,
        },
        EngineKind::ElastAlert => EnginePaths {
            enabled: config.elastalert.enabled,
            state_file: &config.elastalert.state_file,
            report_path: &config.elastalert.compilation_report_path,
            rules_location: &config.elastalert.rules_folder,
        },
    }
}

pub async fn build_status_report(
    config: &RulekeeperConfig,
    store: &dyn DetectionStore,
    verbose: bool,
) -> Result<StatusReport, CliError> {
    let daemon_running = check_daemon_status(&config.general.pid_file);

    let mut engines = Vec::new();
    for kind in EngineKind::ALL {
        let paths = engine_paths(config, kind);

        let last_import = match read_state_file(Path::new(paths.state_file)).await {
            Ok(secs) => secs.and_then(format_timestamp),
            Err(e) => {
                warn!(engine = %kind, error = %e, "failed to read state file");
                None
            }
        };

        let deployment = match read_compilation_report(Path::new(paths.report_path)).await {
            Ok(report) => Some(DeploymentSummary {
                timestamp: report.timestamp,
                succeeded: report.success.len(),
                failed: report.failure.len(),
            }),
            Err(e) => {
                debug!(engine = %kind, error = %e, "no compilation report");
                None
            }
        };

        let all = store
            .get_all_detections(DetectionFilter::engine(kind))
            .await?;
        let enabled_detections = all.values().filter(|d| d.is_enabled).count();

        engines.push(EngineStatus {
            name: kind.as_str().to_owned(),
            enabled: paths.enabled,
            last_import,
            detections: all.len(),
            enabled_detections,
            deployment,
            details: verbose.then(|| {
                format!(
                    "state_file={}, report={}, rules={}",
                    paths.state_file, paths.report_path, paths.rules_location
                )
            }),
        });
    }

    Ok(StatusReport {
        daemon_running,
        store_path: config.store.path.clone(),
        engines,
    })
}

fn format_timestamp(secs: u64) -> Option<String> {
    let secs = i64::try_from(secs).ok()?;
    chrono::DateTime::from_timestamp(secs, 0).map(|t| t.to_rfc3339())
}

/// Check whether the daemon is running by reading its PID file.
fn check_daemon_status(pid_file: &str) -> bool {
    if pid_file.is_empty() {
        return false;
    }

    let pid_content = match std::fs::read_to_string(pid_file) {
        Ok(content) => content,
        Err(e) => {
            debug!(pid_file, error = %e, "pid file not readable");
            return false;
        }
    };

    match pid_content.trim().parse::<u32>() {
        Ok(pid) => is_process_alive(pid),
        Err(e) => {
            warn!(pid_file, error = %e, "failed to parse pid");
            false
        }
    }
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };

    // SAFETY: kill(2) with signal 0 only checks for existence and permission.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    // EPERM: process exists but belongs to another user
    std::io::Error::last_os_error().kind() == std::io::ErrorKind::PermissionDenied
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    warn!("process liveness check not supported on this platform");
    false
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub daemon_running: bool,
    pub store_path: String,
    pub engines: Vec<EngineStatus>,
}

#[derive(Debug, Serialize)]
pub struct EngineStatus {
    pub name: String,
    pub enabled: bool,
    /// RFC 3339 time of the last successful community import.
    pub last_import: Option<String>,
    pub detections: usize,
    pub enabled_detections: usize,
    pub deployment: Option<DeploymentSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeploymentSummary {
    pub timestamp: String,
    pub succeeded: usize,
    pub failed: usize,
}

impl Render for StatusReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if self.daemon_running {
            writeln!(w, "Daemon: {}", "running".green().bold())?;
        } else {
            writeln!(w, "Daemon: {}", "not running".red().bold())?;
        }
        writeln!(w, "Store:  {}", self.store_path)?;
        writeln!(w)?;
        writeln!(
            w,
            "{:<12} {:<8} {:<27} {:<18} Deployed",
            "Engine", "Enabled", "Last import", "Detections"
        )?;
        writeln!(w, "{}", "-".repeat(90))?;

        for e in &self.engines {
            let enabled = if e.enabled { "yes" } else { "no" };
            let deployed = match &e.deployment {
                Some(d) if d.failed > 0 => {
                    format!("{} ok, {} failed", d.succeeded, d.failed).red().to_string()
                }
                Some(d) => format!("{} ok", d.succeeded).green().to_string(),
                None => "-".to_owned(),
            };
            writeln!(
                w,
                "{:<12} {:<8} {:<27} {:<18} {}",
                e.name,
                enabled,
                e.last_import.as_deref().unwrap_or("never"),
                format!("{}/{}", e.enabled_detections, e.detections),
                deployed
            )?;
            if let Some(details) = &e.details {
                writeln!(w, "  {}", details.dimmed())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rulekeeper_core::types::{CompilationReport, Detection};

    fn config_in(dir: &Path) -> RulekeeperConfig {
        let mut config = RulekeeperConfig::default();
        config.general.pid_file = dir.join("rulekeeper.pid").display().to_string();
        config.store.path = dir.join("detections.json").display().to_string();
        config.strelka.state_file = dir.join("strelka.state").display().to_string();
        config.strelka.compilation_report_path = dir.join("strelka.json").display().to_string();
        config.suricata.state_file = dir.join("suricata.state").display().to_string();
        config.suricata.compilation_report_path = dir.join("suricata.json").display().to_string();
        config.elastalert.state_file = dir.join("elastalert.state").display().to_string();
        config.elastalert.compilation_report_path =
            dir.join("elastalert.json").display().to_string();
        config
    }

    #[tokio::test]
    async fn reports_state_files_and_deployments() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        std::fs::write(&config.strelka.state_file, "1700000000").unwrap();
        let report = CompilationReport {
            timestamp: "2024-01-01T00:00:00Z".to_owned(),
            success: vec!["A".to_owned(), "B".to_owned()],
            failure: vec!["C".to_owned()],
            compiled_rules_hash: String::new(),
        };
        std::fs::write(
            &config.strelka.compilation_report_path,
            serde_json::to_string(&report).unwrap(),
        )
        .unwrap();

        let store = MemoryDetectionStore::new();
        let mut det = Detection::new(EngineKind::Strelka);
        det.public_id = "A".to_owned();
        det.is_enabled = true;
        store.create_detection(det).await.unwrap();

        let status = build_status_report(&config, &store, true).await.unwrap();
        assert!(!status.daemon_running);

        let strelka = &status.engines[0];
        assert_eq!(strelka.name, "strelka");
        assert_eq!(strelka.last_import.as_deref(), Some("2023-11-14T22:13:20+00:00"));
        assert_eq!(strelka.detections, 1);
        assert_eq!(strelka.enabled_detections, 1);
        let deployment = strelka.deployment.as_ref().unwrap();
        assert_eq!((deployment.succeeded, deployment.failed), (2, 1));
        assert!(strelka.details.is_some());

        let suricata = &status.engines[1];
        assert!(suricata.last_import.is_none());
        assert!(suricata.deployment.is_none());
    }

    #[test]
    fn pid_file_with_current_process_is_running() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rulekeeper.pid");
        std::fs::write(&path, std::process::id().to_string()).unwrap();
        assert!(check_daemon_status(path.to_str().unwrap()));
        assert!(!check_daemon_status(""));
    }
}
