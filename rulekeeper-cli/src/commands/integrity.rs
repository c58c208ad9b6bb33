//! `rulekeeper integrity` command handler
//!
//! Runs the same check the daemon's integrity loop runs, once, against the
//! compilation reports on disk and the JSON detection store.

use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use rulekeeper_core::config::RulekeeperConfig;
use rulekeeper_core::error::EngineError;
use rulekeeper_core::store::{DetectionStore, MemoryDetectionStore};
use rulekeeper_core::types::EngineKind;
use rulekeeper_engines::TaskHandle;
use rulekeeper_engines::integrity::{self, IntegritySource};

use crate::cli::{IntegrityAction, IntegrityArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Execute the `integrity` command.
pub async fn execute(
    args: IntegrityArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = RulekeeperConfig::load(config_path).await?;
    let store = MemoryDetectionStore::open(&config.store.path).await?;

    match args.action {
        IntegrityAction::Check { engine } => {
            let kinds: Vec<EngineKind> = match engine {
                Some(kind) => vec![kind],
                None => EngineKind::ALL
                    .into_iter()
                    .filter(|k| is_enabled(&config, *k))
                    .collect(),
            };

            let report = check_engines(&config, &store, &kinds).await;
            writer.render(&report)?;

            let failed = report.engines.iter().filter(|e| !e.passed).count();
            if failed > 0 {
                return Err(CliError::Integrity(format!("{failed} engines out of sync")));
            }
            Ok(())
        }
    }
}

fn is_enabled(config: &RulekeeperConfig, kind: EngineKind) -> bool {
    match kind {
        EngineKind::Strelka => config.strelka.enabled,
        EngineKind::Suricata => config.suricata.enabled,
        EngineKind::ElastAlert => config.elastalert.enabled,
    }
}

/// Compiled-artifact hashes are verified only for engines that produce one.
pub fn source_for(config: &RulekeeperConfig, kind: EngineKind) -> IntegritySource {
    let (report, compiled) = match kind {
        EngineKind::Strelka => (
            &config.strelka.compilation_report_path,
            config.strelka.compiled_rules_path.as_str(),
        ),
        EngineKind::Suricata => (
            &config.suricata.compilation_report_path,
            config.suricata.compiled_rules_path.as_str(),
        ),
        EngineKind::ElastAlert => (&config.elastalert.compilation_report_path, ""),
    };

    IntegritySource {
        engine: kind,
        report_path: PathBuf::from(report),
        compiled_path: (!compiled.is_empty()).then(|| PathBuf::from(compiled)),
    }
}

pub async fn check_engines(
    config: &RulekeeperConfig,
    store: &dyn DetectionStore,
    kinds: &[EngineKind],
) -> IntegrityReport {
    let handle = TaskHandle::new();
    let mut engines = Vec::new();

    for kind in kinds {
        let source = source_for(config, *kind);
        let result = integrity::check(&source, store, &handle, false).await;
        engines.push(EngineIntegrity::from_result(*kind, result));
    }

    IntegrityReport { engines }
}

#[derive(Debug, Serialize)]
pub struct IntegrityReport {
    pub engines: Vec<EngineIntegrity>,
}

#[derive(Debug, Serialize)]
pub struct EngineIntegrity {
    pub engine: String,
    pub passed: bool,
    pub deployed_not_enabled: Vec<String>,
    pub enabled_not_deployed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineIntegrity {
    fn from_result(kind: EngineKind, result: Result<(), EngineError>) -> Self {
        let mut entry = Self {
            engine: kind.as_str().to_owned(),
            passed: result.is_ok(),
            deployed_not_enabled: Vec::new(),
            enabled_not_deployed: Vec::new(),
            error: None,
        };
        match result {
            Ok(()) => {}
            Err(EngineError::IntegrityDrift {
                deployed_not_enabled,
                enabled_not_deployed,
            }) => {
                entry.deployed_not_enabled = deployed_not_enabled;
                entry.enabled_not_deployed = enabled_not_deployed;
            }
            Err(e) => entry.error = Some(e.to_string()),
        }
        entry
    }
}

impl Render for IntegrityReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if self.engines.is_empty() {
            writeln!(w, "No engines to check")?;
        }

        for e in &self.engines {
            if e.passed {
                writeln!(w, "{:<12} {}", e.engine, "pass".green().bold())?;
                continue;
            }
            writeln!(w, "{:<12} {}", e.engine, "fail".red().bold())?;
            if let Some(error) = &e.error {
                writeln!(w, "  {error}")?;
            }
            if !e.deployed_not_enabled.is_empty() {
                writeln!(
                    w,
                    "  deployed but not enabled: {}",
                    e.deployed_not_enabled.join(", ")
                )?;
            }
            if !e.enabled_not_deployed.is_empty() {
                writeln!(
                    w,
                    "  enabled but not deployed: {}",
                    e.enabled_not_deployed.join(", ")
                )?;
            }
        }
        Ok(())
    }
}
