//! `rulekeeper detections` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use rulekeeper_core::config::RulekeeperConfig;
use rulekeeper_core::store::{DetectionFilter, DetectionStore, MemoryDetectionStore};
use rulekeeper_core::types::EngineKind;

use crate::cli::{DetectionsAction, DetectionsArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render, truncate};

/// Execute the `detections` command.
pub async fn execute(
    args: DetectionsArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    let config = RulekeeperConfig::load(config_path).await?;
    let store = MemoryDetectionStore::open(&config.store.path).await?;

    match args.action {
        DetectionsAction::List {
            engine,
            enabled,
            community,
        } => {
            let filter = DetectionFilter {
                engine,
                is_enabled: enabled,
                is_community: community,
            };
            let report = list(&store, filter).await?;
            writer.render(&report)?;
            Ok(())
        }
    }
}

/// List detections matching `filter`, grouped by engine then PublicID.
///
/// The store keys results by PublicID, so engines are queried one at a time.
pub async fn list(
    store: &dyn DetectionStore,
    filter: DetectionFilter,
) -> Result<DetectionListReport, CliError> {
    let engines: Vec<EngineKind> = match filter.engine {
        Some(kind) => vec![kind],
        None => EngineKind::ALL.to_vec(),
    };

    let mut detections = Vec::new();
    for kind in engines {
        let found = store
            .get_all_detections(DetectionFilter {
                engine: Some(kind),
                ..filter
            })
            .await?;
        detections.extend(found.into_values().map(|d| DetectionEntry {
            id: d.id,
            public_id: d.public_id,
            engine: d.engine.as_str().to_owned(),
            title: d.title,
            severity: d.severity.to_string(),
            ruleset: d.ruleset,
            enabled: d.is_enabled,
            community: d.is_community,
            overrides: d.overrides.len(),
        }));
    }

    info!(count = detections.len(), "listed detections");

    Ok(DetectionListReport {
        total: detections.len(),
        enabled: detections.iter().filter(|d| d.enabled).count(),
        detections,
    })
}

#[derive(Debug, Serialize)]
pub struct DetectionListReport {
    pub total: usize,
    pub enabled: usize,
    pub detections: Vec<DetectionEntry>,
}

#[derive(Debug, Serialize)]
pub struct DetectionEntry {
    pub id: String,
    pub public_id: String,
    pub engine: String,
    pub title: String,
    pub severity: String,
    pub ruleset: String,
    pub enabled: bool,
    pub community: bool,
    pub overrides: usize,
}

impl Render for DetectionListReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        writeln!(
            w,
            "Detections ({} total, {} enabled)",
            self.total.to_string().bold(),
            self.enabled
        )?;
        writeln!(w)?;
        writeln!(
            w,
            "{:<12} {:<38} {:<36} {:<14} {:<18} {:<9} Source",
            "Engine", "PublicID", "Title", "Severity", "Ruleset", "Status"
        )?;
        writeln!(w, "{}", "-".repeat(140))?;

        for d in &self.detections {
            let status = if d.enabled {
                "enabled".green()
            } else {
                "disabled".yellow()
            };
            let source = if d.community { "community" } else { "custom" };
            writeln!(
                w,
                "{:<12} {:<38} {:<36} {:<14} {:<18} {:<9} {}",
                d.engine,
                truncate(&d.public_id, 38),
                truncate(&d.title, 36),
                d.severity,
                truncate(&d.ruleset, 18),
                status,
                source
            )?;
        }
        Ok(())
    }
}
