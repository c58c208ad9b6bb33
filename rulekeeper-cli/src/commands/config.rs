//! `rulekeeper config` command handler

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use tracing::info;

use rulekeeper_core::config::RulekeeperConfig;

use crate::cli::{ConfigAction, ConfigArgs};
use crate::error::CliError;
use crate::output::{OutputWriter, Render};

/// Section names accepted by `config show --section`.
pub const SECTIONS: [&str; 6] = ["general", "metrics", "store", "strelka", "suricata", "elastalert"];

/// Execute the `config` command.
pub async fn execute(
    args: ConfigArgs,
    config_path: &Path,
    writer: &OutputWriter,
) -> Result<(), CliError> {
    match args.action {
        ConfigAction::Validate => {
            let report = validate(config_path).await;
            writer.render(&report)?;
            if !report.valid {
                return Err(CliError::Config("configuration is invalid".to_owned()));
            }
            Ok(())
        }
        ConfigAction::Show { section } => {
            let config = RulekeeperConfig::load(config_path).await?;
            let report = show(&config, config_path, section.as_deref())?;
            writer.render(&report)?;
            Ok(())
        }
    }
}

/// Load and validate the file (with environment overrides applied).
pub async fn validate(config_path: &Path) -> ConfigValidationReport {
    info!(path = %config_path.display(), "validating configuration");

    let errors = match RulekeeperConfig::load(config_path).await {
        Ok(_) => Vec::new(),
        Err(e) => vec![e.to_string()],
    };

    ConfigValidationReport {
        source: config_path.display().to_string(),
        valid: errors.is_empty(),
        errors,
    }
}

/// Serialize the effective configuration, or one section of it, as TOML.
pub fn show(
    config: &RulekeeperConfig,
    config_path: &Path,
    section: Option<&str>,
) -> Result<ConfigReport, CliError> {
    let rendered = match section {
        None => toml::to_string_pretty(config),
        Some("general") => toml::to_string_pretty(&config.general),
        Some("metrics") => toml::to_string_pretty(&config.metrics),
        Some("store") => toml::to_string_pretty(&config.store),
        Some("strelka") => toml::to_string_pretty(&config.strelka),
        Some("suricata") => toml::to_string_pretty(&config.suricata),
        Some("elastalert") => toml::to_string_pretty(&config.elastalert),
        Some(other) => {
            return Err(CliError::Command(format!(
                "unknown section '{}', expected one of: {}",
                other,
                SECTIONS.join(", ")
            )));
        }
    }
    .map_err(|e| CliError::Command(format!("failed to serialize configuration: {e}")))?;

    Ok(ConfigReport {
        source: config_path.display().to_string(),
        section: section.map(str::to_owned),
        config_toml: rendered,
    })
}

#[derive(Debug, Serialize)]
pub struct ConfigValidationReport {
    pub source: String,
    pub valid: bool,
    pub errors: Vec<String>,
}

impl Render for ConfigValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        use colored::Colorize;

        if self.valid {
            writeln!(w, "{} {} is valid", "ok".green().bold(), self.source)?;
        } else {
            writeln!(w, "{} {} is invalid", "error".red().bold(), self.source)?;
            for e in &self.errors {
                writeln!(w, "  - {e}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigReport {
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
    pub config_toml: String,
}

impl Render for ConfigReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        match &self.section {
            Some(section) => writeln!(w, "# {} [{}]", self.source, section)?,
            None => writeln!(w, "# {}", self.source)?,
        }
        write!(w, "{}", self.config_toml)
    }
}
