//! CLI argument parsing using clap derive API
//!
//! This module is purely declarative with no side effects or I/O.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use rulekeeper_core::types::EngineKind;

/// Rulekeeper -- detection rule lifecycle management.
///
/// Every command works on the configuration, rule files, the JSON
/// detection store and engine state files directly.
#[derive(Parser, Debug)]
#[command(name = "rulekeeper", version, about, long_about = None)]
pub struct Cli {
    /// Path to the rulekeeper.toml configuration file.
    #[arg(short, long, default_value = "rulekeeper.toml")]
    pub config: PathBuf,

    /// Log level for diagnostics written to stderr.
    #[arg(long, global = true, default_value = "warn")]
    pub log_level: String,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

/// Supported output formats.
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table / text output.
    Text,
    /// Machine-readable JSON.
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Show daemon and per-engine sync state.
    Status(StatusArgs),

    /// Validate or parse rule files.
    Rules(RulesArgs),

    /// Manage configuration.
    Config(ConfigArgs),

    /// Inspect detections in the store.
    Detections(DetectionsArgs),

    /// Compare deployed rules against enabled detections.
    Integrity(IntegrityArgs),
}

// ---- status ----

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Show per-engine file locations.
    #[arg(short, long)]
    pub verbose: bool,
}

// ---- rules ----

#[derive(Args, Debug)]
pub struct RulesArgs {
    #[command(subcommand)]
    pub action: RulesAction,
}

#[derive(Subcommand, Debug)]
pub enum RulesAction {
    /// Validate every rule file under a path.
    ///
    /// The language is taken from the extension: `.yar`/`.yara` (YARA),
    /// `.rules` (Suricata), `.yml`/`.yaml` (Sigma).
    Validate {
        /// Rule file or directory.
        path: PathBuf,

        /// Treat every file as this engine's language.
        #[arg(long)]
        engine: Option<EngineKind>,
    },
    /// Parse one rule file and show the detections it yields.
    Parse {
        /// Rule file.
        path: PathBuf,

        /// Treat the file as this engine's language.
        #[arg(long)]
        engine: Option<EngineKind>,

        /// Include the normalized rule text.
        #[arg(long)]
        content: bool,
    },
}

// ---- config ----

#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Validate the configuration file and report errors.
    Validate,
    /// Show the effective configuration (file + env overrides + defaults).
    Show {
        /// Show only one section (general, metrics, store, strelka, suricata, elastalert).
        #[arg(long)]
        section: Option<String>,
    },
}

// ---- detections ----

#[derive(Args, Debug)]
pub struct DetectionsArgs {
    #[command(subcommand)]
    pub action: DetectionsAction,
}

#[derive(Subcommand, Debug)]
pub enum DetectionsAction {
    /// List detections in the store.
    List {
        /// Only this engine.
        #[arg(long)]
        engine: Option<EngineKind>,

        /// Only enabled (true) or disabled (false) detections.
        #[arg(long)]
        enabled: Option<bool>,

        /// Only community (true) or custom (false) detections.
        #[arg(long)]
        community: Option<bool>,
    },
}

// ---- integrity ----

#[derive(Args, Debug)]
pub struct IntegrityArgs {
    #[command(subcommand)]
    pub action: IntegrityAction,
}

#[derive(Subcommand, Debug)]
pub enum IntegrityAction {
    /// Run one integrity check per enabled engine.
    Check {
        /// Only this engine.
        #[arg(long)]
        engine: Option<EngineKind>,
    },
}
