//! CLI argument definitions for rulekeeper-daemon.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.

use std::path::PathBuf;

use clap::Parser;

/// Rulekeeper detection rule daemon.
///
/// Runs the community rule sync loops and integrity checkers of the
/// enabled detection engines (Strelka/YARA, Suricata, ElastAlert/Sigma).
#[derive(Parser, Debug)]
#[command(name = "rulekeeper-daemon")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to rulekeeper.toml configuration file.
    #[arg(short, long, default_value = "/etc/rulekeeper/rulekeeper.toml")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    ///
    /// Takes precedence over the config file and environment variables.
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration file and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path (takes precedence over config file).
    #[arg(long)]
    pub pid_file: Option<String>,
}
