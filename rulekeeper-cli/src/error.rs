//! CLI-specific error types and exit code mapping

use rulekeeper_core::error::{EngineError, RulekeeperError, StoreError};
use rulekeeper_rules::RuleParseError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// A subcommand-specific operation failed.
    #[error("{0}")]
    Command(String),

    /// One or more rule files failed to parse.
    #[error("rule error: {0}")]
    Rule(String),

    /// Detection store could not be read.
    #[error("store error: {0}")]
    Store(String),

    /// Deployed rules do not match enabled detections.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Wrapped domain error from rulekeeper-core.
    #[error("{0}")]
    Core(#[from] RulekeeperError),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                          |
    /// |------|----------------------------------|
    /// | 0    | Success                          |
    /// | 1    | General / command error          |
    /// | 2    | Configuration error              |
    /// | 3    | Rule files failed to parse       |
    /// | 4    | Integrity drift or check failure |
    /// | 10   | IO error                         |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) | Self::Core(RulekeeperError::Config(_)) => 2,
            Self::Rule(_) => 3,
            Self::Integrity(_) => 4,
            Self::Io(_) => 10,
            Self::Command(_) | Self::Store(_) | Self::JsonSerialize(_) | Self::Core(_) => 1,
        }
    }
}

impl From<RuleParseError> for CliError {
    fn from(e: RuleParseError) -> Self {
        Self::Rule(e.to_string())
    }
}

impl From<StoreError> for CliError {
    fn from(e: StoreError) -> Self {
        Self::Store(e.to_string())
    }
}

impl From<EngineError> for CliError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::IntegrityDrift { .. } | EngineError::IntegrityCheckFailed(_) => {
                Self::Integrity(e.to_string())
            }
            EngineError::Parse(reason) => Self::Rule(reason),
            EngineError::Store(e) => e.into(),
            other => Self::Command(other.to_string()),
        }
    }
}
