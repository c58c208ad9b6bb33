use anyhow::Result;
use clap::Parser;

use rulekeeper_core::config::RulekeeperConfig;
use rulekeeper_daemon::logging::init_tracing;
use rulekeeper_daemon::orchestrator::Orchestrator;

mod cli;

use cli::DaemonCli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = DaemonCli::parse();

    let mut config = RulekeeperConfig::from_file(&args.config)
        .await
        .map_err(|e| anyhow::anyhow!("failed to load config {}: {}", args.config.display(), e))?;
    config.apply_env_overrides();

    // CLI flags take precedence over file and environment
    if let Some(level) = args.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = args.log_format {
        config.general.log_format = format;
    }
    if let Some(pid_file) = args.pid_file {
        config.general.pid_file = pid_file;
    }

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

    if args.validate {
        println!("configuration is valid: {}", args.config.display());
        return Ok(());
    }

    init_tracing(&config.general)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "rulekeeper-daemon starting"
    );

    let orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await?;

    tracing::info!("rulekeeper-daemon shut down");
    Ok(())
}
