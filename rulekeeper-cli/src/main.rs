use clap::Parser;
use tracing_subscriber::EnvFilter;

use rulekeeper_cli::cli::{Cli, Commands};
use rulekeeper_cli::commands;
use rulekeeper_cli::error::CliError;
use rulekeeper_cli::output::OutputWriter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // 진단 로그는 stderr로, 명령 결과는 stdout으로
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let writer = OutputWriter::new(cli.output);
    let config = cli.config.as_path();

    match cli.command {
        Commands::Status(args) => commands::status::execute(args, config, &writer).await,
        Commands::Rules(args) => commands::rules::execute(args, &writer).await,
        Commands::Config(args) => commands::config::execute(args, config, &writer).await,
        Commands::Detections(args) => commands::detections::execute(args, config, &writer).await,
        Commands::Integrity(args) => commands::integrity::execute(args, config, &writer).await,
    }
}
