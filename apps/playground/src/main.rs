use clap::Parser;
use playground_core::config::AppConfig;
use playground_core::telemetry::logging;
use playground_core::terminal::{app, cli::Cli, error::CliError};
use std::path::PathBuf;
use tracing::debug;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("❌ {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let config = AppConfig::from_env();
    let cli = Cli::parse();
    let log_config = cli
        .logging
        .to_config(config.log_path.as_ref().map(PathBuf::from));
    logging::init(&log_config)?;
    debug!(log_level = ?log_config.level, log_file = ?log_config.file, "logging configured");

    app::run(cli, config).await
}
