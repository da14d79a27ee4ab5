// Dossier conversation-tree evaluator
// Main entry point for the dossier binary

use clap::Parser;
use dossier_engine::cli::{Cli, Command};
use dossier_engine::config::Config;
use dossier_engine::handlers::{
    handle_extract, handle_rejudge, handle_run, handle_traverse, handle_validate, print_error,
    OutputFormat,
};
use dossier_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Determine output format
    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    if let Err(e) = run(cli, format).await {
        print_error(&e, format);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, format: OutputFormat) -> anyhow::Result<()> {
    // Load configuration (or use custom path if provided)
    let mut config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };
    config.apply_env_overrides(|key| std::env::var(key).ok())?;

    // --log wins over the config file; RUST_LOG wins over both
    let log_level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(log_level);

    let version = env!("CARGO_PKG_VERSION");
    let commit = env!("GIT_COMMIT_HASH");
    let timestamp = env!("BUILD_TIMESTAMP");

    tracing::info!("Dossier v{} ({} - {})", version, commit, timestamp);

    // Handle commands
    match cli.command {
        Command::Validate { scenario } => {
            tracing::debug!("Validating scenario");
            handle_validate(scenario, &config, format).await
        }

        Command::Traverse { target } => {
            tracing::debug!("Traversing: {:?}", target);
            handle_traverse(target, &config, format).await
        }

        Command::Extract { target } => {
            tracing::debug!("Extracting features: {:?}", target);
            handle_extract(target, &config, format).await
        }

        Command::Run { target, output_dir } => {
            tracing::info!("Running pipeline");
            handle_run(target, output_dir, &config, format).await
        }

        Command::Rejudge { run_dir } => {
            tracing::info!("Rejudging {}", run_dir.display());
            handle_rejudge(run_dir, &config, format).await
        }
    }
}
