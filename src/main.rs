//! trialctl CLI entry point.

use clap::Parser;

use trialctl::cli::commands::{load_config, render, suggest, validate};
use trialctl::cli::{Cli, Commands};
use trialctl::infrastructure::logging::LoggerImpl;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    let _logger = match load_config(config_path).and_then(|config| LoggerImpl::init(&config.logging)) {
        Ok(logger) => logger,
        Err(err) => trialctl::cli::handle_error(err, cli.json),
    };

    let result = match &cli.command {
        Commands::Validate { experiment } => validate::execute(experiment, cli.json),
        Commands::Render {
            experiment,
            assignments,
            objects,
        } => render::execute(experiment, assignments, objects.as_deref(), config_path, cli.json).await,
        Commands::Suggest { experiment } => suggest::execute(experiment, config_path, cli.json).await,
    };

    if let Err(err) = result {
        trialctl::cli::handle_error(err, cli.json);
    }
}
