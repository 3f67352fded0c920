//! Tickwork - recurring job scheduler
//!
//! Main entry point for the Tickwork CLI.

mod cli;
mod cmd_config;
mod cmd_job;
mod cmd_run;
mod handlers;
mod setup;

use std::path::Path;

use anyhow::Context;
use clap::Parser;

use tickwork_config::{Config, ConfigError, ConfigLoader};

use crate::cli::{Cli, Commands, ConfigAction};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = ConfigLoader::load_or_default(&cli.config);
    let logging = loaded
        .as_ref()
        .map(|c| c.logging.clone())
        .unwrap_or_default();
    setup::init_tracing(&logging)?;

    match cli.command {
        Some(Commands::Config {
            action: ConfigAction::Check,
        }) => cmd_config::check(&cli.config, loaded),
        Some(Commands::Validate { expression, count }) => {
            cmd_config::validate_expression(&expression, count)
        }
        Some(Commands::Job { action }) => {
            let config = require(&cli.config, loaded)?;
            cmd_job::handle_job_command(action, &config).await
        }
        Some(Commands::Run) | None => cmd_run::run(require(&cli.config, loaded)?).await,
    }
}

fn require(path: &Path, loaded: Result<Config, ConfigError>) -> anyhow::Result<Config> {
    loaded.with_context(|| format!("failed to load configuration from {}", path.display()))
}
