//! repoferry command-line entry point.

mod app;
mod cli;
mod config;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = config::Config::load(cli.config.as_deref())?;
    tracing::debug!(
        resume_dir = %config.coordinator.resume_dir.display(),
        "configuration loaded"
    );

    match cli.command {
        Command::Clone(args) => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(app::clone(config, args))
        }
        Command::Checkpoints => app::list_checkpoints(&config),
        Command::ClearCheckpoints => app::clear_checkpoints(&config),
    }
}
