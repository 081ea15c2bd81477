//! Command-line definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "repoferry")]
#[command(about = "Resumable git repository cloner", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Configuration file (defaults to ~/.config/repoferry/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Clone a repository, printing progress. Ctrl-C pauses and saves a checkpoint
    Clone(CloneArgs),

    /// List stored checkpoints
    Checkpoints,

    /// Delete every stored checkpoint
    ClearCheckpoints,
}

#[derive(Debug, Args)]
pub struct CloneArgs {
    /// Repository URL
    pub url: String,

    /// Local target directory
    pub destination: String,

    /// Branch to check out
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Shallow clone depth (0 = full history)
    #[arg(long)]
    pub depth: Option<u32>,

    /// Also clone submodules
    #[arg(long)]
    pub submodules: bool,

    /// Total number of attempts
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Give up after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Stable operation id; reuse it to resume a paused clone
    #[arg(long)]
    pub id: Option<String>,

    /// Run the built-in simulated transfer instead of git
    #[arg(long)]
    pub simulate: bool,
}
