//! CLI configuration.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/repoferry/config.toml`
//! - Windows: `%APPDATA%/repoferry/config.toml`
//!
//! Every key is optional; a missing file means all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use repoferry_coordinator::CoordinatorConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Resume directory, retry policy and option defaults.
    #[serde(flatten)]
    pub coordinator: CoordinatorConfig,

    pub git: GitConfig,

    /// Parameters of `clone --simulate`.
    pub simulation: SimulationConfig,
}

/// How the `git` binary is invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GitConfig {
    pub program: PathBuf,
    /// How often a running clone checks for pause, cancel and timeout.
    pub poll_interval_ms: u64,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
            poll_interval_ms: 250,
        }
    }
}

impl GitConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub total_bytes: u64,
    pub total_objects: u64,
    pub steps: u32,
    pub step_delay_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            total_bytes: 8 * 1024 * 1024,
            total_objects: 4_000,
            steps: 50,
            step_delay_ms: 100,
        }
    }
}

impl Config {
    /// Loads configuration from `path`, or from the default location.
    ///
    /// An explicit path must exist. The default location is optional.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let path = config_path()?;
                if path.exists() {
                    Self::load_from(&path)
                } else {
                    tracing::debug!(path = %path.display(), "no configuration file, using defaults");
                    Ok(Self::default())
                }
            }
        }
    }

    fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA").context("APPDATA not set")?;
        Ok(PathBuf::from(appdata).join("repoferry").join("config.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("repoferry")
            .join("config.toml"))
    }
}
