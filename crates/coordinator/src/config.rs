//! Coordinator configuration.

use std::path::PathBuf;

use repoferry_protocol::OptionDefaults;
use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;

/// Name of the resume directory created under the working directory.
pub const DEFAULT_RESUME_DIR: &str = ".clone-resume";

/// Coordinator configuration. Every field falls back to its default when
/// absent from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Directory holding one checkpoint file per operation.
    pub resume_dir: PathBuf,
    /// Buffer size of the progress broadcast channels.
    pub channel_capacity: usize,
    pub retry: RetryPolicy,
    /// Defaults merged into every clone request.
    pub defaults: OptionDefaults,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            resume_dir: default_resume_dir(),
            channel_capacity: 256,
            retry: RetryPolicy::default(),
            defaults: OptionDefaults::default(),
        }
    }
}

impl CoordinatorConfig {
    /// Default configuration with checkpoints stored under `dir`.
    pub fn with_resume_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            resume_dir: dir.into(),
            ..Self::default()
        }
    }
}

fn default_resume_dir() -> PathBuf {
    std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(DEFAULT_RESUME_DIR)
}
