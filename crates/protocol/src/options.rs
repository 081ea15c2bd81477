use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Credential used for authenticated clones.
///
/// Never serialized and never printed: `Debug` renders `AuthToken(***)`.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the raw token. Callers must not log the value.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AuthToken(***)")
    }
}

/// Caller-supplied clone request.
///
/// Unset optional fields fall back to the coordinator's [`OptionDefaults`]
/// when the request is accepted.
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    /// Remote repository URL. Must parse as a well-formed URL.
    pub url: String,
    /// Local target path.
    pub destination: String,
    /// Branch to check out (repository default when `None`).
    pub branch: Option<String>,
    /// Stable operation id; reusing the id of a paused clone resumes it.
    pub operation_id: Option<String>,
    pub resumable: Option<bool>,
    pub progress_tracking: Option<bool>,
    pub error_recovery: Option<bool>,
    pub background_processing: Option<bool>,
    /// Total number of attempts.
    pub max_retries: Option<u32>,
    /// Advisory cap on the wall time of one attempt, enforced by the executor.
    pub operation_timeout: Option<Duration>,
    /// Shallow-clone depth (0 = full history).
    pub depth: Option<u32>,
    pub include_submodules: Option<bool>,
    pub auth_token: Option<AuthToken>,
}

impl CloneOptions {
    /// Creates a request with only the required fields set.
    pub fn new(url: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            ..Self::default()
        }
    }

    pub fn branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    pub fn operation_id(mut self, id: impl Into<String>) -> Self {
        self.operation_id = Some(id.into());
        self
    }

    pub fn resumable(mut self, enabled: bool) -> Self {
        self.resumable = Some(enabled);
        self
    }

    pub fn progress_tracking(mut self, enabled: bool) -> Self {
        self.progress_tracking = Some(enabled);
        self
    }

    pub fn error_recovery(mut self, enabled: bool) -> Self {
        self.error_recovery = Some(enabled);
        self
    }

    pub fn background_processing(mut self, enabled: bool) -> Self {
        self.background_processing = Some(enabled);
        self
    }

    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = Some(attempts);
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }

    pub fn depth(mut self, depth: u32) -> Self {
        self.depth = Some(depth);
        self
    }

    pub fn include_submodules(mut self, enabled: bool) -> Self {
        self.include_submodules = Some(enabled);
        self
    }

    pub fn auth_token(mut self, token: AuthToken) -> Self {
        self.auth_token = Some(token);
        self
    }

    /// Fills every unset field from `defaults`.
    pub fn resolve(self, defaults: &OptionDefaults) -> CloneSettings {
        CloneSettings {
            url: self.url,
            destination: self.destination,
            branch: self.branch,
            resumable: self.resumable.unwrap_or(defaults.resumable),
            progress_tracking: self.progress_tracking.unwrap_or(defaults.progress_tracking),
            error_recovery: self.error_recovery.unwrap_or(defaults.error_recovery),
            background_processing: self
                .background_processing
                .unwrap_or(defaults.background_processing),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            operation_timeout: self
                .operation_timeout
                .unwrap_or(Duration::from_secs(defaults.operation_timeout_secs)),
            depth: self.depth.unwrap_or(defaults.depth),
            include_submodules: self
                .include_submodules
                .unwrap_or(defaults.include_submodules),
            auth_token: self.auth_token,
        }
    }
}

/// Fully resolved configuration of one clone operation.
#[derive(Debug, Clone)]
pub struct CloneSettings {
    pub url: String,
    pub destination: String,
    pub branch: Option<String>,
    pub resumable: bool,
    pub progress_tracking: bool,
    pub error_recovery: bool,
    pub background_processing: bool,
    pub max_retries: u32,
    pub operation_timeout: Duration,
    pub depth: u32,
    pub include_submodules: bool,
    pub auth_token: Option<AuthToken>,
}

/// Defaults applied to unset [`CloneOptions`] fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptionDefaults {
    pub resumable: bool,
    pub progress_tracking: bool,
    pub error_recovery: bool,
    pub background_processing: bool,
    pub max_retries: u32,
    pub operation_timeout_secs: u64,
    pub depth: u32,
    pub include_submodules: bool,
}

impl Default for OptionDefaults {
    fn default() -> Self {
        Self {
            resumable: true,
            progress_tracking: true,
            error_recovery: true,
            background_processing: true,
            max_retries: 3,
            operation_timeout_secs: 300,
            depth: 0,
            include_submodules: false,
        }
    }
}
