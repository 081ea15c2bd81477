use serde::{Deserialize, Serialize};

/// Stage of a clone operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloneStage {
    Initializing,
    Fetching,
    Receiving,
    Resolving,
    CheckingOut,
    Completed,
    Error,
}

impl CloneStage {
    /// Returns `true` for `completed` and `error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Fetching => "fetching",
            Self::Receiving => "receiving",
            Self::Resolving => "resolving",
            Self::CheckingOut => "checking-out",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for CloneStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time progress of one clone operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub stage: CloneStage,
    /// Overall completion, clamped to `[0, 100]`.
    pub percentage: f64,
    /// Throughput in bytes per second.
    pub speed: f64,
    /// Estimated seconds remaining (0 when unknown).
    pub eta: f64,
    pub total_bytes: u64,
    pub downloaded_bytes: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
    #[serde(default)]
    pub objects_received: u64,
    #[serde(default)]
    pub total_objects: u64,
}

impl Progress {
    /// Creates a progress value with zeroed counters.
    pub fn new(stage: CloneStage, percentage: f64, message: impl Into<String>) -> Self {
        Self {
            stage,
            percentage: percentage.clamp(0.0, 100.0),
            speed: 0.0,
            eta: 0.0,
            total_bytes: 0,
            downloaded_bytes: 0,
            message: message.into(),
            objects_received: 0,
            total_objects: 0,
        }
    }

    pub fn with_bytes(mut self, downloaded: u64, total: u64) -> Self {
        self.downloaded_bytes = downloaded;
        self.total_bytes = total;
        self
    }

    pub fn with_objects(mut self, received: u64, total: u64) -> Self {
        self.objects_received = received;
        self.total_objects = total;
        self
    }

    pub fn with_rate(mut self, speed: f64, eta: f64) -> Self {
        self.speed = speed;
        self.eta = eta;
        self
    }
}

/// Progress tagged with its operation, as published on the global stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub operation_id: String,
    pub progress: Progress,
}
