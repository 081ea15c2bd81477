use serde::{Deserialize, Serialize};

/// Durable snapshot of an operation's transfer progress.
///
/// Stored as `<resume_dir>/<operation_id>.json`. Credentials are never part
/// of the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub operation_id: String,
    pub url: String,
    pub destination: String,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    /// Unix milliseconds at which the checkpoint was taken.
    pub timestamp: i64,
}

impl Checkpoint {
    /// Returns the transfer counters carried into a resumed operation.
    pub fn resume_data(&self) -> ResumeData {
        ResumeData {
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
            timestamp: self.timestamp,
        }
    }

    /// Returns the completed fraction as a percentage (0 when the total is unknown).
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.downloaded_bytes as f64 / self.total_bytes as f64 * 100.0).min(100.0)
    }
}

/// Counters seeded into an operation from a loaded checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeData {
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub timestamp: i64,
}
