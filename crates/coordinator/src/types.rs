//! Public data types for the coordinator.

use std::sync::Arc;

use repoferry_protocol::CloneResult;
use repoferry_transfer::TransferError;

/// Terminal state of an operation as seen by awaiters.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// Not finished yet.
    Pending,
    Completed(Arc<CloneResult>),
    Failed(TransferError),
}

impl Outcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

/// Diagnostic view of one active operation.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationSnapshot {
    pub id: String,
    pub url: String,
    pub destination: String,
    pub downloaded_bytes: u64,
    pub total_bytes: u64,
    pub percentage: f64,
    pub retry_count: u32,
    pub paused: bool,
    pub resumed: bool,
}
