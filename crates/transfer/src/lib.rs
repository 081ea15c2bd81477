//! Per-operation transfer state and the executors that perform one clone attempt.
//!
//! The coordinator owns an [`OperationState`] per clone and hands it to a
//! [`TransferExecutor`] for every attempt. Executors report progress through
//! a callback and poll the state's pause/cancel flags between steps.

mod executor;
mod git_cli;
mod progress;
mod simulated;
mod state;

pub use executor::{BoxFuture, ExecutionOutcome, ProgressFn, TransferExecutor};
pub use git_cli::{GitCliExecutor, GitPhase, GitProgressLine, parse_progress_line};
pub use progress::SpeedCalculator;
pub use simulated::SimulatedExecutor;
pub use state::{Interruption, OperationState};

/// Errors produced by a transfer attempt.
///
/// Cloneable so a single terminal error can be cached and handed to every
/// awaiter of the operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("{0}")]
    Failed(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl TransferError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<std::io::Error> for TransferError {
    fn from(e: std::io::Error) -> Self {
        Self::Failed(format!("I/O error: {e}"))
    }
}
