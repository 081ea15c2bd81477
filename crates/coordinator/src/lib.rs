//! Resumable repository clone coordination.
//!
//! This crate owns the lifecycle of clone operations: it validates
//! requests, wraps a [`TransferExecutor`](repoferry_transfer::TransferExecutor)
//! in a retry loop with exponential backoff, persists checkpoints on pause,
//! and fans progress out to callers.
//!
//! # Lifecycle
//!
//! 1. **Register**: `clone_repository` validates, assigns an id, seeds from
//!    a checkpoint when one exists, and returns an [`OperationHandle`]
//! 2. **Run**: the executor runs on its own task, retried on transient errors
//! 3. **Pause/Resume**: pause writes a checkpoint; resume relaunches from it
//! 4. **Finish**: exactly one `completed` or `error` event, then the
//!    operation is deregistered and its checkpoint removed

pub mod checkpoint;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod handle;
pub mod retry;
mod topic;
pub mod types;

pub use checkpoint::{CheckpointError, CheckpointStore};
pub use config::{CoordinatorConfig, DEFAULT_RESUME_DIR};
pub use coordinator::Coordinator;
pub use error::CloneError;
pub use handle::OperationHandle;
pub use retry::RetryPolicy;
pub use topic::{CompletedCallback, ErrorCallback, ProgressCallback};
pub use types::{OperationSnapshot, Outcome};
