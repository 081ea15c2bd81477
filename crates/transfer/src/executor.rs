//! Contract between the coordinator and the unit performing one attempt.

use std::future::Future;
use std::pin::Pin;

use repoferry_protocol::Progress;

use crate::{OperationState, TransferError};

/// Boxed future returned by executors.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Progress sink handed to an executor for one attempt.
///
/// The lifetime lets the sink borrow from the caller for the attempt.
pub type ProgressFn<'p> = dyn Fn(Progress) + Send + Sync + 'p;

/// How an attempt ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The repository is fully transferred and checked out.
    Finished { total_objects: u64, resumed: bool },
    /// The attempt stopped early because the operation was paused.
    Paused,
}

/// Performs one attempt of a repository transfer.
///
/// Implementations must:
/// - emit non-terminal progress with non-decreasing `percentage` within one
///   attempt (the coordinator emits `completed`/`error` itself);
/// - call [`OperationState::interruption`] at every internal step and stop
///   there: `Cancelled` returns [`TransferError::Cancelled`], `Paused`
///   returns [`ExecutionOutcome::Paused`]. The step length bounds the
///   pause/cancel latency;
/// - keep `downloaded_bytes`/`total_bytes` on the state current so a
///   concurrent pause checkpoints accurate counters.
pub trait TransferExecutor: Send + Sync {
    fn execute<'a>(
        &'a self,
        state: &'a OperationState,
        on_progress: &'a ProgressFn<'a>,
    ) -> BoxFuture<'a, Result<ExecutionOutcome, TransferError>>;
}
