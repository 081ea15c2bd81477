use std::sync::Arc;

use repoferry_protocol::{CloneResult, Progress};
use repoferry_transfer::{OperationState, TransferError};
use tokio::sync::broadcast;

use crate::coordinator::Coordinator;
use crate::topic::{self, OperationTopic};
use crate::types::Outcome;

/// Caller-facing handle to one clone operation.
///
/// Cloning the handle is cheap; every clone observes the same operation.
/// The handle stays valid after the operation finishes, so late awaiters
/// still get the cached result.
#[derive(Clone)]
pub struct OperationHandle {
    id: String,
    coordinator: Coordinator,
    topic: Arc<OperationTopic>,
    state: Arc<OperationState>,
}

impl OperationHandle {
    pub(crate) fn new(
        id: String,
        coordinator: Coordinator,
        topic: Arc<OperationTopic>,
        state: Arc<OperationState>,
    ) -> Self {
        Self {
            id,
            coordinator,
            topic,
            state,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// `true` once a `completed` or `error` event has been emitted.
    pub fn is_completed(&self) -> bool {
        self.topic.is_finished()
    }

    pub fn is_paused(&self) -> bool {
        self.state.is_paused()
    }

    /// Registers a callback for every progress event, terminal ones included.
    ///
    /// Callbacks run on the publishing task with the operation's event lock
    /// held. They must not block or call [`cancel`](Self::cancel); forward
    /// to a channel or use [`subscribe`](Self::subscribe) for that.
    pub fn on_progress(&self, callback: impl Fn(&Progress) + Send + Sync + 'static) {
        self.topic.on_progress(Box::new(callback));
    }

    /// Registers a callback for successful completion. Runs immediately if
    /// the operation already completed.
    pub fn on_completed(&self, callback: impl Fn(&CloneResult) + Send + Sync + 'static) {
        self.topic.on_completed(Box::new(callback));
    }

    /// Registers a callback for failure or cancellation. Runs immediately if
    /// the operation already failed.
    pub fn on_error(&self, callback: impl Fn(&TransferError) + Send + Sync + 'static) {
        self.topic.on_error(Box::new(callback));
    }

    /// Subscribes to this operation's progress stream.
    pub fn subscribe(&self) -> broadcast::Receiver<Progress> {
        self.topic.subscribe()
    }

    /// Current outcome without waiting.
    pub fn outcome(&self) -> Outcome {
        self.topic.outcome()
    }

    /// Waits for the operation to finish.
    ///
    /// Every call after completion returns the same cached result.
    pub async fn wait(&self) -> Result<Arc<CloneResult>, TransferError> {
        topic::wait_outcome(self.topic.watch_outcome()).await
    }

    pub fn pause(&self) {
        self.coordinator.pause(&self.id);
    }

    pub fn resume(&self) {
        self.coordinator.resume(&self.id);
    }

    pub fn cancel(&self) {
        self.coordinator.cancel(&self.id);
    }
}

impl std::fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationHandle")
            .field("id", &self.id)
            .field("completed", &self.is_completed())
            .field("paused", &self.is_paused())
            .finish()
    }
}
