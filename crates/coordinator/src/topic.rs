//! Per-operation progress topic.
//!
//! Every operation owns one topic. Publishing is serialized through the
//! topic lock, so each subscriber sees that operation's events in emission
//! order, the global stream included, and nothing after the terminal event.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use repoferry_protocol::{CloneResult, Progress, ProgressEvent};
use repoferry_transfer::TransferError;
use tokio::sync::{broadcast, watch};

use crate::types::Outcome;

/// Callback invoked with every progress event of an operation.
pub type ProgressCallback = Box<dyn Fn(&Progress) + Send + Sync>;
/// Callback invoked once when an operation completes.
pub type CompletedCallback = Box<dyn Fn(&CloneResult) + Send + Sync>;
/// Callback invoked once when an operation fails or is cancelled.
pub type ErrorCallback = Box<dyn Fn(&TransferError) + Send + Sync>;

pub(crate) struct OperationTopic {
    operation_id: String,
    inner: Mutex<TopicInner>,
    finished: AtomicBool,
    progress_tx: broadcast::Sender<Progress>,
    global_tx: broadcast::Sender<ProgressEvent>,
    outcome: watch::Sender<Outcome>,
}

#[derive(Default)]
struct TopicInner {
    finished: bool,
    on_progress: Vec<ProgressCallback>,
    on_completed: Vec<CompletedCallback>,
    on_error: Vec<ErrorCallback>,
}

impl OperationTopic {
    pub(crate) fn new(
        operation_id: String,
        global_tx: broadcast::Sender<ProgressEvent>,
        capacity: usize,
    ) -> Self {
        let (progress_tx, _) = broadcast::channel(capacity.max(1));
        let (outcome, _) = watch::channel(Outcome::Pending);
        Self {
            operation_id,
            inner: Mutex::new(TopicInner::default()),
            finished: AtomicBool::new(false),
            progress_tx,
            global_tx,
            outcome,
        }
    }

    /// `true` once the terminal event has been claimed.
    pub(crate) fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Progress> {
        self.progress_tx.subscribe()
    }

    pub(crate) fn outcome(&self) -> Outcome {
        self.outcome.borrow().clone()
    }

    pub(crate) fn watch_outcome(&self) -> watch::Receiver<Outcome> {
        self.outcome.subscribe()
    }

    pub(crate) fn on_progress(&self, callback: ProgressCallback) {
        self.inner.lock().unwrap().on_progress.push(callback);
    }

    /// Registers a completion callback; runs it immediately if the
    /// operation already completed.
    pub(crate) fn on_completed(&self, callback: CompletedCallback) {
        let mut inner = self.inner.lock().unwrap();
        if let Outcome::Completed(result) = &*self.outcome.borrow() {
            callback(result);
            return;
        }
        if !inner.finished {
            inner.on_completed.push(callback);
        }
    }

    /// Registers an error callback; runs it immediately if the operation
    /// already failed.
    pub(crate) fn on_error(&self, callback: ErrorCallback) {
        let mut inner = self.inner.lock().unwrap();
        if let Outcome::Failed(err) = &*self.outcome.borrow() {
            callback(err);
            return;
        }
        if !inner.finished {
            inner.on_error.push(callback);
        }
    }

    /// Publishes a non-terminal event. Returns `false` once finished.
    pub(crate) fn publish(&self, progress: Progress) -> bool {
        let inner = self.inner.lock().unwrap();
        if inner.finished {
            return false;
        }
        self.dispatch(&inner, progress);
        true
    }

    /// Claims the terminal transition, runs `retire`, then publishes the
    /// terminal event and resolves awaiters.
    ///
    /// Returns `false` without doing anything if another path already
    /// finished the operation.
    pub(crate) fn finish(
        &self,
        progress: Progress,
        outcome: Outcome,
        retire: impl FnOnce(),
    ) -> bool {
        let mut inner = self.inner.lock().unwrap();
        if inner.finished {
            return false;
        }
        inner.finished = true;
        self.finished.store(true, Ordering::Release);

        retire();
        self.dispatch(&inner, progress);

        match &outcome {
            Outcome::Completed(result) => {
                for cb in &inner.on_completed {
                    cb(result);
                }
            }
            Outcome::Failed(err) => {
                for cb in &inner.on_error {
                    cb(err);
                }
            }
            Outcome::Pending => {}
        }
        inner.on_completed.clear();
        inner.on_error.clear();

        self.outcome.send_replace(outcome);
        true
    }

    fn dispatch(&self, inner: &TopicInner, progress: Progress) {
        for cb in &inner.on_progress {
            cb(&progress);
        }
        // No receivers is not an error.
        let _ = self.progress_tx.send(progress.clone());
        let _ = self.global_tx.send(ProgressEvent {
            operation_id: self.operation_id.clone(),
            progress,
        });
    }
}

/// Waits until `rx` leaves [`Outcome::Pending`].
pub(crate) async fn wait_outcome(
    mut rx: watch::Receiver<Outcome>,
) -> Result<Arc<CloneResult>, TransferError> {
    let outcome = match rx.wait_for(|o| !o.is_pending()).await {
        Ok(outcome) => outcome.clone(),
        Err(_) => return Err(TransferError::failed("operation dropped before finishing")),
    };
    match outcome {
        Outcome::Completed(result) => Ok(result),
        Outcome::Failed(err) => Err(err),
        Outcome::Pending => Err(TransferError::failed("operation dropped before finishing")),
    }
}
