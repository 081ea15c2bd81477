//! Clone coordinator.
//!
//! Validates requests, owns the registry of active operations, drives each
//! operation's retry loop on its own task, persists checkpoints, and fans
//! progress out to per-operation and global subscribers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use repoferry_protocol::{
    Checkpoint, CloneOptions, CloneResult, CloneStage, Progress, ProgressEvent, now_millis,
};
use repoferry_transfer::{
    ExecutionOutcome, Interruption, OperationState, TransferError, TransferExecutor,
};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::checkpoint::CheckpointStore;
use crate::config::CoordinatorConfig;
use crate::error::CloneError;
use crate::handle::OperationHandle;
use crate::retry::RetryPolicy;
use crate::topic::OperationTopic;
use crate::types::{OperationSnapshot, Outcome};

/// Coordinates resumable clone operations.
///
/// Cheap to clone; every clone shares the same registry. [`clone_repository`]
/// and [`resume`] spawn Tokio tasks and must be called inside a runtime.
///
/// [`clone_repository`]: Self::clone_repository
/// [`resume`]: Self::resume
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoordinatorConfig,
    store: CheckpointStore,
    executor: Arc<dyn TransferExecutor>,
    registry: RwLock<HashMap<String, Arc<Operation>>>,
    events_tx: broadcast::Sender<ProgressEvent>,
}

/// Registry entry for one active operation.
struct Operation {
    id: String,
    state: Arc<OperationState>,
    topic: Arc<OperationTopic>,
    cancel: CancellationToken,
    /// Held for the whole of a run so at most one executor is active.
    run_lock: tokio::sync::Mutex<()>,
    resumable: bool,
    progress_tracking: bool,
    /// A checkpoint seeded this operation.
    seeded: bool,
}

impl Coordinator {
    /// Creates a coordinator that runs attempts on `executor`.
    ///
    /// The resume directory is created eagerly; failure to create it is
    /// logged and does not prevent startup.
    pub fn new(config: CoordinatorConfig, executor: Arc<dyn TransferExecutor>) -> Self {
        let store = CheckpointStore::new(config.resume_dir.clone());
        let (events_tx, _) = broadcast::channel(config.channel_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                executor,
                registry: RwLock::new(HashMap::new()),
                events_tx,
            }),
        }
    }

    /// Returns the configuration in use.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.inner.config
    }

    /// Returns the checkpoint store.
    pub fn checkpoints(&self) -> &CheckpointStore {
        &self.inner.store
    }

    /// Starts a clone and returns its handle.
    ///
    /// Fails synchronously, without registering anything, if `url` or
    /// `destination` is missing or `url` does not parse. The transfer itself
    /// always runs on a separate task; with `background_processing` the task
    /// additionally yields once before the first attempt.
    pub fn clone_repository(&self, options: CloneOptions) -> Result<OperationHandle, CloneError> {
        validate(&options)?;

        let id = options
            .operation_id
            .clone()
            .unwrap_or_else(generate_operation_id);
        let settings = options.resolve(&self.inner.config.defaults);
        let state = Arc::new(OperationState::new(id.clone(), settings.clone()));

        let mut seeded = false;
        if settings.resumable {
            if let Some(checkpoint) = self.inner.store.load(&id) {
                if checkpoint.url != settings.url {
                    warn!(operation = %id, "ignoring checkpoint recorded for a different URL");
                } else if checkpoint.destination != settings.destination {
                    // Seeding marks the destination as this operation's own
                    // leftovers, which executors may delete.
                    warn!(
                        operation = %id,
                        recorded = %checkpoint.destination,
                        "ignoring checkpoint recorded for a different destination"
                    );
                } else {
                    info!(
                        operation = %id,
                        downloaded = checkpoint.downloaded_bytes,
                        total = checkpoint.total_bytes,
                        "resuming from checkpoint"
                    );
                    state.seed(checkpoint.resume_data());
                    seeded = true;
                }
            }
        }

        let topic = Arc::new(OperationTopic::new(
            id.clone(),
            self.inner.events_tx.clone(),
            self.inner.config.channel_capacity,
        ));
        let op = Arc::new(Operation {
            id: id.clone(),
            state: Arc::clone(&state),
            topic: Arc::clone(&topic),
            cancel: CancellationToken::new(),
            run_lock: tokio::sync::Mutex::new(()),
            resumable: settings.resumable,
            progress_tracking: settings.progress_tracking,
            seeded,
        });

        {
            let mut registry = self.inner.registry.write().unwrap();
            if registry.contains_key(&id) {
                return Err(CloneError::DuplicateOperation(id));
            }
            registry.insert(id.clone(), Arc::clone(&op));
        }

        info!(
            operation = %id,
            url = %settings.url,
            destination = %settings.destination,
            "clone registered"
        );

        self.launch(op, settings.background_processing);
        Ok(OperationHandle::new(id, self.clone(), topic, state))
    }

    /// Returns the ids of all non-terminal operations.
    pub fn active_operations(&self) -> Vec<String> {
        self.inner.registry.read().unwrap().keys().cloned().collect()
    }

    /// Returns a diagnostic snapshot of an active operation.
    pub fn operation(&self, id: &str) -> Option<OperationSnapshot> {
        let op = self.inner.get(id)?;
        let state = &op.state;
        Some(OperationSnapshot {
            id: op.id.clone(),
            url: state.url(),
            destination: state.destination(),
            downloaded_bytes: state.downloaded_bytes(),
            total_bytes: state.total_bytes(),
            percentage: state.percentage(),
            retry_count: state.retry_count(),
            paused: state.is_paused(),
            resumed: op.seeded,
        })
    }

    /// Subscribes to progress of every operation.
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Returns every stored checkpoint, e.g. to offer resumption after a restart.
    pub fn pending_checkpoints(&self) -> Vec<Checkpoint> {
        self.inner.store.list()
    }

    /// Pauses an operation and, if resumable, checkpoints its counters.
    ///
    /// The executor stops at its next step. No-op for unknown ids.
    pub fn pause(&self, id: &str) {
        let Some(op) = self.inner.get(id) else {
            debug!(operation = %id, "pause ignored: unknown operation");
            return;
        };
        if !op.state.pause() {
            return;
        }
        info!(operation = %id, percentage = op.state.percentage(), "clone paused");

        if op.resumable {
            self.inner.save_checkpoint(&op);
            // Finished between the flag and the write: drop the stale file.
            if op.topic.is_finished() {
                self.inner.store.delete(id);
            }
        }
    }

    /// Resumes a paused operation from its current counters.
    ///
    /// No-op for unknown or not-paused ids.
    pub fn resume(&self, id: &str) {
        let Some(op) = self.inner.get(id) else {
            debug!(operation = %id, "resume ignored: unknown operation");
            return;
        };
        if !op.state.resume() {
            return;
        }
        info!(operation = %id, percentage = op.state.percentage(), "clone resumed");
        self.launch(op, false);
    }

    /// Cancels an operation, deregisters it, and deletes its checkpoint.
    ///
    /// Idempotent; no-op for unknown or already-terminal ids.
    pub fn cancel(&self, id: &str) {
        let op = self.inner.registry.write().unwrap().remove(id);
        let Some(op) = op else {
            debug!(operation = %id, "cancel ignored: unknown operation");
            return;
        };

        op.state.cancel();
        op.cancel.cancel();
        self.inner.store.delete(id);

        let progress = op.state.progress(
            CloneStage::Error,
            op.state.percentage(),
            &TransferError::Cancelled.to_string(),
        );
        if op
            .topic
            .finish(progress, Outcome::Failed(TransferError::Cancelled), || {})
        {
            info!(operation = %id, "clone cancelled");
        }
    }

    /// Cancels every active operation and removes their checkpoints.
    pub fn dispose(&self) {
        let ids = self.active_operations();
        info!(count = ids.len(), "disposing coordinator");
        for id in ids {
            self.cancel(&id);
        }
    }

    fn launch(&self, op: Arc<Operation>, deferred: bool) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            if deferred {
                tokio::task::yield_now().await;
            }
            inner.drive(op).await;
        });
    }
}

impl Inner {
    fn get(&self, id: &str) -> Option<Arc<Operation>> {
        self.registry.read().unwrap().get(id).cloned()
    }

    /// Runs one retry-wrapped pass of an operation to a terminal state or a pause.
    async fn drive(&self, op: Arc<Operation>) {
        let _run = op.run_lock.lock().await;
        if op.topic.is_finished() || op.state.interruption().is_some() {
            debug!(operation = %op.id, "run skipped");
            return;
        }

        if op.progress_tracking {
            self.emit(
                &op,
                op.state.progress(
                    CloneStage::Initializing,
                    op.state.percentage(),
                    "Starting clone",
                ),
            );
        }

        match self.execute_with_retry(&op).await {
            Ok(ExecutionOutcome::Paused) => {
                debug!(operation = %op.id, "run stopped at pause");
            }
            Ok(ExecutionOutcome::Finished {
                total_objects,
                resumed,
            }) => self.complete(&op, total_objects, resumed),
            Err(e) => self.fail(&op, e),
        }
    }

    async fn execute_with_retry(
        &self,
        op: &Operation,
    ) -> Result<ExecutionOutcome, TransferError> {
        let settings = op.state.settings();
        let attempts = if settings.error_recovery {
            settings.max_retries.max(1)
        } else {
            1
        };
        let on_progress = |progress: Progress| {
            if progress.stage.is_terminal() {
                debug!(operation = %op.id, stage = %progress.stage, "executor terminal stage ignored");
                return;
            }
            op.state.touch();
            if op.progress_tracking {
                self.emit(op, progress);
            }
        };

        let mut attempt = 0;
        loop {
            op.state.set_retry_count(attempt);
            let err = match self.executor.execute(&op.state, &on_progress).await {
                Ok(outcome) => return Ok(outcome),
                Err(e) => e,
            };
            if err.is_cancelled() {
                return Err(err);
            }

            let retryable = settings.error_recovery && RetryPolicy::is_retryable(&err.to_string());
            if !retryable || attempt + 1 >= attempts {
                return Err(err);
            }

            let delay = self.config.retry.backoff_delay(attempt);
            warn!(
                operation = %op.id,
                attempt = attempt + 1,
                attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );

            tokio::select! {
                _ = op.cancel.cancelled() => return Err(TransferError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
            match op.state.interruption() {
                Some(Interruption::Cancelled) => return Err(TransferError::Cancelled),
                Some(Interruption::Paused) => return Ok(ExecutionOutcome::Paused),
                None => {}
            }
            attempt += 1;
        }
    }

    fn emit(&self, op: &Operation, progress: Progress) {
        if !op.topic.publish(progress) {
            debug!(operation = %op.id, "progress dropped after terminal event");
        }
    }

    fn complete(&self, op: &Operation, total_objects: u64, resumed: bool) {
        let state = &op.state;
        let total_bytes = state.total_bytes().max(state.downloaded_bytes());
        let result = CloneResult {
            success: true,
            path: state.destination(),
            duration: state.elapsed(),
            total_bytes,
            error: None,
            resumed: op.seeded || resumed,
        };
        let progress = Progress::new(CloneStage::Completed, 100.0, "Clone completed")
            .with_bytes(total_bytes, total_bytes)
            .with_objects(total_objects, total_objects);

        if op.topic.finish(
            progress,
            Outcome::Completed(Arc::new(result)),
            || self.retire(op),
        ) {
            info!(
                operation = %op.id,
                total_bytes,
                total_objects,
                elapsed_ms = state.elapsed().as_millis() as u64,
                "clone completed"
            );
        }
    }

    fn fail(&self, op: &Operation, err: TransferError) {
        let message = err.to_string();
        let progress = op
            .state
            .progress(CloneStage::Error, op.state.percentage(), &message);
        if op
            .topic
            .finish(progress, Outcome::Failed(err), || self.retire(op))
        {
            error!(
                operation = %op.id,
                attempts = op.state.retry_count() + 1,
                error = %message,
                "clone failed"
            );
        }
    }

    /// Deregisters a terminal operation and drops its checkpoint.
    fn retire(&self, op: &Operation) {
        {
            let mut registry = self.registry.write().unwrap();
            let ours = registry
                .get(&op.id)
                .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), op));
            if ours {
                registry.remove(&op.id);
            }
        }
        self.store.delete(&op.id);
    }

    fn save_checkpoint(&self, op: &Operation) {
        let checkpoint = Checkpoint {
            operation_id: op.id.clone(),
            url: op.state.url(),
            destination: op.state.destination(),
            downloaded_bytes: op.state.downloaded_bytes(),
            total_bytes: op.state.total_bytes(),
            timestamp: now_millis(),
        };
        if let Err(e) = self.store.save(&checkpoint) {
            warn!(operation = %op.id, error = %e, "failed to save checkpoint");
        }
    }
}

/// Generates a process-unique id: millisecond timestamp plus a random suffix.
fn generate_operation_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("clone_{}_{}", now_millis(), &suffix[..8])
}

fn validate(options: &CloneOptions) -> Result<(), CloneError> {
    if options.url.trim().is_empty() {
        return Err(CloneError::MissingOption("url"));
    }
    if options.destination.trim().is_empty() {
        return Err(CloneError::MissingOption("destination"));
    }
    Url::parse(&options.url)
        .map_err(|e| CloneError::InvalidUrl(format!("{} ({e})", options.url)))?;

    if let Some(id) = &options.operation_id {
        let valid = !id.is_empty()
            && !id.starts_with('.')
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid {
            return Err(CloneError::InvalidOperationId(id.clone()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use repoferry_transfer::{BoxFuture, ProgressFn, SimulatedExecutor};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    const URL: &str = "https://github.com/user/repo.git";

    /// Fails the first `failures` attempts with `message`, then succeeds.
    struct ScriptedExecutor {
        attempts: AtomicU32,
        failures: u32,
        message: &'static str,
    }

    impl ScriptedExecutor {
        fn new(failures: u32, message: &'static str) -> Arc<Self> {
            Arc::new(Self {
                attempts: AtomicU32::new(0),
                failures,
                message,
            })
        }

        fn attempts(&self) -> u32 {
            self.attempts.load(Ordering::SeqCst)
        }
    }

    impl TransferExecutor for ScriptedExecutor {
        fn execute<'a>(
            &'a self,
            state: &'a OperationState,
            _on_progress: &'a ProgressFn<'a>,
        ) -> BoxFuture<'a, Result<ExecutionOutcome, TransferError>> {
            Box::pin(async move {
                let n = self.attempts.fetch_add(1, Ordering::SeqCst);
                if n < self.failures {
                    return Err(TransferError::failed(self.message));
                }
                state.set_total_bytes(10);
                state.record_bytes(10);
                Ok(ExecutionOutcome::Finished {
                    total_objects: 1,
                    resumed: false,
                })
            })
        }
    }

    fn simulated() -> Arc<SimulatedExecutor> {
        Arc::new(
            SimulatedExecutor::new(1000, 100)
                .with_steps(10)
                .with_step_delay(Duration::from_millis(10)),
        )
    }

    fn test_coordinator(executor: Arc<dyn TransferExecutor>) -> (tempfile::TempDir, Coordinator) {
        let tmp = tempfile::tempdir().unwrap();
        let config = CoordinatorConfig::with_resume_dir(tmp.path().join("resume"));
        (tmp, Coordinator::new(config, executor))
    }

    /// Drains a progress stream up to and including the terminal event.
    async fn collect(mut rx: broadcast::Receiver<Progress>) -> Vec<Progress> {
        let mut seen = Vec::new();
        while let Ok(progress) = rx.recv().await {
            let done = progress.stage.is_terminal();
            seen.push(progress);
            if done {
                break;
            }
        }
        seen
    }

    #[tokio::test]
    async fn missing_options_register_nothing() {
        let (_tmp, coord) = test_coordinator(simulated());
        assert!(matches!(
            coord.clone_repository(CloneOptions::default()),
            Err(CloneError::MissingOption(_))
        ));
        assert!(coord.active_operations().is_empty());
    }

    #[tokio::test]
    async fn invalid_url_is_rejected_valid_url_accepted() {
        let (_tmp, coord) = test_coordinator(simulated());
        let err = coord
            .clone_repository(CloneOptions::new("not-a-valid-url", "/x"))
            .unwrap_err();
        assert!(err.to_string().starts_with("invalid URL format"));
        assert!(coord.active_operations().is_empty());

        let handle = coord
            .clone_repository(CloneOptions::new("https://host/repo.git", "/x"))
            .unwrap();
        assert!(!handle.is_completed());
        assert_eq!(coord.active_operations(), vec![handle.id().to_string()]);
    }

    #[tokio::test]
    async fn concurrent_clones_get_distinct_ids() {
        let (_tmp, coord) = test_coordinator(simulated());
        let a = coord.clone_repository(CloneOptions::new(URL, "/tmp/a")).unwrap();
        let b = coord.clone_repository(CloneOptions::new(URL, "/tmp/b")).unwrap();

        assert_ne!(a.id(), b.id());
        let active = coord.active_operations();
        assert!(active.contains(&a.id().to_string()));
        assert!(active.contains(&b.id().to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_returns_the_same_cached_result() {
        let (_tmp, coord) = test_coordinator(simulated());
        let handle = coord.clone_repository(CloneOptions::new(URL, "/tmp/r")).unwrap();

        let first = handle.wait().await.unwrap();
        let second = handle.wait().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(first.success);
        assert_eq!(first.path, "/tmp/r");
        assert_eq!(first.total_bytes, 1000);
        assert!(handle.is_completed());
        assert!(coord.active_operations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn end_to_end_stages_in_order() {
        let (_tmp, coord) = test_coordinator(simulated());
        let handle = coord
            .clone_repository(CloneOptions::new(URL, "/tmp/r").background_processing(true))
            .unwrap();
        let events = collect(handle.subscribe()).await;

        let mut stages: Vec<CloneStage> = events.iter().map(|p| p.stage).collect();
        stages.dedup();
        assert_eq!(
            stages,
            vec![
                CloneStage::Initializing,
                CloneStage::Fetching,
                CloneStage::Receiving,
                CloneStage::Resolving,
                CloneStage::CheckingOut,
                CloneStage::Completed,
            ]
        );
        for pair in events.windows(2) {
            assert!(pair[1].percentage > pair[0].percentage);
        }
        assert_eq!(events.last().unwrap().percentage, 100.0);
        let result = handle.wait().await.unwrap();
        assert!(result.success);
        assert!(result.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_checkpoints_and_resume_completes() {
        let (_tmp, coord) = test_coordinator(simulated());
        let handle = coord.clone_repository(CloneOptions::new(URL, "/tmp/r")).unwrap();
        let id = handle.id().to_string();

        let mut rx = handle.subscribe();
        loop {
            let progress = rx.recv().await.unwrap();
            if progress.downloaded_bytes > 0 {
                break;
            }
        }

        handle.pause();
        assert!(handle.is_paused());
        let checkpoint = coord.checkpoints().load(&id).unwrap();
        assert!(checkpoint.downloaded_bytes > 0);
        assert_eq!(checkpoint.total_bytes, 1000);
        assert_eq!(checkpoint.url, URL);

        // The running attempt stops at its next step and stays registered.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_completed());
        let snapshot = coord.operation(&id).unwrap();
        assert!(snapshot.paused);
        assert!(snapshot.downloaded_bytes < 1000);

        handle.resume();
        assert!(!handle.is_paused());
        assert!(coord.active_operations().contains(&id));

        let result = handle.wait().await.unwrap();
        assert!(result.success);
        assert!(result.resumed);
        assert!(!coord.checkpoints().path_for(&id).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn pause_without_resumable_writes_nothing() {
        let (_tmp, coord) = test_coordinator(simulated());
        let handle = coord
            .clone_repository(CloneOptions::new(URL, "/tmp/r").resumable(false))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(35)).await;

        handle.pause();
        assert!(handle.is_paused());
        assert!(!coord.checkpoints().path_for(handle.id()).exists());
        handle.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_cleans_up() {
        let (_tmp, coord) = test_coordinator(simulated());
        let handle = coord.clone_repository(CloneOptions::new(URL, "/tmp/r")).unwrap();
        let id = handle.id().to_string();
        tokio::time::sleep(Duration::from_millis(35)).await;
        handle.pause();
        assert!(coord.checkpoints().path_for(&id).exists());

        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = Arc::clone(&errors);
        handle.on_error(move |err| e.lock().unwrap().push(err.clone()));

        coord.cancel(&id);
        assert!(!coord.active_operations().contains(&id));
        assert!(!coord.checkpoints().path_for(&id).exists());
        coord.cancel(&id);
        coord.cancel("unknown");

        assert_eq!(handle.wait().await.unwrap_err(), TransferError::Cancelled);
        assert!(handle.is_completed());
        assert_eq!(*errors.lock().unwrap(), vec![TransferError::Cancelled]);

        // Control calls on a finished operation are no-ops.
        handle.pause();
        handle.resume();
        assert!(!coord.checkpoints().path_for(&id).exists());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_emits_one_error_event() {
        let (_tmp, coord) = test_coordinator(simulated());
        let handle = coord.clone_repository(CloneOptions::new(URL, "/tmp/r")).unwrap();
        let rx = handle.subscribe();
        tokio::time::sleep(Duration::from_millis(25)).await;
        handle.cancel();

        let events = collect(rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.stage, CloneStage::Error);
        assert_eq!(last.message, "operation cancelled");

        // The interrupted executor's late return publishes nothing more.
        let mut rx = handle.subscribe();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_stops_at_max_retries() {
        let exec = ScriptedExecutor::new(u32::MAX, "Network timeout");
        let (_tmp, coord) = test_coordinator(exec.clone());
        let handle = coord
            .clone_repository(CloneOptions::new(URL, "/tmp/r").max_retries(2))
            .unwrap();
        let rx = handle.subscribe();

        let err = handle.wait().await.unwrap_err();
        assert_eq!(err, TransferError::failed("Network timeout"));
        assert_eq!(exec.attempts(), 2);

        let events = collect(rx).await;
        let last = events.last().unwrap();
        assert_eq!(last.stage, CloneStage::Error);
        assert_eq!(last.message, "Network timeout");
        assert!(coord.active_operations().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_between_attempts() {
        let exec = ScriptedExecutor::new(2, "503 Service Unavailable");
        let (_tmp, coord) = test_coordinator(exec.clone());
        let started = tokio::time::Instant::now();
        let handle = coord.clone_repository(CloneOptions::new(URL, "/tmp/r")).unwrap();

        let result = handle.wait().await.unwrap();
        assert!(result.success);
        assert_eq!(exec.attempts(), 3);
        // 1 s after the first failure, 2 s after the second.
        assert!(started.elapsed() >= Duration::from_secs(3));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let exec = ScriptedExecutor::new(u32::MAX, "Authentication failed");
        let (_tmp, coord) = test_coordinator(exec.clone());
        let handle = coord
            .clone_repository(CloneOptions::new(URL, "/tmp/r").max_retries(5))
            .unwrap();

        assert!(handle.wait().await.is_err());
        assert_eq!(exec.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn error_recovery_disabled_runs_once() {
        let exec = ScriptedExecutor::new(u32::MAX, "Connection refused");
        let (_tmp, coord) = test_coordinator(exec.clone());
        let handle = coord
            .clone_repository(CloneOptions::new(URL, "/tmp/r").error_recovery(false))
            .unwrap();

        assert!(handle.wait().await.is_err());
        assert_eq!(exec.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_max_retries_still_attempts_once() {
        let exec = ScriptedExecutor::new(0, "");
        let (_tmp, coord) = test_coordinator(exec.clone());
        let handle = coord
            .clone_repository(CloneOptions::new(URL, "/tmp/r").max_retries(0))
            .unwrap();

        assert!(handle.wait().await.unwrap().success);
        assert_eq!(exec.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let exec = ScriptedExecutor::new(u32::MAX, "temporary failure");
        let (_tmp, coord) = test_coordinator(exec.clone());
        let handle = coord
            .clone_repository(CloneOptions::new(URL, "/tmp/r").max_retries(10))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(exec.attempts(), 1);
        handle.cancel();

        assert_eq!(handle.wait().await.unwrap_err(), TransferError::Cancelled);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(exec.attempts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stable_id_resumes_from_checkpoint() {
        let (_tmp, coord) = test_coordinator(simulated());
        coord
            .checkpoints()
            .save(&Checkpoint {
                operation_id: "nightly".into(),
                url: URL.into(),
                destination: "/tmp/r".into(),
                downloaded_bytes: 600,
                total_bytes: 1000,
                timestamp: now_millis(),
            })
            .unwrap();

        let handle = coord
            .clone_repository(CloneOptions::new(URL, "/tmp/r").operation_id("nightly"))
            .unwrap();
        assert_eq!(handle.id(), "nightly");
        assert_eq!(coord.operation("nightly").unwrap().downloaded_bytes, 600);

        let result = handle.wait().await.unwrap();
        assert!(result.resumed);
        assert!(!coord.checkpoints().path_for("nightly").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_for_other_url_is_ignored() {
        let (_tmp, coord) = test_coordinator(simulated());
        coord
            .checkpoints()
            .save(&Checkpoint {
                operation_id: "mirror".into(),
                url: "https://example.com/other.git".into(),
                destination: "/tmp/r".into(),
                downloaded_bytes: 600,
                total_bytes: 1000,
                timestamp: now_millis(),
            })
            .unwrap();

        let handle = coord
            .clone_repository(CloneOptions::new(URL, "/tmp/r").operation_id("mirror"))
            .unwrap();
        assert_eq!(coord.operation("mirror").unwrap().downloaded_bytes, 0);
        assert!(!handle.wait().await.unwrap().resumed);
    }

    #[tokio::test(start_paused = true)]
    async fn checkpoint_for_other_destination_is_ignored() {
        let (_tmp, coord) = test_coordinator(simulated());
        coord
            .checkpoints()
            .save(&Checkpoint {
                operation_id: "mirror".into(),
                url: URL.into(),
                destination: "/tmp/somewhere-else".into(),
                downloaded_bytes: 600,
                total_bytes: 1000,
                timestamp: now_millis(),
            })
            .unwrap();

        let handle = coord
            .clone_repository(CloneOptions::new(URL, "/tmp/r").operation_id("mirror"))
            .unwrap();
        let snapshot = coord.operation("mirror").unwrap();
        assert_eq!(snapshot.downloaded_bytes, 0);
        assert!(!snapshot.resumed);
        assert!(!handle.wait().await.unwrap().resumed);
    }

    /// Reusing an id for another destination must not let git treat the
    /// caller's directory as a partial clone and wipe it.
    #[cfg(unix)]
    #[tokio::test]
    async fn reused_id_keeps_foreign_destination_intact() {
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("important");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("thesis.txt"), b"user data").unwrap();

        let git = repoferry_transfer::GitCliExecutor::with_program(
            "sh",
            vec!["-c".into(), "exit 0".into(), "git".into()],
        );
        let config = CoordinatorConfig::with_resume_dir(tmp.path().join("resume"));
        let coord = Coordinator::new(config, Arc::new(git));
        coord
            .checkpoints()
            .save(&Checkpoint {
                operation_id: "nightly".into(),
                url: URL.into(),
                destination: "/tmp/somewhere-else".into(),
                downloaded_bytes: 600,
                total_bytes: 1000,
                timestamp: now_millis(),
            })
            .unwrap();

        let handle = coord
            .clone_repository(
                CloneOptions::new(URL, dest.to_string_lossy()).operation_id("nightly"),
            )
            .unwrap();

        let err = handle.wait().await.unwrap_err();
        assert!(err.to_string().contains("not empty"), "{err}");
        assert!(dest.join("thesis.txt").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn unwritable_resume_dir_is_not_fatal() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"x").unwrap();
        let config = CoordinatorConfig::with_resume_dir(blocker.join("resume"));
        let coord = Coordinator::new(config, simulated());

        let handle = coord.clone_repository(CloneOptions::new(URL, "/tmp/r")).unwrap();
        let id = handle.id().to_string();
        tokio::time::sleep(Duration::from_millis(35)).await;

        handle.pause();
        assert!(handle.is_paused());
        assert_eq!(coord.active_operations(), vec![id.clone()]);
        assert!(coord.checkpoints().load(&id).is_none());
        assert!(coord.pending_checkpoints().is_empty());

        handle.resume();
        let result = handle.wait().await.unwrap();
        assert!(result.success);
        assert!(coord.active_operations().is_empty());
    }

    #[tokio::test]
    async fn duplicate_operation_id_is_rejected() {
        let (_tmp, coord) = test_coordinator(simulated());
        let options = CloneOptions::new(URL, "/tmp/r").operation_id("dup");
        let _first = coord.clone_repository(options.clone()).unwrap();

        assert!(matches!(
            coord.clone_repository(options),
            Err(CloneError::DuplicateOperation(id)) if id == "dup"
        ));
        assert_eq!(coord.active_operations().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn global_stream_tags_every_operation() {
        let (_tmp, coord) = test_coordinator(simulated());
        let mut global = coord.subscribe();
        let a = coord.clone_repository(CloneOptions::new(URL, "/tmp/a")).unwrap();
        let b = coord.clone_repository(CloneOptions::new(URL, "/tmp/b")).unwrap();
        a.wait().await.unwrap();
        b.wait().await.unwrap();

        let mut completed = Vec::new();
        while let Ok(event) = global.try_recv() {
            if event.progress.stage == CloneStage::Completed {
                completed.push(event.operation_id);
            }
        }
        completed.sort();
        let mut expected = vec![a.id().to_string(), b.id().to_string()];
        expected.sort();
        assert_eq!(completed, expected);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_tracking_off_emits_only_terminal() {
        let (_tmp, coord) = test_coordinator(simulated());
        let handle = coord
            .clone_repository(CloneOptions::new(URL, "/tmp/r").progress_tracking(false))
            .unwrap();
        let mut rx = handle.subscribe();
        handle.wait().await.unwrap();

        assert_eq!(rx.try_recv().unwrap().stage, CloneStage::Completed);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn callbacks_fire_once_and_late_registration_sees_result() {
        let (_tmp, coord) = test_coordinator(simulated());
        let handle = coord.clone_repository(CloneOptions::new(URL, "/tmp/r")).unwrap();

        let stages = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&stages);
        handle.on_progress(move |p| s.lock().unwrap().push(p.stage));
        let completed = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&completed);
        handle.on_completed(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        handle.wait().await.unwrap();
        assert_eq!(completed.load(Ordering::SeqCst), 1);
        assert_eq!(stages.lock().unwrap().last(), Some(&CloneStage::Completed));

        let late = Arc::new(AtomicU32::new(0));
        let l = Arc::clone(&late);
        handle.on_completed(move |result| {
            assert!(result.success);
            l.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(late.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_cancels_everything() {
        let (_tmp, coord) = test_coordinator(simulated());
        let a = coord.clone_repository(CloneOptions::new(URL, "/tmp/a")).unwrap();
        let b = coord.clone_repository(CloneOptions::new(URL, "/tmp/b")).unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        a.pause();

        coord.dispose();
        assert!(coord.active_operations().is_empty());
        assert!(coord.pending_checkpoints().is_empty());
        assert_eq!(a.wait().await.unwrap_err(), TransferError::Cancelled);
        assert_eq!(b.wait().await.unwrap_err(), TransferError::Cancelled);
    }

    #[tokio::test]
    async fn unknown_ids_are_no_ops() {
        let (_tmp, coord) = test_coordinator(simulated());
        coord.pause("missing");
        coord.resume("missing");
        coord.cancel("missing");
        assert!(coord.operation("missing").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn resume_when_not_paused_does_nothing() {
        let exec = ScriptedExecutor::new(0, "");
        let (_tmp, coord) = test_coordinator(exec.clone());
        let handle = coord.clone_repository(CloneOptions::new(URL, "/tmp/r")).unwrap();
        handle.resume();
        handle.wait().await.unwrap();
        assert_eq!(exec.attempts(), 1);
    }

    #[test]
    fn validate_rejects_missing_fields() {
        assert!(matches!(
            validate(&CloneOptions::default()),
            Err(CloneError::MissingOption("url"))
        ));
        assert!(matches!(
            validate(&CloneOptions::new("https://host/repo.git", "")),
            Err(CloneError::MissingOption("destination"))
        ));
    }

    #[test]
    fn validate_rejects_non_urls() {
        for url in ["not-a-valid-url", "git@github.com:user/repo.git", "/local/path"] {
            let err = validate(&CloneOptions::new(url, "/x")).unwrap_err();
            assert!(
                err.to_string().starts_with("invalid URL format"),
                "{url}: {err}"
            );
        }
    }

    #[test]
    fn validate_accepts_urls() {
        for url in [
            "https://host/repo.git",
            "ssh://git@github.com/user/repo.git",
            "file:///srv/git/repo.git",
        ] {
            assert!(validate(&CloneOptions::new(url, "/x")).is_ok(), "{url}");
        }
    }

    #[test]
    fn validate_operation_id_charset() {
        let ok = CloneOptions::new("https://host/repo.git", "/x").operation_id("nightly-mirror_1");
        assert!(validate(&ok).is_ok());

        for bad in ["", "../escape", ".hidden", "a/b", "with space"] {
            let options = CloneOptions::new("https://host/repo.git", "/x").operation_id(bad);
            assert!(
                matches!(validate(&options), Err(CloneError::InvalidOperationId(_))),
                "{bad:?}"
            );
        }
    }

    #[test]
    fn generated_ids_are_unique_and_prefixed() {
        let a = generate_operation_id();
        let b = generate_operation_id();
        assert_ne!(a, b);
        assert!(a.starts_with("clone_"));
        assert_eq!(a.split('_').count(), 3);
    }
}
