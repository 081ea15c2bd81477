use std::time::Duration;

use repoferry_protocol::CloneStage;
use tracing::trace;

use crate::executor::{BoxFuture, ExecutionOutcome, ProgressFn, TransferExecutor};
use crate::{Interruption, OperationState, TransferError};

/// Percentage reached when the last step finishes; `completed` owns 100.
const FINAL_PERCENTAGE: f64 = 99.0;

/// In-process executor that walks the clone stages on a fixed schedule.
///
/// Used for demos and tests: it moves a byte counter from wherever the
/// operation left off up to `total_bytes` in `steps` equal increments,
/// sleeping `step_delay` before each one.
#[derive(Debug, Clone)]
pub struct SimulatedExecutor {
    total_bytes: u64,
    total_objects: u64,
    steps: u32,
    step_delay: Duration,
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new(4 * 1024 * 1024, 2_000)
    }
}

impl SimulatedExecutor {
    pub fn new(total_bytes: u64, total_objects: u64) -> Self {
        Self {
            total_bytes: total_bytes.max(1),
            total_objects,
            steps: 20,
            step_delay: Duration::from_millis(100),
        }
    }

    /// Sets the number of steps for a full transfer (minimum 1).
    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps.max(1);
        self
    }

    /// Sets the delay before each step.
    pub fn with_step_delay(mut self, delay: Duration) -> Self {
        self.step_delay = delay;
        self
    }

    /// Maps an overall percentage onto the stage it falls in.
    pub fn stage_for(percentage: f64) -> (CloneStage, &'static str) {
        if percentage < 10.0 {
            (CloneStage::Fetching, "Fetching refs")
        } else if percentage < 70.0 {
            (CloneStage::Receiving, "Receiving objects")
        } else if percentage < 90.0 {
            (CloneStage::Resolving, "Resolving deltas")
        } else {
            (CloneStage::CheckingOut, "Checking out files")
        }
    }

    async fn run(
        &self,
        state: &OperationState,
        on_progress: &ProgressFn<'_>,
    ) -> Result<ExecutionOutcome, TransferError> {
        let steps = u64::from(self.steps);
        state.set_total_bytes(self.total_bytes);

        // Skip the steps a previous attempt already covered.
        let done = state.downloaded_bytes().min(self.total_bytes);
        let first_step = done * steps / self.total_bytes;
        let resumed = first_step > 0;

        for step in first_step + 1..=steps {
            match state.interruption() {
                Some(Interruption::Cancelled) => return Err(TransferError::Cancelled),
                Some(Interruption::Paused) => return Ok(ExecutionOutcome::Paused),
                None => {}
            }

            tokio::time::sleep(self.step_delay).await;

            state.record_bytes(self.total_bytes * step / steps);
            let percentage = FINAL_PERCENTAGE * step as f64 / steps as f64;
            let (stage, message) = Self::stage_for(percentage);
            let progress = state
                .progress(stage, percentage, message)
                .with_objects(self.total_objects * step / steps, self.total_objects);
            trace!(operation = %state.id(), step, percentage, "simulated step");
            on_progress(progress);
        }

        match state.interruption() {
            Some(Interruption::Cancelled) => Err(TransferError::Cancelled),
            _ => Ok(ExecutionOutcome::Finished {
                total_objects: self.total_objects,
                resumed,
            }),
        }
    }
}

impl TransferExecutor for SimulatedExecutor {
    fn execute<'a>(
        &'a self,
        state: &'a OperationState,
        on_progress: &'a ProgressFn<'a>,
    ) -> BoxFuture<'a, Result<ExecutionOutcome, TransferError>> {
        Box::pin(self.run(state, on_progress))
    }
}
