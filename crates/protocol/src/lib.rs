//! Data model shared by the repoferry clone engine.
//!
//! Everything that crosses a boundary lives here: the options a caller
//! hands to the coordinator, the progress events it publishes, the terminal
//! result, and the checkpoint record persisted for resumable clones.

pub mod checkpoint;
pub mod options;
pub mod progress;
pub mod result;

pub use checkpoint::{Checkpoint, ResumeData};
pub use options::{AuthToken, CloneOptions, CloneSettings, OptionDefaults};
pub use progress::{CloneStage, Progress, ProgressEvent};
pub use result::CloneResult;

/// Returns the current wall-clock time as Unix milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
