//! Durable checkpoint persistence for resumable clones.
//!
//! One JSON file per operation id under a dedicated resume directory.
//! Writes go to a temporary sibling first and are renamed into place, so a
//! crash never leaves a truncated checkpoint behind.

use std::path::{Path, PathBuf};

use repoferry_protocol::Checkpoint;
use tracing::{debug, warn};

/// Errors from checkpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// File-per-operation checkpoint store.
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    /// Creates a store rooted at `dir`, creating the directory eagerly.
    ///
    /// A failure to create the directory is logged and does not prevent
    /// construction; later saves retry the creation.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(path = %dir.display(), error = %e, "failed to create resume directory");
        }
        Self { dir }
    }

    /// Returns the resume directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file a checkpoint for `operation_id` is stored in.
    pub fn path_for(&self, operation_id: &str) -> PathBuf {
        self.dir.join(format!("{operation_id}.json"))
    }

    /// Atomically writes the checkpoint for its operation.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        std::fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&checkpoint.operation_id);
        let tmp = self
            .dir
            .join(format!(".{}.json.tmp", checkpoint.operation_id));

        let json = serde_json::to_vec_pretty(checkpoint)?;
        std::fs::write(&tmp, json)?;
        if let Err(e) = std::fs::rename(&tmp, &path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }

        debug!(
            operation = %checkpoint.operation_id,
            downloaded = checkpoint.downloaded_bytes,
            total = checkpoint.total_bytes,
            "checkpoint saved"
        );
        Ok(())
    }

    /// Loads the checkpoint for `operation_id`.
    ///
    /// A missing, unreadable, or malformed file all mean "no checkpoint".
    pub fn load(&self, operation_id: &str) -> Option<Checkpoint> {
        let path = self.path_for(operation_id);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "checkpoint unreadable");
                return None;
            }
        };
        match serde_json::from_slice(&data) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "checkpoint malformed");
                None
            }
        }
    }

    /// Deletes the checkpoint for `operation_id`. Best-effort: failures are logged.
    pub fn delete(&self, operation_id: &str) {
        let path = self.path_for(operation_id);
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(operation = %operation_id, "checkpoint deleted"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(operation = %operation_id, error = %e, "failed to delete checkpoint")
            }
        }
    }

    /// Returns every readable checkpoint in the store, sorted by timestamp.
    pub fn list(&self) -> Vec<Checkpoint> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(path = %self.dir.display(), error = %e, "resume directory unreadable");
                return Vec::new();
            }
        };

        let mut checkpoints: Vec<Checkpoint> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                if name.starts_with('.') {
                    return None;
                }
                let id = name.strip_suffix(".json")?;
                self.load(id)
            })
            .collect();
        checkpoints.sort_by_key(|c| c.timestamp);
        checkpoints
    }

    /// Deletes every checkpoint file in the store. Returns how many were
    /// removed.
    ///
    /// Files are removed by name, so a file whose contents name another
    /// operation is still cleared.
    pub fn clear(&self) -> usize {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(_) => return 0,
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') || !name.ends_with(".json") {
                continue;
            }
            match std::fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to delete checkpoint")
                }
            }
        }
        removed
    }
}
