//! Executor backed by the system `git` binary.
//!
//! Runs `git clone --progress` and turns the carriage-return separated
//! progress lines git writes to stderr into [`Progress`] values.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use repoferry_protocol::{CloneSettings, CloneStage, Progress};
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, trace};

use crate::executor::{BoxFuture, ExecutionOutcome, ProgressFn, TransferExecutor};
use crate::{Interruption, OperationState, TransferError};

/// How often flags and the deadline are checked while git is quiet.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Phase reported by a git progress line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitPhase {
    Counting,
    Compressing,
    Receiving,
    Resolving,
    CheckingOut,
}

impl GitPhase {
    fn from_label(label: &str) -> Option<Self> {
        match label {
            "Enumerating objects" | "Counting objects" => Some(Self::Counting),
            "Compressing objects" => Some(Self::Compressing),
            "Receiving objects" => Some(Self::Receiving),
            "Resolving deltas" => Some(Self::Resolving),
            "Updating files" | "Checking out files" => Some(Self::CheckingOut),
            _ => None,
        }
    }

    /// Stage and overall percentage band covered by this phase.
    fn band(self) -> (CloneStage, f64, f64) {
        match self {
            Self::Counting => (CloneStage::Fetching, 0.0, 5.0),
            Self::Compressing => (CloneStage::Fetching, 5.0, 10.0),
            Self::Receiving => (CloneStage::Receiving, 10.0, 70.0),
            Self::Resolving => (CloneStage::Resolving, 70.0, 90.0),
            Self::CheckingOut => (CloneStage::CheckingOut, 90.0, 99.0),
        }
    }
}

/// One parsed git progress line.
#[derive(Debug, Clone, PartialEq)]
pub struct GitProgressLine {
    pub phase: GitPhase,
    pub percent: f64,
    pub current: u64,
    pub total: u64,
    /// Bytes received so far (receiving phase only).
    pub bytes: Option<u64>,
    /// Throughput in bytes/second (receiving phase only).
    pub rate: Option<f64>,
}

impl GitProgressLine {
    /// Maps the phase-local percentage onto the whole clone.
    pub fn overall_percentage(&self) -> f64 {
        let (_, lo, hi) = self.phase.band();
        lo + (hi - lo) * self.percent.clamp(0.0, 100.0) / 100.0
    }

    pub fn stage(&self) -> CloneStage {
        self.phase.band().0
    }
}

/// Parses a line such as
/// `Receiving objects:  45% (450/1000), 1.20 MiB | 600.00 KiB/s`.
///
/// Returns `None` for anything that is not a recognised progress line.
pub fn parse_progress_line(line: &str) -> Option<GitProgressLine> {
    let line = line.trim();
    let line = line.strip_prefix("remote:").map(str::trim).unwrap_or(line);
    let (label, rest) = line.split_once(':')?;
    let phase = GitPhase::from_label(label.trim())?;

    let rest = rest.trim_start();
    let (percent, rest) = rest.split_once('%')?;
    let percent: f64 = percent.trim().parse().ok()?;

    let open = rest.find('(')?;
    let close = rest.find(')')?;
    let (current, total) = rest.get(open + 1..close)?.split_once('/')?;
    let current: u64 = current.trim().parse().ok()?;
    let total: u64 = total.trim().parse().ok()?;

    let tail = &rest[close + 1..];
    let (bytes, rate) = match tail.trim_start_matches(',').split_once('|') {
        Some((size, speed)) => {
            let speed = speed.split(',').next().unwrap_or_default();
            (
                parse_size(size),
                parse_size(speed.trim().trim_end_matches("/s")).map(|b| b as f64),
            )
        }
        None => (None, None),
    };

    Some(GitProgressLine {
        phase,
        percent,
        current,
        total,
        bytes,
        rate,
    })
}

/// Parses `1.20 MiB`, `512 bytes`, `3 KiB` into a byte count.
fn parse_size(text: &str) -> Option<u64> {
    let mut parts = text.split_whitespace();
    let value: f64 = parts.next()?.parse().ok()?;
    let multiplier = match parts.next()? {
        "bytes" | "byte" | "B" => 1.0,
        "KiB" => 1024.0,
        "MiB" => 1024.0 * 1024.0,
        "GiB" => 1024.0 * 1024.0 * 1024.0,
        _ => return None,
    };
    Some((value * multiplier) as u64)
}

/// Clones with the system `git` binary.
#[derive(Debug, Clone)]
pub struct GitCliExecutor {
    program: PathBuf,
    prefix_args: Vec<String>,
    poll_interval: Duration,
}

impl Default for GitCliExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCliExecutor {
    /// Uses `git` from `PATH`.
    pub fn new() -> Self {
        Self {
            program: PathBuf::from("git"),
            prefix_args: Vec::new(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Runs git through another program, e.g. `flatpak-spawn --host git`.
    pub fn with_program(program: impl Into<PathBuf>, prefix_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            prefix_args,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn command(&self, settings: &CloneSettings, dest: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.prefix_args);
        cmd.arg("clone").arg("--progress");
        if let Some(branch) = &settings.branch {
            cmd.arg("--branch").arg(branch);
        }
        if settings.depth > 0 {
            cmd.arg("--depth").arg(settings.depth.to_string());
        }
        if settings.include_submodules {
            cmd.arg("--recurse-submodules");
        }
        cmd.arg("--").arg(&settings.url).arg(dest);

        cmd.env("GIT_TERMINAL_PROMPT", "0");
        // Credentials go through the environment so they never show up in argv.
        if let Some(token) = &settings.auth_token {
            cmd.env("GIT_CONFIG_COUNT", "1")
                .env("GIT_CONFIG_KEY_0", "http.extraHeader")
                .env(
                    "GIT_CONFIG_VALUE_0",
                    format!("Authorization: Bearer {}", token.expose()),
                );
        }

        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// git refuses to clone into a non-empty directory. Leftovers from an
    /// earlier attempt of this operation are removed; anything else is an error.
    async fn prepare_destination(
        &self,
        state: &OperationState,
        dest: &Path,
    ) -> Result<(), TransferError> {
        let mut entries = match tokio::fs::read_dir(dest).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        if entries.next_entry().await?.is_none() {
            return Ok(());
        }

        let ran_before = state.retry_count() > 0
            || state.downloaded_bytes() > 0
            || state.resume_data().is_some();
        if !ran_before {
            return Err(TransferError::failed(format!(
                "destination {} already exists and is not empty",
                dest.display()
            )));
        }

        debug!(operation = %state.id(), path = %dest.display(), "removing partial clone");
        tokio::fs::remove_dir_all(dest).await?;
        Ok(())
    }

    async fn run(
        &self,
        state: &OperationState,
        on_progress: &ProgressFn<'_>,
    ) -> Result<ExecutionOutcome, TransferError> {
        let settings = state.settings();
        let dest = PathBuf::from(&settings.destination);
        self.prepare_destination(state, &dest).await?;

        let mut child = self
            .command(&settings, &dest)
            .spawn()
            .map_err(|e| TransferError::failed(format!("failed to start git: {e}")))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| TransferError::failed("git stderr unavailable"))?;

        let mut reader = LineReader::default();
        let mut tracker = ProgressState::default();
        let mut buf = [0u8; 4096];
        let mut ticker = tokio::time::interval(self.poll_interval);
        let deadline = tokio::time::Instant::now() + settings.operation_timeout;

        loop {
            let mut eof = false;
            tokio::select! {
                read = stderr.read(&mut buf) => match read {
                    Ok(0) => eof = true,
                    Ok(n) => {
                        for line in reader.push(&buf[..n]) {
                            tracker.handle_line(&line, state, on_progress);
                        }
                    }
                    Err(e) => {
                        kill(&mut child).await;
                        return Err(e.into());
                    }
                },
                _ = ticker.tick() => {}
            }

            match state.interruption() {
                Some(Interruption::Cancelled) => {
                    kill(&mut child).await;
                    return Err(TransferError::Cancelled);
                }
                Some(Interruption::Paused) => {
                    kill(&mut child).await;
                    return Ok(ExecutionOutcome::Paused);
                }
                None => {}
            }

            if tokio::time::Instant::now() >= deadline {
                kill(&mut child).await;
                return Err(TransferError::failed(format!(
                    "operation exceeded its time limit of {}s",
                    settings.operation_timeout.as_secs()
                )));
            }

            if eof {
                break;
            }
        }

        if let Some(line) = reader.finish() {
            tracker.handle_line(&line, state, on_progress);
        }

        let status = child.wait().await?;
        if status.success() {
            Ok(ExecutionOutcome::Finished {
                total_objects: tracker.total_objects,
                resumed: false,
            })
        } else {
            Err(TransferError::Failed(tracker.last_error.unwrap_or_else(|| {
                format!("git clone exited with {status}")
            })))
        }
    }
}

impl TransferExecutor for GitCliExecutor {
    fn execute<'a>(
        &'a self,
        state: &'a OperationState,
        on_progress: &'a ProgressFn<'a>,
    ) -> BoxFuture<'a, Result<ExecutionOutcome, TransferError>> {
        Box::pin(self.run(state, on_progress))
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        debug!(error = %e, "failed to kill git");
    }
}

/// Splits stderr into lines on `\r` or `\n`.
#[derive(Default)]
struct LineReader {
    pending: Vec<u8>,
}

impl LineReader {
    fn push(&mut self, data: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &b in data {
            if b == b'\r' || b == b'\n' {
                if !self.pending.is_empty() {
                    lines.push(String::from_utf8_lossy(&self.pending).into_owned());
                    self.pending.clear();
                }
            } else {
                self.pending.push(b);
            }
        }
        lines
    }

    fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

#[derive(Default)]
struct ProgressState {
    last_percentage: f64,
    objects_received: u64,
    total_objects: u64,
    last_error: Option<String>,
}

impl ProgressState {
    fn handle_line(&mut self, line: &str, state: &OperationState, on_progress: &ProgressFn<'_>) {
        let Some(parsed) = parse_progress_line(line) else {
            let line = line.trim();
            if line.starts_with("fatal:") || line.starts_with("error:") {
                self.last_error = Some(line.to_string());
            }
            return;
        };
        trace!(operation = %state.id(), ?parsed, "git progress");

        if parsed.phase == GitPhase::Receiving {
            self.objects_received = parsed.current;
            self.total_objects = parsed.total;
            if let Some(bytes) = parsed.bytes {
                if parsed.current > 0 && parsed.total > 0 {
                    let estimate = bytes.saturating_mul(parsed.total) / parsed.current;
                    state.set_total_bytes(estimate.max(bytes));
                }
                state.record_bytes(bytes);
            }
        }

        // Keep the overall figure monotonic within the attempt.
        let percentage = parsed.overall_percentage().max(self.last_percentage);
        self.last_percentage = percentage;

        let mut progress: Progress = state
            .progress(parsed.stage(), percentage, line.trim())
            .with_objects(self.objects_received, self.total_objects);
        if let Some(rate) = parsed.rate {
            progress.speed = rate;
        }
        on_progress(progress);
    }
}
