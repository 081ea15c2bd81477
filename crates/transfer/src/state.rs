use std::sync::RwLock;
use std::time::{Duration, Instant};

use repoferry_protocol::{CloneSettings, CloneStage, Progress, ResumeData};

use crate::SpeedCalculator;

/// Why an executor must stop at its next step boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interruption {
    Paused,
    Cancelled,
}

/// In-memory record of one clone operation (thread-safe).
///
/// Shared between the coordinator's control methods and the executor running
/// the current attempt. All mutations go through the inner lock, so flag
/// transitions for one operation are serialized.
pub struct OperationState {
    inner: RwLock<StateInner>,
    speed: SpeedCalculator,
}

struct StateInner {
    id: String,
    settings: CloneSettings,
    start_time: Instant,
    last_progress_time: Instant,
    total_bytes: u64,
    downloaded_bytes: u64,
    retry_count: u32,
    paused: bool,
    cancelled: bool,
    resume_data: Option<ResumeData>,
}

impl OperationState {
    /// Creates the state for a freshly registered operation.
    pub fn new(id: String, settings: CloneSettings) -> Self {
        let now = Instant::now();
        Self {
            inner: RwLock::new(StateInner {
                id,
                settings,
                start_time: now,
                last_progress_time: now,
                total_bytes: 0,
                downloaded_bytes: 0,
                retry_count: 0,
                paused: false,
                cancelled: false,
                resume_data: None,
            }),
            speed: SpeedCalculator::default(),
        }
    }

    /// Seeds the byte counters from a stored checkpoint.
    pub fn seed(&self, data: ResumeData) {
        let mut s = self.inner.write().unwrap();
        s.total_bytes = data.total_bytes;
        s.downloaded_bytes = if data.total_bytes > 0 {
            data.downloaded_bytes.min(data.total_bytes)
        } else {
            data.downloaded_bytes
        };
        s.resume_data = Some(data);
    }

    pub fn id(&self) -> String {
        self.inner.read().unwrap().id.clone()
    }

    pub fn settings(&self) -> CloneSettings {
        self.inner.read().unwrap().settings.clone()
    }

    pub fn url(&self) -> String {
        self.inner.read().unwrap().settings.url.clone()
    }

    pub fn destination(&self) -> String {
        self.inner.read().unwrap().settings.destination.clone()
    }

    pub fn start_time(&self) -> Instant {
        self.inner.read().unwrap().start_time
    }

    /// Time since the operation was registered.
    pub fn elapsed(&self) -> Duration {
        self.start_time().elapsed()
    }

    pub fn last_progress_time(&self) -> Instant {
        self.inner.read().unwrap().last_progress_time
    }

    /// Marks that progress was just observed.
    pub fn touch(&self) {
        self.inner.write().unwrap().last_progress_time = Instant::now();
    }

    pub fn total_bytes(&self) -> u64 {
        self.inner.read().unwrap().total_bytes
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.inner.read().unwrap().downloaded_bytes
    }

    /// Sets the total size once discovered. Never shrinks below what was
    /// already downloaded.
    pub fn set_total_bytes(&self, total: u64) {
        let mut s = self.inner.write().unwrap();
        s.total_bytes = total.max(s.downloaded_bytes);
    }

    /// Records the absolute number of bytes downloaded so far.
    ///
    /// Counters only move forward; the delta feeds the speed window.
    pub fn record_bytes(&self, downloaded: u64) {
        let delta = {
            let mut s = self.inner.write().unwrap();
            let capped = if s.total_bytes > 0 {
                downloaded.min(s.total_bytes)
            } else {
                downloaded
            };
            let delta = capped.saturating_sub(s.downloaded_bytes);
            s.downloaded_bytes = s.downloaded_bytes.max(capped);
            s.last_progress_time = Instant::now();
            delta
        };
        self.speed.add_sample(delta);
    }

    /// Completed fraction as a percentage (0 while the total is unknown).
    pub fn percentage(&self) -> f64 {
        let s = self.inner.read().unwrap();
        if s.total_bytes == 0 {
            return 0.0;
        }
        (s.downloaded_bytes as f64 / s.total_bytes as f64 * 100.0).min(100.0)
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.read().unwrap().retry_count
    }

    pub fn set_retry_count(&self, count: u32) {
        self.inner.write().unwrap().retry_count = count;
    }

    pub fn resume_data(&self) -> Option<ResumeData> {
        self.inner.read().unwrap().resume_data
    }

    pub fn is_paused(&self) -> bool {
        self.inner.read().unwrap().paused
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.read().unwrap().cancelled
    }

    /// Sets the paused flag. Returns `false` if already paused or cancelled.
    pub fn pause(&self) -> bool {
        let mut s = self.inner.write().unwrap();
        if s.paused || s.cancelled {
            return false;
        }
        s.paused = true;
        true
    }

    /// Clears the paused flag. Returns `true` only if it was set, so exactly
    /// one caller wins the right to relaunch the executor.
    pub fn resume(&self) -> bool {
        let mut s = self.inner.write().unwrap();
        if !s.paused || s.cancelled {
            return false;
        }
        s.paused = false;
        s.last_progress_time = Instant::now();
        self.speed.reset();
        true
    }

    /// Sets the cancelled flag. Returns `false` if it was already set.
    pub fn cancel(&self) -> bool {
        let mut s = self.inner.write().unwrap();
        if s.cancelled {
            return false;
        }
        s.cancelled = true;
        true
    }

    /// Returns the pending interruption, cancellation first.
    pub fn interruption(&self) -> Option<Interruption> {
        let s = self.inner.read().unwrap();
        if s.cancelled {
            Some(Interruption::Cancelled)
        } else if s.paused {
            Some(Interruption::Paused)
        } else {
            None
        }
    }

    /// Current throughput in bytes/second.
    pub fn speed(&self) -> f64 {
        self.speed.bytes_per_second()
    }

    /// Builds a progress value carrying the current counters and rate.
    pub fn progress(&self, stage: CloneStage, percentage: f64, message: &str) -> Progress {
        let (downloaded, total) = {
            let s = self.inner.read().unwrap();
            (s.downloaded_bytes, s.total_bytes)
        };
        let speed = self.speed.bytes_per_second();
        let eta = self
            .speed
            .eta(total.saturating_sub(downloaded))
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Progress::new(stage, percentage, message)
            .with_bytes(downloaded, total)
            .with_rate(speed, eta)
    }
}
