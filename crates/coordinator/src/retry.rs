//! Retry classification and exponential backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Substrings (matched case-insensitively) that mark an error as transient.
const RETRYABLE_PATTERNS: &[&str] = &[
    "network",
    "timeout",
    "connection",
    "temporary",
    "503",
    "502",
    "504",
];

/// Backoff configuration shared by every operation.
///
/// Holds no per-operation state, so one policy is safe to share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Delay before the second attempt.
    pub base_delay_ms: u64,
    /// Maximum delay between attempts (backoff cap).
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// Returns `true` if an error message describes a transient failure.
    ///
    /// Anything not matching a known transient pattern (authentication,
    /// not-found, invalid input, cancellation) is permanent.
    pub fn is_retryable(message: &str) -> bool {
        let message = message.to_lowercase();
        RETRYABLE_PATTERNS.iter().any(|p| message.contains(p))
    }

    /// Delay after the failed attempt number `attempt` (0-based):
    /// `min(base * 2^attempt, max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let ms = self.base_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(ms)
    }
}
