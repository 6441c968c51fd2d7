// src/monitor/schedule.rs

//! Per-repository scheduling state.
//!
//! Pure: no clocks, no IO. The scheduler asks [`RepoSchedule::next_delay`]
//! after every cycle and feeds the cycle's result back in.

use std::time::Duration;

use crate::errors::CardwatchError;

/// First backoff step after a rate limit or exhausted network retries.
pub const BACKOFF_BASE: Duration = Duration::from_secs(60);

/// Delay for the `attempt`-th consecutive failure (0-indexed):
/// `max(retry_after, BACKOFF_BASE × 2^attempt)`, capped at `cap`.
pub fn backoff_delay(attempt: u32, retry_after: Option<Duration>, cap: Duration) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
    let exponential = BACKOFF_BASE.checked_mul(factor).unwrap_or(Duration::MAX);
    let wanted = match retry_after {
        Some(hint) => exponential.max(hint),
        None => exponential,
    };
    wanted.min(cap)
}

/// How a finished cycle affects the repository's schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleEffect {
    /// Back to the regular interval.
    Reset,
    /// Wait this long before the next attempt.
    Backoff(Duration),
    /// Stop polling until the configuration is reloaded.
    Disabled(String),
    /// Keep the regular interval; the failure is not provider-related.
    Unchanged,
}

#[derive(Debug, Clone, Default)]
pub struct RepoSchedule {
    failures: u32,
    backoff: Option<Duration>,
    disabled: Option<String>,
}

impl RepoSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn current_backoff(&self) -> Option<Duration> {
        self.backoff
    }

    /// Reason the repository was disabled, if it was.
    pub fn disabled(&self) -> Option<&str> {
        self.disabled.as_deref()
    }

    pub fn record_success(&mut self) -> ScheduleEffect {
        self.failures = 0;
        self.backoff = None;
        ScheduleEffect::Reset
    }

    /// Fold a cycle error into the schedule.
    pub fn record_error(&mut self, err: &CardwatchError, cap: Duration) -> ScheduleEffect {
        match err {
            CardwatchError::NotFound(reason) => {
                self.backoff = None;
                self.disabled = Some(reason.clone());
                ScheduleEffect::Disabled(reason.clone())
            }
            CardwatchError::RateLimited { retry_after } => self.push_backoff(*retry_after, cap),
            CardwatchError::Network(_) => self.push_backoff(None, cap),
            _ => ScheduleEffect::Unchanged,
        }
    }

    fn push_backoff(&mut self, retry_after: Option<Duration>, cap: Duration) -> ScheduleEffect {
        let delay = backoff_delay(self.failures, retry_after, cap);
        self.failures = self.failures.saturating_add(1);
        self.backoff = Some(delay);
        ScheduleEffect::Backoff(delay)
    }

    /// How long to sleep before the next scheduled poll.
    ///
    /// `None` means the repository should not be polled again.
    pub fn next_delay(&self, interval: Duration) -> Option<Duration> {
        if self.disabled.is_some() {
            return None;
        }
        Some(self.backoff.unwrap_or(interval))
    }
}
