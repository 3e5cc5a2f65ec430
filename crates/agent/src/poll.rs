//! Bounded, cancellable polling of CA resources
//!
//! Every wait on the CA goes through [`poll_until`]. A poll is a loop of
//! steps: each step inspects the resource once and reports whether it
//! reached the wanted state. Between steps the loop sleeps on the injected
//! [`Clock`] with exponential backoff, and it gives up with
//! [`DriveError::Timeout`] once the attempt or time bound is reached.

use std::future::Future;
use std::time::Duration;

use mdacme_config::DriveSettings;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::clock::Clock;
use crate::error::DriveError;

/// Bounds of a poll loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay after the first unfinished step
    pub interval: Duration,
    /// Upper bound of the backoff delay
    pub max_interval: Duration,
    /// Maximum time spent polling
    pub timeout: Duration,
    /// Maximum number of steps
    pub max_attempts: u32,
}

impl PollPolicy {
    pub fn from_settings(settings: &DriveSettings) -> Self {
        Self {
            interval: settings.poll_interval(),
            max_interval: settings.poll_max_interval(),
            timeout: settings.poll_timeout(),
            max_attempts: settings.max_poll_attempts,
        }
    }

    /// Backoff delay after the given (1-based) attempt
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1).min(16));
        self.interval
            .saturating_mul(factor)
            .min(self.max_interval.max(self.interval))
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::from_settings(&DriveSettings::default())
    }
}

/// Outcome of one poll step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress<T> {
    Done(T),
    Pending,
}

/// Run `step` until it reports [`Progress::Done`], fails, or the policy bound is hit
///
/// `what` names the awaited resource in timeout errors and logs. Cancellation
/// is observed both while a step runs and while sleeping.
pub async fn poll_until<T, F, Fut>(
    what: &str,
    policy: &PollPolicy,
    clock: &dyn Clock,
    cancel: &CancellationToken,
    mut step: F,
) -> Result<T, DriveError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Progress<T>, DriveError>>,
{
    let started = clock.now();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(DriveError::Cancelled);
        }
        attempt += 1;

        let progress = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DriveError::Cancelled),
            result = step(attempt) => result?,
        };

        if let Progress::Done(value) = progress {
            trace!(what = %what, attempt, "Poll finished");
            return Ok(value);
        }

        let elapsed = (clock.now() - started).to_std().unwrap_or_default();
        if attempt >= policy.max_attempts || elapsed >= policy.timeout {
            return Err(DriveError::Timeout {
                what: what.to_string(),
                elapsed,
                attempts: attempt,
            });
        }

        let delay = policy.delay(attempt).min(policy.timeout - elapsed);
        trace!(
            what = %what,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Resource not ready, waiting"
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DriveError::Cancelled),
            _ = clock.sleep(delay) => {}
        }
    }
}
