use std::{future::Future, sync::Arc, time::Duration};

use anyhow::Result;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ports::{ApiError, ClockPort};

const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Ceiling for waits after errors that carry no HTTP status.
    pub transient_ceiling: Duration,
    pub backoff_factor: f64,
    /// Total calls allowed, the first one included. `None` is unbounded.
    pub max_attempts: Option<u32>,
    /// `None` is unbounded.
    pub max_elapsed: Option<Duration>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            transient_ceiling: Duration::from_secs(5),
            backoff_factor: 1.5,
            max_attempts: None,
            max_elapsed: Some(Duration::from_secs(3600)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryError {
    #[error("{operation}: cancelled")]
    Cancelled { operation: String },
    #[error("{operation}: gave up after {attempts} attempts in {elapsed:?}: {last_error}")]
    Exhausted {
        operation: String,
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    RateLimited,
    ServerError,
    Transient,
}

impl WaitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate limited",
            Self::ServerError => "server error",
            Self::Transient => "transient error",
        }
    }
}

/// Receives progress while the policy sleeps between attempts.
pub trait RetryObserver: Send + Sync {
    fn waiting(&self, operation: &str, reason: WaitReason, remaining_secs: u64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Wait { delay: Duration, reason: WaitReason },
    GiveUp,
}

/// Decides whether `err` deserves another attempt and how long to wait first.
pub fn classify(
    err: &anyhow::Error,
    backoff: Duration,
    settings: &RetrySettings,
    now: DateTime<Utc>,
) -> RetryDecision {
    let capped = backoff.min(settings.max_backoff);

    if let Some(api) = err.chain().find_map(|cause| cause.downcast_ref::<ApiError>()) {
        return match api {
            ApiError::Status {
                status: 429,
                retry_after,
                rate_limit_reset,
                ..
            } => {
                let delay = retry_after
                    .as_deref()
                    .and_then(|raw| parse_retry_after(raw, now))
                    .or_else(|| {
                        rate_limit_reset
                            .as_deref()
                            .and_then(|raw| reset_delay(raw, now))
                    })
                    .unwrap_or(capped);
                RetryDecision::Wait {
                    delay,
                    reason: WaitReason::RateLimited,
                }
            }
            ApiError::Status { status, .. } if (500..=599).contains(status) => {
                RetryDecision::Wait {
                    delay: capped,
                    reason: WaitReason::ServerError,
                }
            }
            ApiError::Status { .. } | ApiError::Payload { .. } => RetryDecision::GiveUp,
        };
    }

    if err
        .chain()
        .any(|cause| cause.downcast_ref::<RetryError>().is_some())
    {
        return RetryDecision::GiveUp;
    }

    let message = format!("{err:#}").to_lowercase();
    if message.contains("rate limit") || message.contains("403") {
        return RetryDecision::Wait {
            delay: capped,
            reason: WaitReason::RateLimited,
        };
    }

    RetryDecision::Wait {
        delay: (backoff / 2).min(settings.transient_ceiling),
        reason: WaitReason::Transient,
    }
}

/// Seconds or an HTTP date. Zero and past dates count as absent.
pub fn parse_retry_after(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return (seconds > 0).then(|| Duration::from_secs(seconds));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay = retry_at.signed_duration_since(now).to_std().ok()?;
    (!delay.is_zero()).then_some(delay)
}

/// Unix timestamp of the rate limit window reset; waits at least a second.
pub fn reset_delay(raw: &str, now: DateTime<Utc>) -> Option<Duration> {
    let reset_at = raw.trim().parse::<i64>().ok()?;
    let seconds = reset_at.saturating_sub(now.timestamp()).max(1);
    Some(Duration::from_secs(seconds as u64))
}

#[derive(Clone)]
pub struct RetryPolicy {
    settings: RetrySettings,
    clock: Arc<dyn ClockPort>,
    cancel: CancellationToken,
    observer: Option<Arc<dyn RetryObserver>>,
    tick_feedback: bool,
}

impl RetryPolicy {
    pub fn new(settings: RetrySettings, clock: Arc<dyn ClockPort>, cancel: CancellationToken) -> Self {
        Self {
            settings,
            clock,
            cancel,
            observer: None,
            tick_feedback: false,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn RetryObserver>, tick_feedback: bool) -> Self {
        self.observer = Some(observer);
        self.tick_feedback = tick_feedback;
        self
    }

    pub fn settings(&self) -> &RetrySettings {
        &self.settings
    }

    /// Runs `attempt` until it succeeds, fails for good, exhausts the
    /// configured bound, or the cycle is cancelled.
    pub async fn execute<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let started = Instant::now();
        let mut backoff = self.settings.initial_backoff;
        let mut attempts: u32 = 0;

        loop {
            if self.cancel.is_cancelled() {
                return Err(self.cancelled(operation));
            }
            attempts = attempts.saturating_add(1);

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(operation)),
                outcome = attempt() => outcome,
            };
            let err = match outcome {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            let (delay, reason) = match classify(&err, backoff, &self.settings, self.clock.now()) {
                RetryDecision::GiveUp => {
                    debug!(operation, attempts, error = %format!("{err:#}"), "not retrying");
                    return Err(err.context(operation.to_string()));
                }
                RetryDecision::Wait { delay, reason } => (delay, reason),
            };

            let elapsed = started.elapsed();
            let out_of_attempts = self
                .settings
                .max_attempts
                .is_some_and(|max| attempts >= max);
            let out_of_time = self
                .settings
                .max_elapsed
                .is_some_and(|max| elapsed.saturating_add(delay) > max);
            if out_of_attempts || out_of_time {
                return Err(RetryError::Exhausted {
                    operation: operation.to_string(),
                    attempts,
                    elapsed,
                    last_error: format!("{err:#}"),
                }
                .into());
            }

            warn!(
                operation,
                attempts,
                wait_ms = delay.as_millis() as u64,
                reason = reason.as_str(),
                error = %format!("{err:#}"),
                "retrying after wait"
            );
            self.wait(operation, reason, delay).await?;
            backoff = backoff
                .mul_f64(self.settings.backoff_factor)
                .min(self.settings.max_backoff);
        }
    }

    async fn wait(&self, operation: &str, reason: WaitReason, total: Duration) -> Result<()> {
        if let Some(observer) = &self.observer {
            observer.waiting(operation, reason, ceil_secs(total));
        }

        let mut remaining = total;
        while !remaining.is_zero() {
            let step = remaining.min(TICK);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(self.cancelled(operation)),
                _ = sleep(step) => {}
            }
            remaining = remaining.saturating_sub(step);
            if self.tick_feedback && !remaining.is_zero() {
                if let Some(observer) = &self.observer {
                    observer.waiting(operation, reason, ceil_secs(remaining));
                }
            }
        }
        Ok(())
    }

    fn cancelled(&self, operation: &str) -> anyhow::Error {
        RetryError::Cancelled {
            operation: operation.to_string(),
        }
        .into()
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    let whole = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        whole + 1
    } else {
        whole
    }
}

/// True when `err` came from a cancelled retry wait or attempt.
pub fn is_cancelled(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<RetryError>(),
            Some(RetryError::Cancelled { .. })
        )
    })
}
