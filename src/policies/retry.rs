//! Bounded retry with exponential backoff (the safe-execute wrapper).
//!
//! [`RetryPolicy`] composes around an async operation instead of living
//! inside it: the caller hands over a closure producing one attempt, and
//! the policy drives attempts, backoff sleeps, cancellation checks,
//! per-attempt diagnostics, and severity-based propagation.
//!
//! ## Flow
//! ```text
//! loop attempt = 1..=max_retries {
//!   ├─► cancel checked (returns Canceled promptly)
//!   ├─► op(attempt) — elapsed + memory recorded in Diagnostics
//!   │      ├─ Ok  ──► return value
//!   │      └─ Err ──► retryable and attempts left?
//!   │            ├─ yes ─► publish UploadRetrying, sleep base × 2^(attempt-1)
//!   │            │         (capped, jittered, cancellable)
//!   │            └─ no  ─► break
//! }
//! ──► RetryExhausted carrying the last error
//! ```
//!
//! ## Severity
//! [`RetryPolicy::execute_or`] implements graceful degradation: after
//! exhaustion it returns the configured default unless the operation ran at
//! [`Severity::Critical`], in which case the typed error surfaces to the
//! caller. Cancellation always surfaces regardless of severity.

use std::future::Future;
use std::time::{Duration, Instant};

use tokio::{select, time};
use tokio_util::sync::CancellationToken;

use crate::diagnostics::{attempt_record, Diagnostics};
use crate::error::{Severity, UploadError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::jitter::JitterPolicy;

/// Job/host identifiers stamped onto the events a retry loop publishes.
#[derive(Clone, Debug, Default)]
pub struct RetryScope {
    job: Option<std::sync::Arc<str>>,
    host: Option<std::sync::Arc<str>>,
}

impl RetryScope {
    /// Scope with neither job nor host attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches a job identifier.
    pub fn job(mut self, job: impl Into<std::sync::Arc<str>>) -> Self {
        self.job = Some(job.into());
        self
    }

    /// Attaches a host identifier.
    pub fn host(mut self, host: impl Into<std::sync::Arc<str>>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Stamps the scope's identifiers onto an event.
    pub fn stamp(&self, mut ev: Event) -> Event {
        if let Some(job) = &self.job {
            ev = ev.with_job(job.clone());
        }
        if let Some(host) = &self.host {
            ev = ev.with_host(host.clone());
        }
        ev
    }
}

/// Bounded retry policy with exponential backoff.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total number of attempts (not additional retries after the first).
    pub max_retries: u32,
    /// Delay before the second attempt; doubles each attempt after that.
    pub base: Duration,
    /// Cap applied to every computed delay.
    pub max_delay: Duration,
    /// Randomization applied to the capped delay.
    pub jitter: JitterPolicy,
}

impl Default for RetryPolicy {
    /// `max_retries = 3`, `base = 1s`, `max_delay = 60s`, no jitter.
    fn default() -> Self {
        Self {
            max_retries: 3,
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: JitterPolicy::None,
        }
    }
}

impl RetryPolicy {
    /// Computes the wait after the given attempt (1-based):
    /// `base × 2^(attempt-1)`, capped at `max_delay`, then jittered.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(u32::from(u16::MAX));
        let max_secs = self.max_delay.as_secs_f64();
        let raw = self.base.as_secs_f64() * 2f64.powi(exp as i32);
        let base = if !raw.is_finite() || raw < 0.0 || raw > max_secs {
            self.max_delay
        } else {
            Duration::from_secs_f64(raw)
        };

        match self.jitter {
            JitterPolicy::Decorrelated => self.jitter.apply_decorrelated(
                self.base.min(self.max_delay),
                base,
                self.max_delay,
            ),
            _ => self.jitter.apply(base),
        }
    }

    /// Runs `op` until it succeeds, retries are exhausted, a non-retryable
    /// error occurs, or `cancel` fires.
    ///
    /// Every attempt is recorded in `diag` with elapsed time, memory
    /// footprint, and classified error kind. Between failed attempts an
    /// [`EventKind::UploadRetrying`] event carrying the delay is published.
    ///
    /// Terminal failure is returned as [`UploadError::RetryExhausted`]
    /// wrapping the last underlying error; cancellation returns
    /// [`UploadError::Canceled`].
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        scope: &RetryScope,
        severity: Severity,
        cancel: &CancellationToken,
        diag: &Diagnostics,
        bus: &Bus,
        mut op: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        let attempts = self.max_retries.max(1);
        let mut last: Option<UploadError> = None;
        let mut made = 0u32;

        for attempt in 1..=attempts {
            if cancel.is_cancelled() {
                return Err(UploadError::Canceled);
            }

            made = attempt;
            let started = Instant::now();
            let res = op(attempt).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;

            match res {
                Ok(value) => {
                    diag.record(attempt_record(label, attempt, severity, None, elapsed_ms));
                    return Ok(value);
                }
                Err(err) => {
                    diag.record(attempt_record(
                        label,
                        attempt,
                        severity,
                        Some(err.as_label()),
                        elapsed_ms,
                    ));

                    if matches!(err, UploadError::Canceled) {
                        return Err(UploadError::Canceled);
                    }
                    if attempt >= attempts || !err.is_retryable() {
                        last = Some(err);
                        break;
                    }

                    let delay = self.delay_for(attempt);
                    bus.publish(
                        scope
                            .stamp(Event::now(EventKind::UploadRetrying))
                            .with_attempt(attempt)
                            .with_delay(delay)
                            .with_error(err.to_string()),
                    );
                    last = Some(err);

                    let sleep = time::sleep(delay);
                    tokio::pin!(sleep);
                    select! {
                        _ = &mut sleep => {}
                        _ = cancel.cancelled() => return Err(UploadError::Canceled),
                    }
                }
            }
        }

        let source = last.unwrap_or(UploadError::Canceled);
        Err(UploadError::RetryExhausted {
            attempts: made,
            source: Box::new(source),
        })
    }

    /// Like [`execute`](Self::execute), but absorbs terminal failure into
    /// `Ok(default)` unless the severity is [`Severity::Critical`].
    ///
    /// Cancellation is never absorbed.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_or<T, F, Fut>(
        &self,
        default: T,
        label: &str,
        scope: &RetryScope,
        severity: Severity,
        cancel: &CancellationToken,
        diag: &Diagnostics,
        bus: &Bus,
        op: F,
    ) -> Result<T, UploadError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, UploadError>>,
    {
        match self
            .execute(label, scope, severity, cancel, diag, bus, op)
            .await
        {
            Ok(value) => Ok(value),
            Err(UploadError::Canceled) => Err(UploadError::Canceled),
            Err(err) if severity == Severity::Critical => Err(err),
            Err(_) => Ok(default),
        }
    }
}
