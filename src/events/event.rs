//! Progress and lifecycle events emitted by the upload engine.
//!
//! [`EventKind`] classifies events across four areas: host-upload attempts,
//! circuit-breaker transitions, job lifecycle, and batch control. The
//! [`Event`] struct carries the metadata the display collaborator needs:
//! job id, host id, attempt number, backoff delay, error summary, remote
//! link.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Consumers that receive events out of order can restore
//! the exact order by `seq`.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of engine events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Host upload attempts ===
    /// An upload attempt is starting.
    ///
    /// Sets: `job`, `host`, `attempt`.
    UploadStarting,

    /// An attempt failed and a retry was scheduled.
    ///
    /// Sets: `job`, `host`, `attempt`, `delay_ms`, `error`.
    UploadRetrying,

    /// Upload reached a remote link.
    ///
    /// Sets: `job`, `host`, `attempt`, `link`.
    UploadSucceeded,

    /// Upload failed terminally (retries exhausted or non-retryable error).
    ///
    /// Sets: `job`, `host`, `attempt`, `error`.
    UploadFailed,

    /// The host's breaker rejected the call before any I/O.
    ///
    /// Sets: `job`, `host`.
    CircuitRejected,

    // === Circuit transitions ===
    /// Consecutive failures reached the threshold; host calls now fail fast.
    ///
    /// Sets: `host`, `error` (last failure).
    CircuitOpened,

    /// Cooldown elapsed; a single probe call is allowed through.
    ///
    /// Sets: `host`.
    CircuitHalfOpen,

    /// Probe succeeded; the host is accepting calls again.
    ///
    /// Sets: `host`.
    CircuitClosed,

    // === Job lifecycle ===
    /// Job entered the durable queue.
    ///
    /// Sets: `job`.
    JobQueued,

    /// Job was pulled from the queue and its batch dispatched.
    ///
    /// Sets: `job`.
    JobStarted,

    /// Job reached a terminal state with at least one host succeeding.
    ///
    /// Sets: `job`.
    JobCompleted,

    /// Job reached a terminal state with no host succeeding, or a critical
    /// failure occurred while processing it.
    ///
    /// Sets: `job`, `error`.
    JobFailed,

    // === Batch control ===
    /// Every dispatched task for the batch reached a terminal state.
    ///
    /// Sets: `job`.
    BatchCompleted,

    /// Batch was cancelled; in-flight attempts finish, nothing new starts.
    ///
    /// Sets: `job`.
    BatchCancelled,

    /// New dispatch from the batch's remaining queue is suspended.
    ///
    /// Sets: `job`.
    BatchPaused,

    /// Remaining work was re-enqueued after a pause.
    ///
    /// Sets: `job`.
    BatchResumed,

    // === Resource safety ===
    /// A guarded resource has been held past the stall threshold.
    ///
    /// Sets: `error` (resource name and hold time).
    GuardStalled,

    /// A subprocess had to be terminated (timeout or shutdown).
    ///
    /// Sets: `error` (program and reason).
    ProcessKilled,
}

/// Engine event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Job identifier, if applicable.
    pub job: Option<Arc<str>>,
    /// Host identifier, if applicable.
    pub host: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Backoff delay before the next attempt, in milliseconds.
    pub delay_ms: Option<u32>,
    /// Human-readable error summary.
    pub error: Option<Arc<str>>,
    /// Remote link recorded on success.
    pub link: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            job: None,
            host: None,
            attempt: None,
            delay_ms: None,
            error: None,
            link: None,
        }
    }

    /// Attaches a job identifier.
    #[inline]
    pub fn with_job(mut self, job: impl Into<Arc<str>>) -> Self {
        self.job = Some(job.into());
        self
    }

    /// Attaches a host identifier.
    #[inline]
    pub fn with_host(mut self, host: impl Into<Arc<str>>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a backoff delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    /// Attaches a human-readable error summary.
    #[inline]
    pub fn with_error(mut self, error: impl Into<Arc<str>>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attaches a remote link.
    #[inline]
    pub fn with_link(mut self, link: impl Into<Arc<str>>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// True for events that end a host task (success, failure, rejection).
    #[inline]
    pub fn is_terminal_for_host(&self) -> bool {
        matches!(
            self.kind,
            EventKind::UploadSucceeded | EventKind::UploadFailed | EventKind::CircuitRejected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_monotonic() {
        let a = Event::now(EventKind::JobQueued);
        let b = Event::now(EventKind::JobStarted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_set_fields() {
        let ev = Event::now(EventKind::UploadRetrying)
            .with_job("thread-91")
            .with_host("nitroflare")
            .with_attempt(2)
            .with_delay(Duration::from_secs(2))
            .with_error("503 service unavailable");
        assert_eq!(ev.job.as_deref(), Some("thread-91"));
        assert_eq!(ev.host.as_deref(), Some("nitroflare"));
        assert_eq!(ev.attempt, Some(2));
        assert_eq!(ev.delay_ms, Some(2000));
        assert!(!ev.is_terminal_for_host());
    }
}
