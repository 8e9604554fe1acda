//! Failure-rate gate for a single host.
//!
//! ## States
//! ```text
//! Closed ──(failures reach threshold)──► Open
//! Open ──(cooldown elapsed, next caller)──► HalfOpen (one probe admitted)
//! HalfOpen ──(probe succeeds)──► Closed (failures reset)
//! HalfOpen ──(probe fails)────► Open (cooldown deadline extended)
//! ```
//!
//! ## Rules
//! - All transitions happen under one mutex: concurrent callers against an
//!   open breaker all fail fast with a consistent snapshot and no I/O.
//! - While a probe is in flight, every other caller is still rejected.
//! - Transition events are published on the bus as they happen.

use std::sync::Mutex;

use std::time::Duration;
use tokio::time::Instant;

use crate::error::UploadError;
use crate::events::{Bus, Event, EventKind};

/// Breaker state as observed by callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected immediately.
    Open,
    /// A single probe call is allowed through to test recovery.
    HalfOpen,
}

/// Thresholds governing one breaker.
#[derive(Clone, Copy, Debug)]
pub struct CircuitConfig {
    /// Consecutive failures that trip the breaker.
    pub failure_threshold: u32,
    /// How long calls are rejected before a probe is admitted.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    /// `failure_threshold = 3`, `cooldown = 5 minutes`.
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(300),
        }
    }
}

struct Inner {
    state: CircuitState,
    failures: u32,
    open_until: Option<Instant>,
    probe_in_flight: bool,
}

/// Per-host failure gate.
///
/// Owned by the [`CircuitRegistry`](crate::circuit::CircuitRegistry) for the
/// process's lifetime; created lazily on first reference to a host and never
/// explicitly destroyed (reset only by a successful call or elapsed
/// cooldown).
pub struct CircuitBreaker {
    host: std::sync::Arc<str>,
    cfg: CircuitConfig,
    bus: Bus,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Creates a closed breaker for the given host.
    pub fn new(host: impl Into<std::sync::Arc<str>>, cfg: CircuitConfig, bus: Bus) -> Self {
        Self {
            host: host.into(),
            cfg,
            bus,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                failures: 0,
                open_until: None,
                probe_in_flight: false,
            }),
        }
    }

    /// Host this breaker gates.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Current state snapshot.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).state
    }

    /// Consecutive-failure count snapshot.
    pub fn failures(&self) -> u32 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).failures
    }

    /// Asks the breaker to admit one call.
    ///
    /// Returns `Err(CircuitOpen)` without any side effect on the caller's
    /// retry budget when the breaker is open (or a probe is already in
    /// flight). An open breaker whose cooldown has elapsed transitions to
    /// half-open here and admits the calling thread as the probe.
    pub fn try_acquire(&self) -> Result<(), UploadError> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let elapsed = inner
                    .open_until
                    .map(|deadline| Instant::now() >= deadline)
                    .unwrap_or(true);
                if !elapsed {
                    return Err(self.rejected());
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_in_flight = true;
                self.bus
                    .publish(Event::now(EventKind::CircuitHalfOpen).with_host(self.host.clone()));
                Ok(())
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    return Err(self.rejected());
                }
                inner.probe_in_flight = true;
                Ok(())
            }
        }
    }

    /// Records a successful call: failures reset, breaker closes.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let was = inner.state;
        inner.state = CircuitState::Closed;
        inner.failures = 0;
        inner.open_until = None;
        inner.probe_in_flight = false;
        if was != CircuitState::Closed {
            self.bus
                .publish(Event::now(EventKind::CircuitClosed).with_host(self.host.clone()));
        }
    }

    /// Records a failed call.
    ///
    /// A failed probe reopens the breaker and extends the cooldown; reaching
    /// the threshold while closed trips it.
    pub fn record_failure(&self, summary: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.failures = inner.failures.saturating_add(1);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.open_until = Some(Instant::now() + self.cfg.cooldown);
                inner.probe_in_flight = false;
                self.publish_opened(summary);
            }
            CircuitState::Closed => {
                if inner.failures >= self.cfg.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.open_until = Some(Instant::now() + self.cfg.cooldown);
                    self.publish_opened(summary);
                }
            }
            CircuitState::Open => {
                // Late failure report from an in-flight call; keep rejecting.
                inner.open_until = Some(Instant::now() + self.cfg.cooldown);
            }
        }
    }

    /// Releases an admitted call that ended with no verdict (cancelled
    /// between attempts, or abandoned mid-flight at shutdown).
    ///
    /// An abandoned half-open probe returns the breaker to `Open` without
    /// touching the deadline: the cooldown that admitted it has already
    /// elapsed, so the next caller is admitted as a fresh probe instead of
    /// the slot staying claimed forever.
    pub fn record_cancelled(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Open;
            inner.probe_in_flight = false;
        }
    }

    fn rejected(&self) -> UploadError {
        UploadError::CircuitOpen {
            host: self.host.to_string(),
        }
    }

    fn publish_opened(&self, summary: &str) {
        self.bus.publish(
            Event::now(EventKind::CircuitOpened)
                .with_host(self.host.clone())
                .with_error(summary.to_string()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time;

    fn breaker(cooldown: Duration) -> CircuitBreaker {
        CircuitBreaker::new(
            "rapidgator",
            CircuitConfig {
                failure_threshold: 3,
                cooldown,
            },
            Bus::new(64),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn opens_after_threshold_and_rejects_without_io() {
        let cb = breaker(Duration::from_secs(300));
        for _ in 0..3 {
            assert!(cb.try_acquire().is_ok());
            cb.record_failure("503");
        }
        assert_eq!(cb.state(), CircuitState::Open);

        // Every caller inside the cooldown window fails fast.
        for _ in 0..5 {
            assert!(matches!(
                cb.try_acquire(),
                Err(UploadError::CircuitOpen { .. })
            ));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_single_probe_after_cooldown() {
        let cb = breaker(Duration::from_secs(300));
        for _ in 0..3 {
            cb.record_failure("timeout");
        }
        assert_eq!(cb.state(), CircuitState::Open);

        time::advance(Duration::from_secs(301)).await;
        assert!(cb.try_acquire().is_ok());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        // Concurrent callers are rejected while the probe is in flight.
        assert!(cb.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_success_closes_and_resets() {
        let cb = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            cb.record_failure("reset");
        }
        time::advance(Duration::from_secs(61)).await;
        cb.try_acquire().unwrap();
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.failures(), 0);
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn probe_failure_reopens_and_extends_deadline() {
        let cb = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            cb.record_failure("reset");
        }
        time::advance(Duration::from_secs(61)).await;
        cb.try_acquire().unwrap();
        cb.record_failure("still down");
        assert_eq!(cb.state(), CircuitState::Open);

        // Half the new cooldown: still rejecting.
        time::advance(Duration::from_secs(30)).await;
        assert!(cb.try_acquire().is_err());
        // Full cooldown from the probe failure: probe admitted again.
        time::advance(Duration::from_secs(31)).await;
        assert!(cb.try_acquire().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn abandoned_probe_releases_the_half_open_slot() {
        let cb = breaker(Duration::from_secs(60));
        for _ in 0..3 {
            cb.record_failure("reset");
        }
        time::advance(Duration::from_secs(61)).await;
        cb.try_acquire().unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // The probe is cancelled before it reports either way.
        cb.record_cancelled();
        assert_eq!(cb.state(), CircuitState::Open);

        // The cooldown already elapsed, so the next caller becomes the
        // probe instead of being rejected forever.
        assert!(cb.try_acquire().is_ok());
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn transition_events_are_published() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let cb = CircuitBreaker::new("katfile", CircuitConfig::default(), bus);
        for _ in 0..3 {
            cb.record_failure("503");
        }
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::CircuitOpened);
        assert_eq!(ev.host.as_deref(), Some("katfile"));
    }
}
