use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::circuit::CircuitBreaker;
use crate::diagnostics::Diagnostics;
use crate::error::{Severity, UploadError};
use crate::events::{Bus, Event, EventKind};
use crate::hosts::adapter::HostRef;
use crate::policies::{RetryPolicy, RetryScope};

/// Lifecycle of one (file, host) upload as persisted and displayed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostState {
    Queued,
    Uploading,
    Retrying,
    Succeeded,
    Failed,
    /// Rejected without an attempt because the host's breaker was open.
    CircuitOpen,
}

impl HostState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::CircuitOpen)
    }
}

/// Result of uploading to one host, possibly aggregated over several files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostOutcome {
    pub state: HostState,
    /// Public links, one per successfully uploaded file.
    pub links: Vec<String>,
    pub error: Option<String>,
    pub attempts: u32,
}

impl HostOutcome {
    fn new(state: HostState) -> Self {
        Self {
            state,
            links: Vec::new(),
            error: None,
            attempts: 0,
        }
    }

    /// Folds another per-file outcome for the same host into this one.
    ///
    /// Links accumulate, attempts add up, and the state degrades to the
    /// worst observed: any `Failed` dominates, then `CircuitOpen`, then
    /// `Succeeded`.
    pub fn merge(&mut self, other: HostOutcome) {
        self.links.extend(other.links);
        self.attempts = self.attempts.saturating_add(other.attempts);
        if other.error.is_some() {
            self.error = other.error;
        }
        if Self::severity_rank(other.state) > Self::severity_rank(self.state) {
            self.state = other.state;
        }
    }

    /// Replaces this outcome with the result of a newer run of the same
    /// host, keeping links and attempt counts accumulated across runs.
    /// Unlike [`merge`](Self::merge), the newer state always wins: a host
    /// that failed last time and succeeded now is succeeded.
    pub fn supersede(&mut self, newer: HostOutcome) {
        self.links.extend(newer.links);
        self.attempts = self.attempts.saturating_add(newer.attempts);
        self.state = newer.state;
        self.error = newer.error;
    }

    fn severity_rank(state: HostState) -> u8 {
        match state {
            HostState::Succeeded => 0,
            HostState::Queued => 1,
            HostState::Uploading => 2,
            HostState::Retrying => 3,
            HostState::CircuitOpen => 4,
            HostState::Failed => 5,
        }
    }
}

/// One unit of work: upload one file to one host.
///
/// The task consults the host's circuit breaker before spending any retry
/// budget, then drives the adapter under the engine's [`RetryPolicy`].
/// It never returns an error: every failure mode collapses into a
/// terminal [`HostOutcome`] so a single bad host cannot take down the
/// batch it belongs to.
pub struct HostUploadTask {
    pub job_id: Arc<str>,
    pub file: PathBuf,
    pub adapter: HostRef,
    pub breaker: Arc<CircuitBreaker>,
    pub retry: RetryPolicy,
    pub bus: Bus,
    pub diag: Arc<Diagnostics>,
}

impl HostUploadTask {
    /// Runs the upload to completion.
    ///
    /// `batch` is the batch-level token: it is honored between attempts
    /// only, so an in-flight transfer finishes its current attempt.
    /// `runtime` is the engine shutdown token: the adapter receives a
    /// child of it and is expected to abort promptly when it fires.
    pub async fn run(self, batch: &CancellationToken, runtime: &CancellationToken) -> HostOutcome {
        let host: Arc<str> = Arc::from(self.adapter.host());

        if let Err(err) = self.breaker.try_acquire() {
            debug!(host = %host, job = %self.job_id, "circuit open, upload rejected");
            self.bus.publish(
                Event::now(EventKind::CircuitRejected)
                    .with_job(self.job_id.clone())
                    .with_host(host.clone())
                    .with_error(err.to_string()),
            );
            let mut outcome = HostOutcome::new(HostState::CircuitOpen);
            outcome.error = Some(err.to_string());
            return outcome;
        }

        let label = format!("upload/{host}");
        let scope = RetryScope::new().job(self.job_id.clone()).host(host.clone());
        let attempts = AtomicU32::new(0);

        let res = self
            .retry
            .execute(
                &label,
                &scope,
                Severity::High,
                batch,
                &self.diag,
                &self.bus,
                |attempt| {
                    attempts.store(attempt, Ordering::SeqCst);
                    self.bus.publish(
                        Event::now(EventKind::UploadStarting)
                            .with_job(self.job_id.clone())
                            .with_host(host.clone())
                            .with_attempt(attempt),
                    );
                    self.adapter.upload(&self.file, runtime.child_token())
                },
            )
            .await;
        let made = attempts.load(Ordering::SeqCst);

        match res {
            Ok(link) => {
                self.breaker.record_success();
                info!(host = %host, job = %self.job_id, url = %link.url, "upload succeeded");
                self.bus.publish(
                    Event::now(EventKind::UploadSucceeded)
                        .with_job(self.job_id.clone())
                        .with_host(host.clone())
                        .with_attempt(made)
                        .with_link(link.url.clone()),
                );
                let mut outcome = HostOutcome::new(HostState::Succeeded);
                outcome.links.push(link.url);
                outcome.attempts = made;
                outcome
            }
            Err(err) => {
                let summary = err.root_cause().to_string();
                if matches!(err, UploadError::Canceled) {
                    // No verdict on the host; a claimed half-open probe
                    // slot must be handed back or the breaker wedges.
                    self.breaker.record_cancelled();
                } else {
                    self.breaker.record_failure(&summary);
                }
                warn!(host = %host, job = %self.job_id, error = %summary, "upload failed");
                self.bus.publish(
                    Event::now(EventKind::UploadFailed)
                        .with_job(self.job_id.clone())
                        .with_host(host.clone())
                        .with_attempt(made)
                        .with_error(summary.clone()),
                );
                let mut outcome = HostOutcome::new(HostState::Failed);
                outcome.error = Some(summary);
                outcome.attempts = made;
                outcome
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit::CircuitConfig;
    use crate::hosts::adapter::{HostAdapter, RemoteLink};
    use crate::policies::JitterPolicy;
    use async_trait::async_trait;
    use std::path::Path;
    use std::time::Duration;

    struct ScriptedHost {
        name: &'static str,
        failures_before_success: AtomicU32,
    }

    #[async_trait]
    impl HostAdapter for ScriptedHost {
        fn host(&self) -> &str {
            self.name
        }

        async fn upload(
            &self,
            file: &Path,
            _ctx: CancellationToken,
        ) -> Result<RemoteLink, UploadError> {
            let remaining = self.failures_before_success.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures_before_success.store(remaining - 1, Ordering::SeqCst);
                return Err(UploadError::Transport {
                    host: self.name.into(),
                    message: "connection reset".into(),
                });
            }
            Ok(RemoteLink::new(format!(
                "https://{}/f/{}",
                self.name,
                file.file_name().and_then(|n| n.to_str()).unwrap_or("x")
            )))
        }
    }

    fn task(adapter: HostRef, breaker: Arc<CircuitBreaker>, bus: Bus) -> HostUploadTask {
        HostUploadTask {
            job_id: Arc::from("job-1"),
            file: PathBuf::from("video.mp4"),
            adapter,
            breaker,
            retry: RetryPolicy {
                max_retries: 3,
                base: Duration::from_millis(10),
                max_delay: Duration::from_secs(1),
                jitter: JitterPolicy::None,
            },
            bus,
            diag: Arc::new(Diagnostics::new()),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_after_transient_failures() {
        let bus = Bus::new(64);
        let breaker = Arc::new(CircuitBreaker::new(
            "ddownload",
            CircuitConfig::default(),
            bus.clone(),
        ));
        let adapter: HostRef = Arc::new(ScriptedHost {
            name: "ddownload",
            failures_before_success: AtomicU32::new(2),
        });

        let outcome = task(adapter, breaker.clone(), bus)
            .run(&CancellationToken::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, HostState::Succeeded);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.links, vec!["https://ddownload/f/video.mp4"]);
        assert_eq!(breaker.failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_records_one_breaker_failure() {
        let bus = Bus::new(64);
        let breaker = Arc::new(CircuitBreaker::new(
            "katfile",
            CircuitConfig::default(),
            bus.clone(),
        ));
        let adapter: HostRef = Arc::new(ScriptedHost {
            name: "katfile",
            failures_before_success: AtomicU32::new(99),
        });

        let outcome = task(adapter, breaker.clone(), bus)
            .run(&CancellationToken::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, HostState::Failed);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.error.as_deref().unwrap_or("").contains("reset"));
        // One exhausted upload counts as a single failure toward the trip
        // threshold, not one per attempt.
        assert_eq!(breaker.failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breaker_rejects_without_spending_attempts() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let breaker = Arc::new(CircuitBreaker::new(
            "rapidgator",
            CircuitConfig::default(),
            bus.clone(),
        ));
        for _ in 0..3 {
            breaker.record_failure("503");
        }

        let adapter: HostRef = Arc::new(ScriptedHost {
            name: "rapidgator",
            failures_before_success: AtomicU32::new(0),
        });
        let outcome = task(adapter, breaker, bus)
            .run(&CancellationToken::new(), &CancellationToken::new())
            .await;

        assert_eq!(outcome.state, HostState::CircuitOpen);
        assert_eq!(outcome.attempts, 0);

        // CircuitOpened from the trip, then the rejection for this task.
        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, EventKind::CircuitOpened);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, EventKind::CircuitRejected);
        assert_eq!(second.job.as_deref(), Some("job-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_probe_does_not_wedge_the_breaker() {
        let bus = Bus::new(64);
        let breaker = Arc::new(CircuitBreaker::new(
            "nitroflare",
            CircuitConfig::default(),
            bus.clone(),
        ));
        for _ in 0..3 {
            breaker.record_failure("503");
        }
        tokio::time::advance(Duration::from_secs(301)).await;

        // The probe task is admitted, but its batch is already cancelled.
        let cancelled = CancellationToken::new();
        cancelled.cancel();
        let adapter: HostRef = Arc::new(ScriptedHost {
            name: "nitroflare",
            failures_before_success: AtomicU32::new(0),
        });
        let outcome = task(adapter.clone(), breaker.clone(), bus.clone())
            .run(&cancelled, &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, HostState::Failed);
        assert_eq!(outcome.attempts, 0);

        // Long after, a healthy upload must still get through.
        tokio::time::advance(Duration::from_secs(86_400)).await;
        let outcome = task(adapter, breaker.clone(), bus)
            .run(&CancellationToken::new(), &CancellationToken::new())
            .await;
        assert_eq!(outcome.state, HostState::Succeeded);
        assert_eq!(breaker.failures(), 0);
    }

    #[test]
    fn merge_keeps_worst_state_and_all_links() {
        let mut a = HostOutcome {
            state: HostState::Succeeded,
            links: vec!["https://h/a".into()],
            error: None,
            attempts: 1,
        };
        a.merge(HostOutcome {
            state: HostState::Failed,
            links: vec![],
            error: Some("reset".into()),
            attempts: 3,
        });
        assert_eq!(a.state, HostState::Failed);
        assert_eq!(a.links.len(), 1);
        assert_eq!(a.attempts, 4);
        assert_eq!(a.error.as_deref(), Some("reset"));
    }
}
