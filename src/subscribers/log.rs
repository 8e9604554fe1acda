use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Built-in subscriber that mirrors engine events onto `tracing`.
///
/// Useful as the default observability sink when no richer display
/// collaborator is attached.
pub struct LogSubscriber;

#[async_trait]
impl Subscribe for LogSubscriber {
    async fn on_event(&self, e: &Event) {
        let job = e.job.as_deref().unwrap_or("-");
        let host = e.host.as_deref().unwrap_or("-");
        match e.kind {
            EventKind::UploadStarting => {
                debug!(job, host, attempt = e.attempt, "upload starting");
            }
            EventKind::UploadRetrying => {
                info!(
                    job,
                    host,
                    attempt = e.attempt,
                    delay_ms = e.delay_ms,
                    error = e.error.as_deref(),
                    "retrying upload"
                );
            }
            EventKind::UploadSucceeded => {
                info!(job, host, link = e.link.as_deref(), "upload succeeded");
            }
            EventKind::UploadFailed => {
                warn!(job, host, error = e.error.as_deref(), "upload failed");
            }
            EventKind::CircuitRejected => {
                warn!(job, host, "upload rejected: circuit open");
            }
            EventKind::CircuitOpened => {
                warn!(host, error = e.error.as_deref(), "circuit opened");
            }
            EventKind::CircuitHalfOpen => {
                info!(host, "circuit half-open, probing");
            }
            EventKind::CircuitClosed => {
                info!(host, "circuit closed");
            }
            EventKind::JobQueued => {
                info!(job, "job queued");
            }
            EventKind::JobStarted => {
                info!(job, "job started");
            }
            EventKind::JobCompleted => {
                info!(job, "job completed");
            }
            EventKind::JobFailed => {
                warn!(job, error = e.error.as_deref(), "job failed");
            }
            EventKind::BatchCompleted => {
                info!(job, "batch completed");
            }
            EventKind::BatchCancelled => {
                info!(job, "batch cancelled");
            }
            EventKind::BatchPaused => {
                info!(job, "batch paused");
            }
            EventKind::BatchResumed => {
                info!(job, "batch resumed");
            }
            EventKind::GuardStalled => {
                warn!(detail = e.error.as_deref(), "guarded resource stalled");
            }
            EventKind::ProcessKilled => {
                warn!(detail = e.error.as_deref(), "subprocess killed");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
