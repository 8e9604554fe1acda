//! Scoped resource acquisition with guaranteed cleanup.
//!
//! Working directories, file locks, and subprocess handles must be released
//! on every exit path, including batch cancellation, without relying on
//! non-deterministic finalization. [`ResourceLedger::acquire`] binds a
//! cleanup action at entry and returns a [`ResourceGuard`] whose `Drop` runs
//! it exactly once — on normal return, on error, and when the owning future
//! is dropped mid-execution.
//!
//! A watchdog emits a [`GuardStalled`](crate::events::EventKind::GuardStalled)
//! warning when a resource is held past the stall threshold, so leaks are
//! observable before they become failures. Acquiring the same name twice on
//! one execution path is a programming error
//! ([`DoubleAcquisition`](crate::UploadError::DoubleAcquisition)); distinct
//! names nest freely.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;
use crate::events::{Bus, Event, EventKind};

/// Tracks which named resources are currently held.
///
/// One ledger is shared engine-wide; the held-set is what turns a double
/// acquisition into a typed error instead of a silent deadlock.
pub struct ResourceLedger {
    stall_threshold: Duration,
    bus: Bus,
    held: Mutex<HashSet<String>>,
}

impl ResourceLedger {
    /// Creates a ledger warning on `bus` after `stall_threshold`.
    pub fn new(stall_threshold: Duration, bus: Bus) -> Self {
        Self {
            stall_threshold,
            bus,
            held: Mutex::new(HashSet::new()),
        }
    }

    /// Acquires `name`, binding `cleanup` to run exactly once on release.
    ///
    /// Fails with [`UploadError::DoubleAcquisition`] if `name` is already
    /// held somewhere on the current execution path.
    pub fn acquire(
        self: &Arc<Self>,
        name: impl Into<String>,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> Result<ResourceGuard, UploadError> {
        let name = name.into();
        {
            let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
            if !held.insert(name.clone()) {
                return Err(UploadError::DoubleAcquisition { resource: name });
            }
        }

        let watchdog = CancellationToken::new();
        spawn_watchdog(
            name.clone(),
            self.stall_threshold,
            self.bus.clone(),
            watchdog.clone(),
        );

        Ok(ResourceGuard {
            ledger: Arc::clone(self),
            name,
            cleanup: Some(Box::new(cleanup)),
            watchdog,
            acquired_at: Instant::now(),
        })
    }

    /// Names currently held, for debugging.
    pub fn held(&self) -> Vec<String> {
        let held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = held.iter().cloned().collect();
        names.sort_unstable();
        names
    }

    fn release(&self, name: &str) {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }
}

/// Live handle to an acquired resource; releasing is dropping.
pub struct ResourceGuard {
    ledger: Arc<ResourceLedger>,
    name: String,
    cleanup: Option<Box<dyn FnOnce() + Send>>,
    watchdog: CancellationToken,
    acquired_at: Instant,
}

impl ResourceGuard {
    /// Name this guard holds.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How long the resource has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.watchdog.cancel();
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
        self.ledger.release(&self.name);
        tracing::debug!(resource = %self.name, held_for = ?self.acquired_at.elapsed(), "released");
    }
}

fn spawn_watchdog(name: String, threshold: Duration, bus: Bus, token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(threshold) => {
                tracing::warn!(resource = %name, ?threshold, "resource held past stall threshold");
                bus.publish(
                    Event::now(EventKind::GuardStalled)
                        .with_error(format!("{name} held past {threshold:?}")),
                );
            }
            _ = token.cancelled() => {}
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ledger() -> Arc<ResourceLedger> {
        Arc::new(ResourceLedger::new(Duration::from_secs(300), Bus::new(64)))
    }

    #[tokio::test]
    async fn cleanup_runs_exactly_once_on_normal_release() {
        let ledger = ledger();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let guard = ledger
            .acquire("workdir/thread-1", move || {
                c.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        drop(guard);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(ledger.held().is_empty());
    }

    #[tokio::test]
    async fn cleanup_runs_when_guarded_block_errors() {
        let ledger = ledger();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<(), UploadError> = async {
            let _guard = ledger.acquire("archive-lock", move || {
                c.fetch_add(1, Ordering::SeqCst);
            })?;
            Err(UploadError::Storage {
                message: "write failed".into(),
            })
        }
        .await;

        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cleanup_runs_when_task_is_cancelled_mid_execution() {
        let ledger = ledger();
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let l = ledger.clone();

        let handle = tokio::spawn(async move {
            let _guard = l
                .acquire("upload-slot", move || {
                    c.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            tokio::time::sleep(Duration::from_secs(600)).await;
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.abort();
        let _ = handle.await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(ledger.held().is_empty());
    }

    #[tokio::test]
    async fn double_acquisition_is_a_typed_error() {
        let ledger = ledger();
        let _guard = ledger.acquire("workdir/thread-2", || {}).unwrap();
        let err = ledger.acquire("workdir/thread-2", || {}).err().unwrap();
        assert!(matches!(err, UploadError::DoubleAcquisition { .. }));
        // A different name nests fine.
        let _other = ledger.acquire("workdir/thread-3", || {}).unwrap();
    }

    #[tokio::test]
    async fn name_is_reusable_after_release() {
        let ledger = ledger();
        drop(ledger.acquire("slot", || {}).unwrap());
        assert!(ledger.acquire("slot", || {}).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn stall_warning_is_emitted_but_not_fatal() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let ledger = Arc::new(ResourceLedger::new(Duration::from_millis(100), bus));

        let guard = ledger.acquire("slow-upload", || {}).unwrap();
        tokio::time::advance(Duration::from_millis(200)).await;

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::GuardStalled);
        // Guard still usable after the warning.
        assert_eq!(guard.name(), "slow-upload");
    }
}
