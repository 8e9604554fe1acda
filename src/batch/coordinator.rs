use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tokio::select;
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::batch::handle::{BatchHandle, BatchOutcome};
use crate::circuit::CircuitRegistry;
use crate::config::EngineConfig;
use crate::diagnostics::Diagnostics;
use crate::error::{Severity, UploadError};
use crate::events::{Bus, Event, EventKind};
use crate::guard::ResourceLedger;
use crate::hosts::{HostOutcome, HostRef, HostState, HostUploadTask};
use crate::policies::RetryScope;
use crate::process::SafeProcessRunner;
use crate::store::{Job, JobStatus, JobStore};
use crate::subscribers::{Subscribe, SubscriberSet};

struct BatchControl {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

/// Central dispatcher for upload batches.
///
/// One coordinator is built per process. It owns the shared worker-pool
/// semaphore (so the concurrency cap holds across every active batch, not
/// per batch), the per-host circuit registry, the durable job store, the
/// process runner for archiver steps, and the event bus everything
/// publishes on.
pub struct UploadBatchCoordinator {
    cfg: EngineConfig,
    bus: Bus,
    pool: Option<Arc<Semaphore>>,
    circuits: Arc<CircuitRegistry>,
    diag: Arc<Diagnostics>,
    store: Arc<JobStore>,
    adapters: HashMap<String, HostRef>,
    resources: Arc<ResourceLedger>,
    runner: Arc<SafeProcessRunner>,
    runtime: CancellationToken,
    batches: Mutex<HashMap<Arc<str>, BatchControl>>,
}

impl UploadBatchCoordinator {
    /// Builds a coordinator over the given store and host adapters.
    pub fn new(cfg: EngineConfig, store: Arc<JobStore>, adapters: Vec<HostRef>) -> Arc<Self> {
        let bus = Bus::new(cfg.bus_capacity);
        let adapters = adapters
            .into_iter()
            .map(|a| (a.host().to_string(), a))
            .collect();
        Arc::new(Self {
            cfg,
            pool: cfg.worker_limit().map(|n| Arc::new(Semaphore::new(n))),
            circuits: Arc::new(CircuitRegistry::new(cfg.circuit, bus.clone())),
            diag: Arc::new(Diagnostics::new()),
            adapters,
            resources: Arc::new(ResourceLedger::new(cfg.stall_threshold, bus.clone())),
            runner: Arc::new(SafeProcessRunner::new(cfg.process, bus.clone())),
            runtime: CancellationToken::new(),
            batches: Mutex::new(HashMap::new()),
            store,
            bus,
        })
    }

    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diag
    }

    pub fn circuits(&self) -> &CircuitRegistry {
        &self.circuits
    }

    pub fn resources(&self) -> &Arc<ResourceLedger> {
        &self.resources
    }

    pub fn process_runner(&self) -> &SafeProcessRunner {
        &self.runner
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Attaches display/automation subscribers: a forwarder task relays
    /// every bus event into their bounded queues until shutdown.
    pub fn attach_subscribers(&self, subs: Vec<Arc<dyn Subscribe>>) {
        let set = SubscriberSet::new(subs);
        let mut rx = self.bus.subscribe();
        let runtime = self.runtime.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    _ = runtime.cancelled() => break,
                    res = rx.recv() => match res {
                        Ok(ev) => set.emit(&ev),
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber forwarder lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            set.shutdown().await;
        });
    }

    /// Adds a job to the durable queue.
    pub fn enqueue(&self, job: Job) -> Result<(), UploadError> {
        let id = job.id.clone();
        self.store.enqueue(job)?;
        info!(job = %id, "job enqueued");
        self.bus.publish(Event::now(EventKind::JobQueued).with_job(id));
        Ok(())
    }

    /// Dispatches the given pending job as a batch.
    ///
    /// Hosts that already succeeded in a previous run of this job are
    /// skipped; the rest get one task per file, all drawing permits from
    /// the shared pool. The returned handle resolves when every dispatched
    /// task is terminal and the store has been updated.
    pub fn submit(self: &Arc<Self>, job_id: &str) -> Result<BatchHandle, UploadError> {
        let job = self.store.get(job_id).ok_or_else(|| UploadError::Storage {
            message: format!("job {job_id} not found"),
        })?;
        self.store.mark_processing(&job.id)?;

        let job_id: Arc<str> = Arc::from(job.id.as_str());
        self.bus
            .publish(Event::now(EventKind::JobStarted).with_job(job_id.clone()));

        let cancel = self.runtime.child_token();
        let (paused, paused_rx) = watch::channel(false);
        {
            let mut batches = self.batches.lock().unwrap_or_else(|e| e.into_inner());
            batches.insert(job_id.clone(), BatchControl { cancel: cancel.clone(), paused });
        }

        let (tx, rx) = oneshot::channel();
        let this = Arc::clone(self);
        let id = job_id.clone();
        tokio::spawn(async move {
            let _ = tx.send(this.drive(job, id, cancel, paused_rx).await);
        });

        Ok(BatchHandle { job_id, rx })
    }

    /// Requests cancellation of a running batch.
    ///
    /// In-flight attempts finish; nothing new is dispatched, queued tasks
    /// are abandoned. Returns `false` when no such batch is active.
    pub fn cancel(&self, job_id: &str) -> bool {
        let batches = self.batches.lock().unwrap_or_else(|e| e.into_inner());
        match batches.get(job_id) {
            Some(ctl) => {
                ctl.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Suspends new dispatch from a batch's remaining queue.
    pub fn pause(&self, job_id: &str) -> bool {
        self.set_paused(job_id, true, EventKind::BatchPaused)
    }

    /// Resumes dispatch after [`pause`](Self::pause).
    pub fn resume(&self, job_id: &str) -> bool {
        self.set_paused(job_id, false, EventKind::BatchResumed)
    }

    fn set_paused(&self, job_id: &str, value: bool, kind: EventKind) -> bool {
        let batches = self.batches.lock().unwrap_or_else(|e| e.into_inner());
        match batches.get(job_id) {
            Some(ctl) if *ctl.paused.borrow() != value => {
                let _ = ctl.paused.send(value);
                self.bus
                    .publish(Event::now(kind).with_job(job_id.to_string()));
                true
            }
            Some(_) => true,
            None => false,
        }
    }

    /// Drains the durable queue sequentially: one job at a time, each to a
    /// terminal state before the next starts. Used both for normal
    /// operation and for replay after a restart.
    pub async fn run_pending(self: &Arc<Self>) -> Result<(), UploadError> {
        while !self.runtime.is_cancelled() {
            let Some(job) = self.store.next_pending() else {
                break;
            };
            match self.submit(&job.id) {
                Ok(handle) => {
                    let _ = handle.wait().await;
                }
                // A job that cannot start must not halt the drain: mark it
                // failed best-effort and move on to the next pending one.
                Err(e) => {
                    warn!(job = %job.id, error = %e, "job could not start, marking failed");
                    let marked = self
                        .store
                        .complete(&job.id, JobStatus::Failed, BTreeMap::new());
                    if marked.is_err()
                        && self.store.get(&job.id).map(|j| j.status) == Some(JobStatus::Pending)
                    {
                        // The store accepts no writes at all; bail out
                        // rather than spin on the same job forever.
                        return Err(e);
                    }
                    self.bus.publish(
                        Event::now(EventKind::JobFailed)
                            .with_job(job.id.clone())
                            .with_error(e.to_string()),
                    );
                }
            }
        }
        Ok(())
    }

    /// Runs the archiver for a job under a resource guard, with retry.
    ///
    /// The guard removes a partial archive on every failure path; success
    /// requires exit code 0 **and** a non-empty file at `output`.
    pub async fn archive(
        self: &Arc<Self>,
        job_id: &str,
        program: &Path,
        args: &[&str],
        cwd: Option<&Path>,
        output: &Path,
    ) -> Result<PathBuf, UploadError> {
        let committed = Arc::new(AtomicBool::new(false));
        let partial = output.to_path_buf();
        let flag = committed.clone();
        let _guard = self.resources.acquire(format!("archive/{job_id}"), move || {
            if !flag.load(Ordering::SeqCst) && partial.exists() {
                if let Err(e) = std::fs::remove_file(&partial) {
                    warn!(path = %partial.display(), error = %e, "failed to remove partial archive");
                }
            }
        })?;

        let scope = RetryScope::new().job(job_id.to_string());
        self.cfg
            .retry
            .execute(
                "archive",
                &scope,
                Severity::High,
                &self.runtime,
                &self.diag,
                &self.bus,
                |_attempt| async move {
                    self.runner.execute(program, args, cwd).await?;
                    match std::fs::metadata(output) {
                        Ok(meta) if meta.len() > 0 => Ok(()),
                        _ => Err(UploadError::ArchiveOutputMissing {
                            path: output.display().to_string(),
                        }),
                    }
                },
            )
            .await?;

        committed.store(true, Ordering::SeqCst);
        Ok(output.to_path_buf())
    }

    /// Stops the engine: cancels every batch, kills outstanding
    /// subprocesses, and detaches subscriber forwarders.
    pub fn shutdown(&self) {
        info!("engine shutdown requested");
        self.runtime.cancel();
        self.runner.shutdown();
    }

    async fn drive(
        self: Arc<Self>,
        job: Job,
        job_id: Arc<str>,
        cancel: CancellationToken,
        mut paused_rx: watch::Receiver<bool>,
    ) -> BatchOutcome {
        let hosts = job.remaining_hosts();
        let mut results: BTreeMap<String, HostOutcome> = BTreeMap::new();
        let mut join: JoinSet<(String, HostOutcome)> = JoinSet::new();
        let mut cancelled = false;

        'dispatch: for host in &hosts {
            let Some(adapter) = self.adapters.get(host).cloned() else {
                warn!(job = %job_id, host = %host, "no adapter configured");
                results.insert(
                    host.clone(),
                    HostOutcome {
                        state: HostState::Failed,
                        links: Vec::new(),
                        error: Some(format!("no adapter configured for `{host}`")),
                        attempts: 0,
                    },
                );
                continue;
            };

            for file in &job.files {
                // Pause gate: no new dispatch while paused, but cancel
                // still wins immediately.
                while *paused_rx.borrow() {
                    select! {
                        _ = cancel.cancelled() => {
                            cancelled = true;
                            break 'dispatch;
                        }
                        res = paused_rx.changed() => {
                            if res.is_err() {
                                break;
                            }
                        }
                    }
                }
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'dispatch;
                }

                let permit = match &self.pool {
                    Some(sem) => {
                        select! {
                            _ = cancel.cancelled() => {
                                cancelled = true;
                                break 'dispatch;
                            }
                            permit = Arc::clone(sem).acquire_owned() => match permit {
                                Ok(p) => Some(p),
                                Err(_) => {
                                    cancelled = true;
                                    break 'dispatch;
                                }
                            },
                        }
                    }
                    None => None,
                };

                let task = HostUploadTask {
                    job_id: job_id.clone(),
                    file: file.clone(),
                    adapter: adapter.clone(),
                    breaker: self.circuits.breaker(host),
                    retry: self.cfg.retry,
                    bus: self.bus.clone(),
                    diag: self.diag.clone(),
                };
                let host = host.clone();
                let batch_cancel = cancel.clone();
                let runtime = self.runtime.clone();
                join.spawn(async move {
                    let out = task.run(&batch_cancel, &runtime).await;
                    drop(permit);
                    (host, out)
                });
            }
        }

        while let Some(res) = join.join_next().await {
            match res {
                Ok((host, out)) => match results.get_mut(&host) {
                    Some(existing) => existing.merge(out),
                    None => {
                        results.insert(host, out);
                    }
                },
                Err(e) => error!(job = %job_id, error = %e, "host task panicked"),
            }
        }
        if cancel.is_cancelled() {
            cancelled = true;
        }

        // Successes from a previous run of this job still count toward the
        // completed-if-any-host-holds-the-files rule.
        let any_success = results.values().any(|r| r.state == HostState::Succeeded)
            || job
                .results
                .values()
                .any(|r| r.state == HostState::Succeeded);
        let status = if any_success && !cancelled {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };

        if let Err(e) = self.store.complete(&job_id, status, results.clone()) {
            error!(job = %job_id, error = %e, "failed to persist job result");
        }

        let batch_kind = if cancelled {
            EventKind::BatchCancelled
        } else {
            EventKind::BatchCompleted
        };
        self.bus
            .publish(Event::now(batch_kind).with_job(job_id.clone()));
        match status {
            JobStatus::Completed => {
                info!(job = %job_id, hosts = results.len(), "job completed");
                self.bus
                    .publish(Event::now(EventKind::JobCompleted).with_job(job_id.clone()));
            }
            _ => {
                let summary = results
                    .values()
                    .filter_map(|r| r.error.as_deref())
                    .next()
                    .unwrap_or(if cancelled { "cancelled" } else { "no host succeeded" })
                    .to_string();
                warn!(job = %job_id, error = %summary, "job failed");
                self.bus.publish(
                    Event::now(EventKind::JobFailed)
                        .with_job(job_id.clone())
                        .with_error(summary),
                );
            }
        }

        // Control entry goes away before the handle resolves, so a caller
        // woken by `wait` never sees the batch as still cancellable.
        {
            let mut batches = self.batches.lock().unwrap_or_else(|e| e.into_inner());
            batches.remove(&job_id);
        }

        BatchOutcome {
            job_id,
            results,
            cancelled,
        }
    }
}
