//! # mirrorvisor
//!
//! **Mirrorvisor** is an upload orchestration engine: it mirrors files to
//! multiple one-click hosting services concurrently, survives flaky hosts
//! and restarts, and keeps external processes (archivers) from ever
//! outliving it.
//!
//! ## Architecture
//! ```text
//!   ┌─────────────┐     ┌─────────────┐
//!   │ Job (files, │ ... │ Job         │           durable queue
//!   │ hosts)      │     │             │           (jobs.json, atomic writes)
//!   └──────┬──────┘     └──────┬──────┘
//!          ▼                   ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │  UploadBatchCoordinator                                      │
//! │  - JobStore (sequential drain, restart replay)               │
//! │  - Semaphore (worker pool shared across batches)             │
//! │  - CircuitRegistry (per-host breakers)                       │
//! │  - SafeProcessRunner (archiver subprocesses)                 │
//! │  - ResourceLedger (scoped cleanup, stall watchdog)           │
//! │  - Bus (broadcast events) ──► SubscriberSet ──► subscribers  │
//! └──────┬───────────────────┬───────────────────┬───────────────┘
//!        ▼                   ▼                   ▼
//!  ┌────────────┐      ┌────────────┐      ┌────────────┐
//!  │HostUpload  │      │HostUpload  │      │HostUpload  │   one task per
//!  │Task        │      │Task        │      │Task        │   (file, host)
//!  └─────┬──────┘      └─────┬──────┘      └─────┬──────┘
//!        │ breaker gate      │                   │
//!        │ RetryPolicy       │                   │
//!        ▼                   ▼                   ▼
//!   HostAdapter         HostAdapter         HostAdapter
//!   (rapidgator)        (ddownload)         (katfile)
//! ```
//!
//! ## Lifecycle of one job
//! ```text
//! enqueue ──► JobStore (Pending) ──► submit ──► batch driver
//!
//! for each (file, host) pair:
//!   ├─► pause gate (BatchPaused suspends dispatch, cancel wins)
//!   ├─► acquire worker permit (shared across all batches)
//!   ├─► breaker.try_acquire()
//!   │     └─ open ──► HostOutcome::CircuitOpen, zero attempts
//!   ├─► RetryPolicy::execute(adapter.upload)
//!   │     ├─ Ok  ──► record_success, UploadSucceeded{link}
//!   │     └─ Err ──► record_failure (once), UploadFailed
//!   └─► outcome folded into per-host aggregate
//!
//! all tasks terminal ──► store.complete(Completed if ≥1 host succeeded)
//!                   ──► BatchCompleted / BatchCancelled event
//! ```
//!
//! ## Guarantees
//! - **Sequential jobs**: one job runs at a time; the worker pool bounds
//!   concurrency *within* its batch.
//! - **Partial success**: a job completes when at least one host holds the
//!   files; per-host outcomes (including failures) are persisted.
//! - **Restart replay**: jobs interrupted mid-flight come back as pending
//!   in their original order.
//! - **No orphan processes**: every subprocess is launched through
//!   [`SafeProcessRunner`], with timeout and escalating termination.
//! - **Scoped resources**: [`ResourceLedger`] runs cleanup exactly once on
//!   every exit path and flags stalls.

mod batch;
mod circuit;
mod config;
mod diagnostics;
mod error;
mod events;
mod guard;
mod hosts;
mod policies;
mod process;
mod store;
mod subscribers;

pub use batch::{BatchHandle, BatchOutcome, UploadBatchCoordinator};
pub use circuit::{CircuitBreaker, CircuitConfig, CircuitRegistry, CircuitState};
pub use config::EngineConfig;
pub use diagnostics::{memory_snapshot, AttemptRecord, Diagnostics, DiagnosticsReport};
pub use error::{Severity, UploadError};
pub use events::{Bus, Event, EventKind};
pub use guard::{ResourceGuard, ResourceLedger};
pub use hosts::{HostAdapter, HostOutcome, HostRef, HostState, HostUploadTask, RemoteLink};
pub use policies::{JitterPolicy, RetryPolicy, RetryScope};
pub use process::{validate_path, ProcessConfig, ProcessOutput, SafeProcessRunner};
pub use store::{Job, JobStatus, JobStore};
pub use subscribers::{LogSubscriber, Subscribe, SubscriberSet};
