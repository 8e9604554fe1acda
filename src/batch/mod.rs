//! Batch dispatch and the shared worker pool.
//!
//! [`UploadBatchCoordinator`] owns everything a running engine needs: the
//! event bus, the circuit registry, the worker-pool semaphore, the durable
//! job store, the process runner, and the resource ledger. It turns a
//! queued [`Job`](crate::store::Job) into a batch of per-(file, host)
//! tasks, caps their concurrency, and folds their outcomes back into the
//! store.

mod coordinator;
mod handle;

pub use coordinator::UploadBatchCoordinator;
pub use handle::{BatchHandle, BatchOutcome};
