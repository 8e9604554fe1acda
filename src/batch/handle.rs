use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::oneshot;

use crate::error::UploadError;
use crate::hosts::{HostOutcome, HostState};

/// Final result of one batch run.
#[derive(Clone, Debug)]
pub struct BatchOutcome {
    pub job_id: Arc<str>,
    /// Per-host aggregate over every file in the batch. Hosts whose tasks
    /// were never dispatched (cancelled early) are absent.
    pub results: BTreeMap<String, HostOutcome>,
    pub cancelled: bool,
}

impl BatchOutcome {
    /// True when at least one host holds the files.
    pub fn any_succeeded(&self) -> bool {
        self.results
            .values()
            .any(|r| r.state == HostState::Succeeded)
    }
}

/// Caller-side handle to a dispatched batch.
///
/// Dropping the handle detaches from the batch without cancelling it;
/// cancellation goes through
/// [`UploadBatchCoordinator::cancel`](crate::batch::UploadBatchCoordinator::cancel).
pub struct BatchHandle {
    pub(crate) job_id: Arc<str>,
    pub(crate) rx: oneshot::Receiver<BatchOutcome>,
}

impl BatchHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Waits for the batch to reach its terminal state.
    pub async fn wait(self) -> Result<BatchOutcome, UploadError> {
        self.rx.await.map_err(|_| UploadError::Canceled)
    }
}
