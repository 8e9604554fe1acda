use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::UploadError;

/// Shared reference to a host adapter.
pub type HostRef = Arc<dyn HostAdapter>;

/// A link returned by a hosting service after a successful upload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteLink {
    pub url: String,
}

impl RemoteLink {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// One hosting service the engine can upload files to.
///
/// Implementations own all service specifics (endpoints, credentials,
/// wire protocol). The engine only requires that `upload`:
///
/// - returns [`RemoteLink`] on success,
/// - maps service failures onto [`UploadError`] (`Transport` for
///   retryable network faults, `ProcessNonZeroExit` / `ProcessTimeout`
///   when the upload shells out),
/// - observes `ctx` cooperatively: when the token fires the engine is
///   shutting down and the attempt should return [`UploadError::Canceled`]
///   as soon as practical.
#[async_trait]
pub trait HostAdapter: Send + Sync + 'static {
    /// Stable host name, used as the circuit-breaker key and in events.
    fn host(&self) -> &str;

    /// Upload a single file, returning the public link.
    async fn upload(&self, file: &Path, ctx: CancellationToken) -> Result<RemoteLink, UploadError>;
}
