//! Error types used across the upload engine.
//!
//! [`UploadError`] is the single error taxonomy shared by the process runner,
//! circuit breakers, retry policy, and the job store. Helper methods
//! (`as_label`, `is_retryable`) feed logs, diagnostics counters, and retry
//! decisions.
//!
//! [`Severity`] classifies how a failure propagates: anything below
//! [`Severity::Critical`] is absorbed by the retry policy into a default
//! value; critical failures surface to the caller as typed errors.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the upload engine.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum UploadError {
    /// External process exceeded its timeout; graceful and forced
    /// termination were both attempted.
    #[error("process timed out after {timeout:?}")]
    ProcessTimeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// External process could not be launched (missing or unauthorized
    /// executable).
    #[error("failed to launch `{program}`: {message}")]
    ProcessLaunchFailed {
        /// Program that failed to start.
        program: String,
        /// OS-level error description.
        message: String,
    },

    /// External process exited with a non-zero status.
    #[error("process exited with code {code}: {stderr}")]
    ProcessNonZeroExit {
        /// Exit code reported by the OS (-1 if terminated by signal).
        code: i32,
        /// Captured stderr, trimmed.
        stderr: String,
    },

    /// Archiver exited successfully but the expected archive is missing or
    /// empty. Exit code 0 alone is not trusted as a success signal.
    #[error("archiver produced no usable output at `{path}`")]
    ArchiveOutputMissing {
        /// Where the archive was expected.
        path: String,
    },

    /// The host's circuit breaker is open; the call was rejected without
    /// any network I/O.
    #[error("circuit open for host `{host}`")]
    CircuitOpen {
        /// Host whose breaker rejected the call.
        host: String,
    },

    /// A path failed validation before being handed to a subprocess or
    /// the filesystem.
    #[error("invalid path `{path}`: {reason}")]
    PathValidation {
        /// The offending path as given.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// Network or host-side failure during an upload attempt.
    #[error("transport error for host `{host}`: {message}")]
    Transport {
        /// Host the attempt was made against.
        host: String,
        /// Underlying failure description.
        message: String,
    },

    /// The same named resource was acquired twice on one execution path.
    /// Always a programming error, always fatal locally.
    #[error("resource `{resource}` acquired twice")]
    DoubleAcquisition {
        /// Name of the resource.
        resource: String,
    },

    /// All retry attempts were exhausted; carries the last underlying error.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Number of attempts that were made.
        attempts: u32,
        /// The error from the final attempt.
        #[source]
        source: Box<UploadError>,
    },

    /// Durable job store could not be read or written.
    #[error("job store error: {message}")]
    Storage {
        /// Underlying failure description.
        message: String,
    },

    /// Operation was cancelled cooperatively (batch cancel or shutdown).
    #[error("operation cancelled")]
    Canceled,
}

impl UploadError {
    /// Returns a short stable label (snake_case) for logs and diagnostics
    /// counters.
    pub fn as_label(&self) -> &'static str {
        match self {
            UploadError::ProcessTimeout { .. } => "process_timeout",
            UploadError::ProcessLaunchFailed { .. } => "process_launch_failed",
            UploadError::ProcessNonZeroExit { .. } => "process_non_zero_exit",
            UploadError::ArchiveOutputMissing { .. } => "archive_output_missing",
            UploadError::CircuitOpen { .. } => "circuit_open",
            UploadError::PathValidation { .. } => "path_validation",
            UploadError::Transport { .. } => "transport",
            UploadError::DoubleAcquisition { .. } => "double_acquisition",
            UploadError::RetryExhausted { .. } => "retry_exhausted",
            UploadError::Storage { .. } => "storage",
            UploadError::Canceled => "canceled",
        }
    }

    /// Indicates whether another attempt could plausibly succeed.
    ///
    /// Transient transport and process failures are retryable; rejections
    /// (`CircuitOpen`), validation failures, programming errors, and
    /// cancellation are not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::Transport { .. }
                | UploadError::ProcessTimeout { .. }
                | UploadError::ProcessNonZeroExit { .. }
                | UploadError::ArchiveOutputMissing { .. }
        )
    }

    /// Unwraps [`UploadError::RetryExhausted`] down to the terminal cause.
    pub fn root_cause(&self) -> &UploadError {
        match self {
            UploadError::RetryExhausted { source, .. } => source.root_cause(),
            other => other,
        }
    }
}

/// How a failure propagates once retries are exhausted.
///
/// Everything below `Critical` degrades gracefully: the retry policy
/// swallows the terminal failure and returns a configured default.
/// `Critical` failures are surfaced to the caller, which decides fatality
/// (the batch coordinator marks the affected job failed and keeps going).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    /// Informational; failure is expected and harmless.
    Low,
    /// Default for recoverable operations.
    Medium,
    /// Important operation; failure is logged loudly but still absorbed.
    High,
    /// Failure must reach the caller as a typed error.
    Critical,
}

impl Severity {
    /// Returns a short stable label for logs and diagnostics counters.
    pub fn as_label(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_exhausted_preserves_root_cause() {
        let err = UploadError::RetryExhausted {
            attempts: 3,
            source: Box::new(UploadError::Transport {
                host: "rapidgator".into(),
                message: "connection reset".into(),
            }),
        };
        assert_eq!(err.as_label(), "retry_exhausted");
        assert_eq!(err.root_cause().as_label(), "transport");
    }

    #[test]
    fn rejections_are_not_retryable() {
        let open = UploadError::CircuitOpen { host: "katfile".into() };
        assert!(!open.is_retryable());
        let transport = UploadError::Transport {
            host: "katfile".into(),
            message: "503".into(),
        };
        assert!(transport.is_retryable());
    }

    #[test]
    fn severity_orders_by_escalation() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
    }
}
