//! Retry and jitter policies.
//!
//! This module groups the knobs that control **how many times** a failing
//! operation is attempted and **how long** to wait between attempts.
//!
//! ## Contents
//! - [`RetryPolicy`] — bounded retry with exponential backoff, severity-aware
//!   propagation, and per-attempt diagnostics
//! - [`JitterPolicy`] — randomization strategy to avoid thundering herd
//!
//! ## Quick wiring
//! ```text
//! HostUploadTask ──► RetryPolicy::execute(op)
//!      │                  ├─ delay = base × 2^(attempt-1), capped, jittered
//!      │                  ├─ every attempt recorded in Diagnostics
//!      │                  └─ UploadRetrying events on the Bus
//!      └─ severity decides: absorb into default vs. surface typed error
//! ```
//!
//! ## Defaults
//! - `max_retries = 3`, `base = 1s`, `max_delay = 60s`, `jitter = None`.

mod jitter;
mod retry;

pub use jitter::JitterPolicy;
pub use retry::{RetryPolicy, RetryScope};
