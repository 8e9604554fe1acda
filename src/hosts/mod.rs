//! Host adapters and the per-host upload task.
//!
//! This module provides the seam to the outside world
//! ([`HostAdapter`] — one implementation per hosting service, supplied by
//! the application) and the unit of work the coordinator dispatches
//! ([`HostUploadTask`] — upload one file to one host under that host's
//! circuit breaker and the engine's retry policy).

mod adapter;
mod task;

pub use adapter::{HostAdapter, HostRef, RemoteLink};
pub use task::{HostOutcome, HostState, HostUploadTask};
