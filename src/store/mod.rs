//! Durable job queue backed by a single JSON file.
//!
//! Jobs survive restarts: every mutation rewrites the file atomically
//! (write to a sibling temp file, then rename), and [`JobStore::open`]
//! replays whatever the previous process left behind, demoting jobs that
//! died mid-flight back to pending.

mod job;
mod store;

pub use job::{Job, JobStatus};
pub use store::JobStore;
