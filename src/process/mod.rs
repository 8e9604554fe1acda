//! Subprocess execution with guaranteed termination.
//!
//! Archiver tools run as external processes; a hung archiver must never hang
//! the application. [`SafeProcessRunner`] launches validated argument
//! vectors, enforces a timeout with escalating termination (graceful signal,
//! then kill), and tracks every live child in a registry so an engine
//! shutdown can terminate all outstanding subprocesses.
//!
//! ## Contents
//! - [`SafeProcessRunner`], [`ProcessConfig`], [`ProcessOutput`]
//! - [`validate_path`] — pre-launch path safety checks

mod paths;
mod runner;

pub use paths::validate_path;
pub use runner::{ProcessConfig, ProcessOutput, SafeProcessRunner};
