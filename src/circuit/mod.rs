//! Per-host circuit breakers.
//!
//! A failing host must not soak up retry budget or block the other hosts in
//! a batch: after a run of consecutive failures its breaker opens and every
//! caller fails fast with [`UploadError::CircuitOpen`](crate::UploadError::CircuitOpen)
//! until a cooldown elapses and a single probe is let through.
//!
//! ## Contents
//! - [`CircuitBreaker`], [`CircuitState`], [`CircuitConfig`] — one host's gate
//! - [`CircuitRegistry`] — process-wide map of breakers keyed by host id,
//!   lazily created, publishing transition events on the bus

mod breaker;
mod registry;

pub use breaker::{CircuitBreaker, CircuitConfig, CircuitState};
pub use registry::CircuitRegistry;
