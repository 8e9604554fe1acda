//! Engine-wide configuration.
//!
//! [`EngineConfig`] centralizes the runtime knobs: worker pool size, retry
//! defaults, circuit thresholds, subprocess timeouts, guard stall warning,
//! and event bus capacity.
//!
//! ## Sentinel values
//! - `workers = 0` → unlimited (no pool semaphore created); the default of 3
//!   is a deliberate resource cap, not an optimization — uncontrolled
//!   concurrency against the hosts previously exhausted connections.

use std::time::Duration;

use crate::circuit::CircuitConfig;
use crate::policies::RetryPolicy;
use crate::process::ProcessConfig;

/// Global configuration for the upload engine.
#[derive(Clone, Copy, Debug)]
pub struct EngineConfig {
    /// Maximum number of host uploads running concurrently across **all**
    /// active batches. `0` = unlimited.
    pub workers: usize,

    /// Default retry policy for host uploads and subprocess steps.
    pub retry: RetryPolicy,

    /// Thresholds for every per-host circuit breaker.
    pub circuit: CircuitConfig,

    /// Timeouts for archiver subprocess invocations.
    pub process: ProcessConfig,

    /// How long a guarded resource may be held before a stall warning.
    pub stall_threshold: Duration,

    /// Event bus ring-buffer capacity (clamped to a minimum of 1 by the bus).
    pub bus_capacity: usize,
}

impl EngineConfig {
    /// Worker pool size as an `Option`: `None` = unlimited.
    #[inline]
    pub fn worker_limit(&self) -> Option<usize> {
        if self.workers == 0 {
            None
        } else {
            Some(self.workers)
        }
    }
}

impl Default for EngineConfig {
    /// Defaults:
    /// - `workers = 3`
    /// - `retry = RetryPolicy::default()` (3 attempts, 1s base, 60s cap)
    /// - `circuit = CircuitConfig::default()` (threshold 3, cooldown 5 min)
    /// - `process = ProcessConfig::default()` (60s timeout, 5s kill window)
    /// - `stall_threshold = 5 min`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            workers: 3,
            retry: RetryPolicy::default(),
            circuit: CircuitConfig::default(),
            process: ProcessConfig::default(),
            stall_threshold: Duration::from_secs(300),
            bus_capacity: 1024,
        }
    }
}
