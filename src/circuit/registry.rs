//! Process-wide registry of per-host breakers.
//!
//! The original design kept circuit state in module-level globals; here it
//! is an explicit object owned by the
//! [`UploadBatchCoordinator`](crate::batch::UploadBatchCoordinator) and
//! shared by reference, keyed by host identifier. Breakers are created
//! lazily on first reference and live for the registry's lifetime.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::circuit::breaker::{CircuitBreaker, CircuitConfig, CircuitState};
use crate::events::Bus;

/// Map of host id → breaker, the single source of truth for host health.
pub struct CircuitRegistry {
    cfg: CircuitConfig,
    bus: Bus,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitRegistry {
    /// Creates an empty registry; breakers inherit `cfg` and publish
    /// transitions on `bus`.
    pub fn new(cfg: CircuitConfig, bus: Bus) -> Self {
        Self {
            cfg,
            bus,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the breaker for `host`, creating it on first reference.
    pub fn breaker(&self, host: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(host.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(host, self.cfg, self.bus.clone()))
            })
            .clone()
    }

    /// Point-in-time view of every known host's state, for display layers.
    pub fn snapshot(&self) -> BTreeMap<String, CircuitState> {
        let breakers = self.breakers.lock().unwrap_or_else(|e| e.into_inner());
        breakers
            .iter()
            .map(|(host, cb)| (host.clone(), cb.state()))
            .collect()
    }
}
