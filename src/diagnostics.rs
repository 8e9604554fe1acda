//! Attempt-level diagnostics and on-demand metrics export.
//!
//! Every attempt the retry policy makes (success or failure) is recorded
//! here: elapsed time, memory footprint at the time of the call, and the
//! classified error kind. The accumulated history is bounded and can be
//! exported as a structured [`DiagnosticsReport`] for external inspection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sysinfo::{ProcessesToUpdate, System};

use crate::error::Severity;

/// How many attempt records are kept before the oldest are evicted.
const HISTORY_CAP: usize = 1000;

/// How many recent records the summary counters aggregate over.
const SUMMARY_WINDOW: usize = 100;

/// One recorded operation attempt.
#[derive(Clone, Debug, Serialize)]
pub struct AttemptRecord {
    /// Operation label, e.g. `"upload/rapidgator"` or `"archive"`.
    pub label: String,
    /// Attempt number within its retry loop (1-based).
    pub attempt: u32,
    /// Severity the operation was executed under.
    pub severity: &'static str,
    /// Classified error label; `None` for a successful attempt.
    pub error: Option<&'static str>,
    /// Wall time the attempt took.
    pub elapsed_ms: u64,
    /// Resident memory of this process when the attempt finished, in bytes.
    pub memory_bytes: u64,
    /// When the attempt finished.
    pub at: DateTime<Utc>,
}

/// Structured export of accumulated attempt/failure metrics.
#[derive(Clone, Debug, Serialize)]
pub struct DiagnosticsReport {
    /// When the report was generated.
    pub generated_at: DateTime<Utc>,
    /// Total attempts recorded since startup (including evicted ones).
    pub total_attempts: u64,
    /// `"severity:error_label"` → count over the recent window.
    pub recent_failures: BTreeMap<String, u64>,
    /// Most recent attempt records, oldest first.
    pub recent: Vec<AttemptRecord>,
}

#[derive(Default)]
struct Inner {
    history: VecDeque<AttemptRecord>,
    total: u64,
}

/// Bounded, thread-safe store of attempt records.
///
/// Shared by reference across the retry policy, host tasks, and the
/// coordinator; recording never blocks on I/O.
#[derive(Default)]
pub struct Diagnostics {
    inner: Mutex<Inner>,
}

impl Diagnostics {
    /// Creates an empty diagnostics store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one attempt, evicting the oldest record past the cap.
    pub fn record(&self, rec: AttemptRecord) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.total += 1;
        inner.history.push_back(rec);
        if inner.history.len() > HISTORY_CAP {
            inner.history.pop_front();
        }
    }

    /// Builds a point-in-time report over the recorded history.
    pub fn report(&self) -> DiagnosticsReport {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut recent_failures: BTreeMap<String, u64> = BTreeMap::new();
        for rec in inner.history.iter().rev().take(SUMMARY_WINDOW) {
            if let Some(err) = rec.error {
                let key = format!("{}:{}", rec.severity, err);
                *recent_failures.entry(key).or_insert(0) += 1;
            }
        }
        DiagnosticsReport {
            generated_at: Utc::now(),
            total_attempts: inner.total,
            recent_failures,
            recent: inner.history.iter().cloned().collect(),
        }
    }

    /// Number of records currently held.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).history.len()
    }

    /// True when no attempts have been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Resident memory of the current process, in bytes.
///
/// Returns 0 when the process cannot be inspected (sandboxed platforms).
pub fn memory_snapshot() -> u64 {
    let Ok(pid) = sysinfo::get_current_pid() else {
        return 0;
    };
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).map(|p| p.memory()).unwrap_or(0)
}

/// Convenience constructor used by the retry policy.
pub(crate) fn attempt_record(
    label: &str,
    attempt: u32,
    severity: Severity,
    error: Option<&'static str>,
    elapsed_ms: u64,
) -> AttemptRecord {
    AttemptRecord {
        label: label.to_string(),
        attempt,
        severity: severity.as_label(),
        error,
        elapsed_ms,
        memory_bytes: memory_snapshot(),
        at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(label: &str, error: Option<&'static str>) -> AttemptRecord {
        attempt_record(label, 1, Severity::Medium, error, 5)
    }

    #[test]
    fn history_is_bounded() {
        let diag = Diagnostics::new();
        for i in 0..(HISTORY_CAP + 50) {
            diag.record(rec(&format!("op-{i}"), None));
        }
        assert_eq!(diag.len(), HISTORY_CAP);
        let report = diag.report();
        assert_eq!(report.total_attempts, (HISTORY_CAP + 50) as u64);
        // Oldest records were evicted.
        assert_eq!(report.recent.first().unwrap().label, "op-50");
    }

    #[test]
    fn failure_summary_counts_by_severity_and_kind() {
        let diag = Diagnostics::new();
        diag.record(rec("upload/katfile", Some("transport")));
        diag.record(rec("upload/katfile", Some("transport")));
        diag.record(rec("upload/katfile", None));
        let report = diag.report();
        assert_eq!(report.recent_failures.get("medium:transport"), Some(&2));
    }

    #[test]
    fn report_serializes_to_json() {
        let diag = Diagnostics::new();
        diag.record(rec("archive", Some("process_timeout")));
        let json = serde_json::to_string(&diag.report()).unwrap();
        assert!(json.contains("process_timeout"));
    }
}
