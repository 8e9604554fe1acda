use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hosts::HostOutcome;

/// Persistent lifecycle of a job.
///
/// Transitions only move forward (`Pending → Processing → Completed |
/// Failed`), with one exception: a failed job may be demoted back to
/// `Pending` by an explicit resubmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One unit of durable work: a set of files bound for a set of hosts.
///
/// `results` keeps the per-host outcome of the most recent run, including
/// the public links of whatever succeeded — a resubmitted job can skip
/// hosts that already hold the files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// How many times this job entered processing.
    pub attempts: u32,
    pub files: Vec<PathBuf>,
    pub hosts: Vec<String>,
    #[serde(default)]
    pub results: BTreeMap<String, HostOutcome>,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        files: Vec<PathBuf>,
        hosts: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Pending,
            created_at: Utc::now(),
            last_attempt_at: None,
            attempts: 0,
            files,
            hosts,
            results: BTreeMap::new(),
        }
    }

    /// Hosts that still need this job's files: those without a successful
    /// outcome from a previous run.
    pub fn remaining_hosts(&self) -> Vec<String> {
        self.hosts
            .iter()
            .filter(|h| {
                self.results
                    .get(h.as_str())
                    .map(|r| r.state != crate::hosts::HostState::Succeeded)
                    .unwrap_or(true)
            })
            .cloned()
            .collect()
    }
}
