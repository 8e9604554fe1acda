use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use tracing::{info, warn};

use crate::error::UploadError;
use crate::hosts::HostOutcome;
use crate::store::job::{Job, JobStatus};

/// File-backed job queue.
///
/// All jobs live in memory behind one mutex; the backing file is the
/// source of truth only across restarts. Every mutating call persists
/// before returning, so a crash can lose at most the mutation in
/// flight, never corrupt the file: writes go to a sibling `.tmp` file
/// that is renamed over the original.
pub struct JobStore {
    path: PathBuf,
    jobs: Mutex<Vec<Job>>,
}

impl JobStore {
    /// Opens (or creates) the store at `path` and replays its contents.
    ///
    /// Jobs found in `Processing` belong to a run that died mid-flight;
    /// they are demoted back to `Pending` (attempt counts preserved) so
    /// the next drain picks them up in their original order.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, UploadError> {
        let path = path.into();
        let mut jobs: Vec<Job> = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| UploadError::Storage {
                message: format!("{} is not a valid job file: {e}", path.display()),
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => {
                return Err(UploadError::Storage {
                    message: format!("reading {}: {e}", path.display()),
                })
            }
        };

        let mut demoted = 0usize;
        for job in &mut jobs {
            if job.status == JobStatus::Processing {
                job.status = JobStatus::Pending;
                demoted += 1;
            }
        }
        if demoted > 0 {
            warn!(count = demoted, "demoted interrupted jobs back to pending");
        }
        if !jobs.is_empty() {
            info!(count = jobs.len(), path = %path.display(), "restored job queue");
        }

        let store = Self {
            path,
            jobs: Mutex::new(jobs),
        };
        if demoted > 0 {
            let jobs = store.lock();
            store.persist(&jobs)?;
        }
        Ok(store)
    }

    /// Appends a new job. Fails if the id is already present.
    pub fn enqueue(&self, job: Job) -> Result<(), UploadError> {
        let mut jobs = self.lock();
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(UploadError::Storage {
                message: format!("job {} already exists", job.id),
            });
        }
        jobs.push(job);
        self.persist(&jobs)
    }

    /// Next job eligible to run, in insertion order.
    ///
    /// Returns `None` while any job is still `Processing`: jobs run one
    /// at a time, so a drain loop calling this repeatedly never starts a
    /// second job before the first reaches a terminal state.
    pub fn next_pending(&self) -> Option<Job> {
        let jobs = self.lock();
        if jobs.iter().any(|j| j.status == JobStatus::Processing) {
            return None;
        }
        jobs.iter().find(|j| j.status == JobStatus::Pending).cloned()
    }

    /// Moves a job into `Processing` and bumps its attempt count.
    pub fn mark_processing(&self, id: &str) -> Result<(), UploadError> {
        self.update(id, |job| {
            if job.status != JobStatus::Pending {
                return Err(UploadError::Storage {
                    message: format!("job {id} is {}, cannot start", job.status.as_label()),
                });
            }
            job.status = JobStatus::Processing;
            job.attempts = job.attempts.saturating_add(1);
            job.last_attempt_at = Some(Utc::now());
            Ok(())
        })
    }

    /// Records the terminal status and per-host results of a finished run.
    pub fn complete(
        &self,
        id: &str,
        status: JobStatus,
        results: BTreeMap<String, HostOutcome>,
    ) -> Result<(), UploadError> {
        if !status.is_terminal() {
            return Err(UploadError::Storage {
                message: format!("{} is not a terminal status", status.as_label()),
            });
        }
        self.update(id, |job| {
            job.status = status;
            for (host, outcome) in results {
                match job.results.get_mut(&host) {
                    // A newer run supersedes the host's previous state but
                    // keeps the links it already earned.
                    Some(existing) => existing.supersede(outcome),
                    None => {
                        job.results.insert(host, outcome);
                    }
                }
            }
            Ok(())
        })
    }

    /// Demotes a failed job back to `Pending` for another run.
    pub fn retry(&self, id: &str) -> Result<(), UploadError> {
        self.update(id, |job| {
            if job.status != JobStatus::Failed {
                return Err(UploadError::Storage {
                    message: format!(
                        "job {id} is {}, only failed jobs can be resubmitted",
                        job.status.as_label()
                    ),
                });
            }
            job.status = JobStatus::Pending;
            Ok(())
        })
    }

    /// Removes a job outright (e.g. after a user deletes it).
    pub fn remove(&self, id: &str) -> Result<(), UploadError> {
        let mut jobs = self.lock();
        let before = jobs.len();
        jobs.retain(|j| j.id != id);
        if jobs.len() == before {
            return Err(self.not_found(id));
        }
        self.persist(&jobs)
    }

    pub fn get(&self, id: &str) -> Option<Job> {
        self.lock().iter().find(|j| j.id == id).cloned()
    }

    /// Snapshot of all jobs in insertion order.
    pub fn jobs(&self) -> Vec<Job> {
        self.lock().clone()
    }

    fn update(
        &self,
        id: &str,
        mutate: impl FnOnce(&mut Job) -> Result<(), UploadError>,
    ) -> Result<(), UploadError> {
        let mut jobs = self.lock();
        let job = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| self.not_found(id))?;
        mutate(job)?;
        self.persist(&jobs)
    }

    fn persist(&self, jobs: &[Job]) -> Result<(), UploadError> {
        let bytes = serde_json::to_vec_pretty(jobs).map_err(|e| UploadError::Storage {
            message: format!("encoding job queue: {e}"),
        })?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.io_err("creating", parent, e))?;
        }

        let tmp = self.path.with_extension("tmp");
        let mut file =
            fs::File::create(&tmp).map_err(|e| self.io_err("creating", &tmp, e))?;
        file.write_all(&bytes)
            .and_then(|_| file.sync_all())
            .map_err(|e| self.io_err("writing", &tmp, e))?;
        drop(file);
        fs::rename(&tmp, &self.path).map_err(|e| self.io_err("replacing", &self.path, e))
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Job>> {
        self.jobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn not_found(&self, id: &str) -> UploadError {
        UploadError::Storage {
            message: format!("job {id} not found"),
        }
    }

    fn io_err(&self, verb: &str, path: &Path, e: std::io::Error) -> UploadError {
        UploadError::Storage {
            message: format!("{verb} {}: {e}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosts::{HostOutcome, HostState};
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn job(id: &str) -> Job {
        Job::new(
            id,
            vec![PathBuf::from("a.rar")],
            vec!["rapidgator".into(), "ddownload".into()],
        )
    }

    fn succeeded(link: &str) -> HostOutcome {
        HostOutcome {
            state: HostState::Succeeded,
            links: vec![link.into()],
            error: None,
            attempts: 1,
        }
    }

    #[test]
    fn enqueue_persists_and_reload_restores_order() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        {
            let store = JobStore::open(&path).unwrap();
            store.enqueue(job("job-1")).unwrap();
            store.enqueue(job("job-2")).unwrap();
            store.enqueue(job("job-3")).unwrap();
        }
        let store = JobStore::open(&path).unwrap();
        let ids: Vec<_> = store.jobs().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["job-1", "job-2", "job-3"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).unwrap();
        store.enqueue(job("job-1")).unwrap();
        assert!(matches!(
            store.enqueue(job("job-1")),
            Err(UploadError::Storage { .. })
        ));
    }

    #[test]
    fn one_processing_job_blocks_the_next_pending() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).unwrap();
        store.enqueue(job("job-1")).unwrap();
        store.enqueue(job("job-2")).unwrap();

        let first = store.next_pending().unwrap();
        assert_eq!(first.id, "job-1");
        store.mark_processing("job-1").unwrap();
        assert!(store.next_pending().is_none());

        store
            .complete("job-1", JobStatus::Completed, BTreeMap::new())
            .unwrap();
        assert_eq!(store.next_pending().unwrap().id, "job-2");
    }

    #[test]
    fn interrupted_processing_job_is_demoted_on_open() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        {
            let store = JobStore::open(&path).unwrap();
            store.enqueue(job("job-1")).unwrap();
            store.enqueue(job("job-2")).unwrap();
            store.mark_processing("job-1").unwrap();
            // Process dies here.
        }
        let store = JobStore::open(&path).unwrap();
        let restored = store.get("job-1").unwrap();
        assert_eq!(restored.status, JobStatus::Pending);
        assert_eq!(restored.attempts, 1);
        // Interrupted job run first, ahead of job-2.
        assert_eq!(store.next_pending().unwrap().id, "job-1");
    }

    #[test]
    fn complete_merges_results_and_retry_keeps_links() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).unwrap();
        store.enqueue(job("job-1")).unwrap();
        store.mark_processing("job-1").unwrap();

        let mut results = BTreeMap::new();
        results.insert("rapidgator".into(), succeeded("https://rg/f/a"));
        results.insert(
            "ddownload".into(),
            HostOutcome {
                state: HostState::Failed,
                links: vec![],
                error: Some("reset".into()),
                attempts: 3,
            },
        );
        store.complete("job-1", JobStatus::Failed, results).unwrap();

        store.retry("job-1").unwrap();
        let j = store.get("job-1").unwrap();
        assert_eq!(j.status, JobStatus::Pending);
        assert_eq!(j.results["rapidgator"].links, vec!["https://rg/f/a"]);
        assert_eq!(j.remaining_hosts(), vec!["ddownload"]);
    }

    #[test]
    fn retry_only_applies_to_failed_jobs() {
        let dir = tempdir().unwrap();
        let store = JobStore::open(dir.path().join("jobs.json")).unwrap();
        store.enqueue(job("job-1")).unwrap();
        assert!(store.retry("job-1").is_err());
    }

    #[test]
    fn corrupt_file_surfaces_a_storage_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        std::fs::write(&path, b"not json").unwrap();
        assert!(matches!(
            JobStore::open(&path),
            Err(UploadError::Storage { .. })
        ));
    }
}
