//! Job Store — spec §4.H/§6.
//!
//! Durable job persistence as a single JSON file keyed by job id, in the same
//! spirit as the Supervisor's watchlist file: no external database, the whole
//! map is rewritten on every upsert. At this job volume (dozens, not millions)
//! that is simpler than it is slow.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::{error, warn};

use crate::crawl::job::{Job, JobStatus};
use crate::error::{AppError, Result};

pub struct JobStore {
    path: PathBuf,
    jobs: Mutex<HashMap<String, Job>>,
}

impl JobStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let jobs = load_jobs(&path).unwrap_or_default();
        Ok(Self {
            path,
            jobs: Mutex::new(jobs),
        })
    }

    pub fn list(&self) -> Vec<Job> {
        self.jobs.lock().expect("job store mutex poisoned").values().cloned().collect()
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.jobs.lock().expect("job store mutex poisoned").get(job_id).cloned()
    }

    pub fn upsert(&self, job: &Job) -> Result<()> {
        {
            let mut jobs = self.jobs.lock().expect("job store mutex poisoned");
            jobs.insert(job.job_id.clone(), job.clone());
        }
        self.persist()
    }

    /// Jobs worth rehydrating into the hot set at startup: `queued`, `paused`,
    /// and `running` (which becomes `queued` — nothing was actually in flight
    /// across a restart), capped at `limit`. `completed`/`failed` jobs stay on
    /// disk but are not loaded.
    pub fn load_active(&self, limit: usize) -> Vec<Job> {
        let mut jobs = self.jobs.lock().expect("job store mutex poisoned");
        let mut active: Vec<Job> = jobs
            .values()
            .filter(|j| matches!(j.status, JobStatus::Queued | JobStatus::Paused | JobStatus::Running))
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        active.truncate(limit);

        for job in &mut active {
            if job.status == JobStatus::Running {
                job.status = JobStatus::Queued;
            }
            if let Some(stored) = jobs.get_mut(&job.job_id) {
                stored.status = job.status;
            }
        }
        active
    }

    fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let jobs = self.jobs.lock().expect("job store mutex poisoned");
        let snapshot: Vec<&Job> = jobs.values().collect();
        let bytes = serde_json::to_vec_pretty(&snapshot)
            .map_err(|e| AppError::StorageFailure(format!("serialize job store: {e}")))?;
        std::fs::write(&self.path, bytes)
            .map_err(|e| AppError::StorageFailure(format!("write job store {}: {e}", self.path.display())))?;
        Ok(())
    }
}

fn load_jobs(path: &PathBuf) -> Option<HashMap<String, Job>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!("failed to read job store {}: {e}", path.display());
            return None;
        }
    };
    match serde_json::from_slice::<Vec<Job>>(&bytes) {
        Ok(jobs) => Some(jobs.into_iter().map(|j| (j.job_id.clone(), j)).collect()),
        Err(e) => {
            error!("job store {} is corrupt, starting empty: {e}", path.display());
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::job::Job;

    fn sample_job(id: &str, status: JobStatus) -> Job {
        let mut job = Job::new(
            id.to_string(),
            vec!["BBCA".to_string()],
            "2025-01-06".to_string(),
            "2025-01-06".to_string(),
            0.0,
            50,
            1,
            "2025-01-05T00:00:00+07:00".to_string(),
        )
        .unwrap();
        job.status = status;
        job
    }

    #[test]
    fn upsert_then_get_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json")).unwrap();
        let job = sample_job("job-1", JobStatus::Queued);
        store.upsert(&job).unwrap();
        assert_eq!(store.get("job-1").unwrap().job_id, "job-1");
        assert_eq!(store.list().len(), 1);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.json");
        {
            let store = JobStore::new(path.clone()).unwrap();
            store.upsert(&sample_job("job-1", JobStatus::Paused)).unwrap();
        }
        let reopened = JobStore::new(path).unwrap();
        assert_eq!(reopened.get("job-1").unwrap().status, JobStatus::Paused);
    }

    #[test]
    fn load_active_demotes_running_to_queued_and_excludes_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json")).unwrap();
        store.upsert(&sample_job("running-job", JobStatus::Running)).unwrap();
        store.upsert(&sample_job("done-job", JobStatus::Completed)).unwrap();
        store.upsert(&sample_job("paused-job", JobStatus::Paused)).unwrap();

        let active = store.load_active(50);
        assert_eq!(active.len(), 2);
        let running = active.iter().find(|j| j.job_id == "running-job").unwrap();
        assert_eq!(running.status, JobStatus::Queued);
    }

    #[test]
    fn load_active_respects_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = JobStore::new(dir.path().join("jobs.json")).unwrap();
        for i in 0..5 {
            let mut job = sample_job(&format!("job-{i}"), JobStatus::Queued);
            job.created_at = format!("2025-01-0{}T00:00:00+07:00", i + 1);
            store.upsert(&job).unwrap();
        }
        assert_eq!(store.load_active(3).len(), 3);
    }
}
