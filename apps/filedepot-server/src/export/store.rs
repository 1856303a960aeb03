//! Export job registry
//!
//! Jobs only live as long as the process that builds them, so the registry
//! is an in-process map behind a small trait.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use super::types::{ExportJob, JobStatus};

pub trait ExportJobStore: Send + Sync {
    fn insert(&self, job: ExportJob);

    fn get(&self, job_id: &str) -> Option<ExportJob>;

    /// Update the progress label of a processing job
    fn record_progress(&self, job_id: &str, progress: String) -> bool;

    /// Processing → Completed; `false` if the job is gone or already terminal
    fn mark_completed(&self, job_id: &str, result_path: String, download_url: String) -> bool;

    /// Processing → Failed; `false` if the job is gone or already terminal
    fn mark_failed(&self, job_id: &str, error: String) -> bool;

    fn remove(&self, job_id: &str) -> Option<ExportJob>;
}

#[derive(Clone, Default)]
pub struct MemoryJobStore {
    jobs: Arc<RwLock<HashMap<String, ExportJob>>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }

    /// Apply `update` to a job that is still processing
    fn transition(&self, job_id: &str, update: impl FnOnce(&mut ExportJob)) -> bool {
        let mut jobs = self.jobs.write();
        match jobs.get_mut(job_id) {
            Some(job) if job.status == JobStatus::Processing => {
                update(job);
                true
            }
            _ => false,
        }
    }
}

impl ExportJobStore for MemoryJobStore {
    fn insert(&self, job: ExportJob) {
        self.jobs.write().insert(job.job_id.clone(), job);
    }

    fn get(&self, job_id: &str) -> Option<ExportJob> {
        self.jobs.read().get(job_id).cloned()
    }

    fn record_progress(&self, job_id: &str, progress: String) -> bool {
        self.transition(job_id, |job| job.progress = Some(progress))
    }

    fn mark_completed(&self, job_id: &str, result_path: String, download_url: String) -> bool {
        self.transition(job_id, |job| {
            job.status = JobStatus::Completed;
            job.progress = Some("Ready".to_string());
            job.result_path = Some(result_path);
            job.download_url = Some(download_url);
        })
    }

    fn mark_failed(&self, job_id: &str, error: String) -> bool {
        self.transition(job_id, |job| {
            job.status = JobStatus::Failed;
            job.error = Some(error);
        })
    }

    fn remove(&self, job_id: &str) -> Option<ExportJob> {
        self.jobs.write().remove(job_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn job(id: &str) -> ExportJob {
        ExportJob::new(id, "alice", 1, Duration::from_secs(60))
    }

    #[test]
    fn test_transitions_are_monotone() {
        let store = MemoryJobStore::new();
        store.insert(job("j1"));

        assert!(store.record_progress("j1", "1/2".into()));
        assert!(store.mark_completed("j1", "exports/j1.zip".into(), "/dl".into()));
        assert!(!store.mark_failed("j1", "late failure".into()));
        assert!(!store.mark_completed("j1", "other".into(), "other".into()));
        assert!(!store.record_progress("j1", "2/2".into()));

        let found = store.get("j1").unwrap();
        assert_eq!(found.status, JobStatus::Completed);
        assert_eq!(found.progress.as_deref(), Some("Ready"));
        assert_eq!(found.result_path.as_deref(), Some("exports/j1.zip"));
        assert!(found.error.is_none());
    }

    #[test]
    fn test_failed_is_terminal() {
        let store = MemoryJobStore::new();
        store.insert(job("j1"));

        assert!(store.mark_failed("j1", "boom".into()));
        assert!(!store.mark_completed("j1", "p".into(), "u".into()));
        assert_eq!(store.get("j1").unwrap().error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_remove_is_idempotent() {
        let store = MemoryJobStore::new();
        store.insert(job("j1"));

        assert!(store.remove("j1").is_some());
        assert!(store.remove("j1").is_none());
        assert!(!store.mark_failed("j1", "gone".into()));
        assert!(store.is_empty());
    }
}
