//! Export Job Engine
//!
//! Accepts an export request, answers immediately with a pollable job, and
//! builds the zip in a supervised background task. Completed archives are
//! removed again once the job's retention window runs out.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use uuid::Uuid;

use super::archive::{write_archive, ArchiveError, ArchiveSource, ArchiveSummary};
use super::store::ExportJobStore;
use super::types::{ExportJob, JobStatus};
use crate::auth::Caller;
use crate::config::ExportConfig;
use crate::db::FileRepository;
use crate::error::{AppError, Result};
use crate::storage::{BlobStorage, ByteStream};
use crate::tasks::TaskSupervisor;

/// A completed archive, opened for streaming
pub struct ExportDownload {
    pub file_name: String,
    pub size: Option<u64>,
    pub stream: ByteStream,
}

#[derive(Clone)]
pub struct ExportEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    storage: Arc<dyn BlobStorage>,
    files: Arc<dyn FileRepository>,
    jobs: Arc<dyn ExportJobStore>,
    supervisor: TaskSupervisor,
    config: ExportConfig,
}

impl ExportEngine {
    pub fn new(
        storage: Arc<dyn BlobStorage>,
        files: Arc<dyn FileRepository>,
        jobs: Arc<dyn ExportJobStore>,
        supervisor: TaskSupervisor,
        config: ExportConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                storage,
                files,
                jobs,
                supervisor,
                config,
            }),
        }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.inner.config
    }

    pub fn archive_path(&self, job_id: &str) -> String {
        format!("{}{}.zip", self.inner.config.prefix, job_id)
    }

    pub fn download_url(job_id: &str) -> String {
        format!("/api/v1/export/{}/download", job_id)
    }

    /// Register a job over the objects `caller` may read and start building
    ///
    /// Ids that are unknown, deleted or owned by someone else are dropped
    /// silently; only an empty remainder is an error.
    pub async fn start_export(&self, object_ids: &[String], caller: &Caller) -> Result<ExportJob> {
        if object_ids.is_empty() {
            return Err(AppError::Validation("No file IDs provided".to_string()));
        }

        let mut sources = Vec::with_capacity(object_ids.len());
        for id in object_ids {
            match self.inner.files.get(id).await? {
                Some(record) if !record.is_deleted && caller.can_access(&record.owner_id) => {
                    sources.push(ArchiveSource {
                        file_name: record.file_name,
                        path: record.path,
                        size_bytes: record.size_bytes,
                    });
                }
                _ => tracing::debug!(file_id = %id, "Skipping inaccessible export entry"),
            }
        }

        if sources.is_empty() {
            return Err(AppError::NotFound("No valid files found to download".to_string()));
        }

        let job = ExportJob::new(
            Uuid::new_v4().to_string(),
            caller.owner_id(),
            sources.len(),
            self.inner.config.retention,
        );
        self.inner.jobs.insert(job.clone());

        tracing::info!(
            job_id = %job.job_id,
            requested = object_ids.len(),
            accepted = sources.len(),
            "Export job started"
        );

        let engine = self.clone();
        let job_id = job.job_id.clone();
        self.inner
            .supervisor
            .spawn("export-build", async move { engine.run_build(job_id, sources).await });

        Ok(job)
    }

    /// Current job record, if `caller` may see it
    pub fn status(&self, job_id: &str, caller: &Caller) -> Result<ExportJob> {
        Uuid::parse_str(job_id)
            .map_err(|_| AppError::Validation(format!("Invalid job id: {}", job_id)))?;

        let job = self
            .inner
            .jobs
            .get(job_id)
            .ok_or_else(|| AppError::NotFound(format!("Export job not found: {}", job_id)))?;

        if !caller.can_access(&job.owner_id) {
            return Err(AppError::Forbidden("Not allowed to access this export".to_string()));
        }
        Ok(job)
    }

    /// Delete the archive and forget the job
    ///
    /// A second call answers not-found. Jobs still building are refused.
    pub async fn cleanup(&self, job_id: &str, caller: &Caller) -> Result<()> {
        let job = self.status(job_id, caller)?;

        match job.status {
            JobStatus::Processing => {
                return Err(AppError::Validation(
                    "Export job is still processing".to_string(),
                ));
            }
            JobStatus::Completed => {
                if let Some(path) = &job.result_path {
                    self.inner.storage.delete(path).await?;
                }
            }
            JobStatus::Failed => {}
        }

        self.inner.jobs.remove(job_id);
        tracing::info!(job_id = %job_id, "Export job cleaned up");
        Ok(())
    }

    pub async fn open_download(&self, job_id: &str, caller: &Caller) -> Result<ExportDownload> {
        let job = self.status(job_id, caller)?;

        let path = match (job.status, job.result_path) {
            (JobStatus::Completed, Some(path)) => path,
            _ => return Err(AppError::Validation("Export job is not ready".to_string())),
        };

        let size = self.inner.storage.stat(&path).await?.map(|m| m.size);
        let stream = self
            .inner
            .storage
            .open_read(&path)
            .await?
            .ok_or_else(|| AppError::NotFound("Export archive not found".to_string()))?;

        Ok(ExportDownload {
            file_name: format!("export-{}.zip", job_id),
            size,
            stream,
        })
    }

    // ========================================================================
    // Background work
    // ========================================================================

    async fn run_build(self, job_id: String, sources: Vec<ArchiveSource>) {
        let outcome = AssertUnwindSafe(self.build(&job_id, &sources))
            .catch_unwind()
            .await;
        let jobs = &self.inner.jobs;

        match outcome {
            Ok(Ok(summary)) => {
                let path = self.archive_path(&job_id);
                if jobs.mark_completed(&job_id, path.clone(), Self::download_url(&job_id)) {
                    tracing::info!(
                        job_id = %job_id,
                        entries = summary.entries,
                        missing = summary.missing,
                        failed = summary.failed,
                        bytes = summary.bytes,
                        "Export job completed"
                    );
                } else {
                    tracing::warn!(job_id = %job_id, "Export job gone before completion, discarding archive");
                    if let Err(e) = self.inner.storage.delete(&path).await {
                        tracing::warn!(job_id = %job_id, "Failed to discard archive: {}", e);
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::error!(job_id = %job_id, "Export job failed: {}", e);
                jobs.mark_failed(&job_id, e.to_string());
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(job_id = %job_id, "Export build panicked: {}", message);
                jobs.mark_failed(&job_id, message);
            }
        }

        self.schedule_expiry(&job_id);
    }

    async fn build(
        &self,
        job_id: &str,
        sources: &[ArchiveSource],
    ) -> std::result::Result<ArchiveSummary, ArchiveError> {
        let path = self.archive_path(job_id);
        let sink = self.inner.storage.open_write(&path, "application/zip").await?;

        let jobs = self.inner.jobs.clone();
        let id = job_id.to_string();
        write_archive(self.inner.storage.as_ref(), sink, sources, move |done, total| {
            jobs.record_progress(&id, format!("{}/{}", done, total));
        })
        .await
    }

    /// Drop the job and its archive once the retention window has passed
    fn schedule_expiry(&self, job_id: &str) {
        let Some(job) = self.inner.jobs.get(job_id) else {
            return;
        };
        let delay = (job.expires_at - Utc::now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        let engine = self.clone();
        let job_id = job_id.to_string();
        self.inner
            .supervisor
            .spawn_after("export-expiry", delay, async move { engine.expire(&job_id).await });
    }

    async fn expire(&self, job_id: &str) {
        let Some(job) = self.inner.jobs.remove(job_id) else {
            tracing::debug!(job_id = %job_id, "Export job already cleaned up");
            return;
        };

        if let Some(path) = job.result_path {
            if let Err(e) = self.inner.storage.delete(&path).await {
                tracing::warn!(job_id = %job_id, "Failed to delete expired archive {}: {}", path, e);
            }
        }
        tracing::info!(job_id = %job_id, "Export job expired");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "Export build panicked".to_string()
    }
}
