//! Upload Coordinator
//!
//! Drives the resumable upload protocol:
//! 1. `start` opens a session keyed by a fresh target path
//! 2. `apply_chunk` stages blocks in any order, gated by one global budget
//! 3. `commit` assembles the blocks in the caller's order and records the file
//! 4. `abort` discards everything staged for the path

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::Semaphore;
use uuid::Uuid;

use super::progress::ProgressTracker;
use super::range::verify_length;
use super::session::SessionStore;
use super::types::{
    ChunkResponse, CommitRequest, CommitResponse, ProgressSnapshot, StartUploadRequest,
    StartUploadResponse, UploadSession, DEFAULT_FILE_NAME,
};
use crate::config::UploadConfig;
use crate::db::{FileRecord, FileRepository};
use crate::error::{AppError, Result};
use crate::storage::{guess_content_type, BlobStorage};

// ============================================================================
// Upload Coordinator
// ============================================================================

#[derive(Clone)]
pub struct UploadCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    storage: Arc<dyn BlobStorage>,
    sessions: Arc<dyn SessionStore>,
    files: Arc<dyn FileRepository>,
    progress: ProgressTracker,
    /// In-flight chunk budget shared by every session
    budget: Arc<Semaphore>,
    config: UploadConfig,
}

impl UploadCoordinator {
    pub fn new(
        storage: Arc<dyn BlobStorage>,
        sessions: Arc<dyn SessionStore>,
        files: Arc<dyn FileRepository>,
        progress: ProgressTracker,
        config: UploadConfig,
    ) -> Self {
        let budget = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            inner: Arc::new(CoordinatorInner {
                storage,
                sessions,
                files,
                progress,
                budget,
                config,
            }),
        }
    }

    pub fn config(&self) -> &UploadConfig {
        &self.inner.config
    }

    /// Free slots in the chunk budget
    pub fn available_slots(&self) -> usize {
        self.inner.budget.available_permits()
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Open a new upload session
    pub async fn start(&self, request: StartUploadRequest) -> Result<StartUploadResponse> {
        let file_name = sanitize_file_name(request.file_name.as_deref());
        let content_type = request
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| guess_content_type(&file_name));
        let path = format!("{}_{}", Uuid::new_v4(), file_name);

        let session = UploadSession::new(
            path.clone(),
            file_name.clone(),
            content_type.clone(),
            request.total_bytes.unwrap_or(0),
            self.inner.config.session_ttl,
        );
        self.inner.sessions.create(&session).await?;
        self.inner.progress.register(&path);

        tracing::info!(
            session_path = %path,
            file_name = %file_name,
            total_bytes = session.total_bytes,
            "Created upload session"
        );

        Ok(StartUploadResponse {
            session_path: path,
            file_name,
            content_type,
            expires_at: session.expires_at,
        })
    }

    /// Stage one chunk of an upload
    ///
    /// Waits for a slot in the global budget first; once the slot is held the
    /// storage write runs in its own task, so a client that disconnects
    /// mid-request cannot leave a half-staged block behind.
    pub async fn apply_chunk(
        &self,
        path: &str,
        block_id: &str,
        content_range: Option<&str>,
        payload: Bytes,
    ) -> Result<ChunkResponse> {
        let permit = tokio::time::timeout(
            self.inner.config.acquire_timeout,
            self.inner.budget.clone().acquire_owned(),
        )
        .await
        .map_err(|_| {
            tracing::warn!(session_path = %path, "Timed out waiting for an upload slot");
            AppError::CapacityExceeded
        })?
        .map_err(|_| AppError::Internal("Upload budget closed".to_string()))?;

        if block_id.trim().is_empty() {
            return Err(AppError::Validation("blockId is required".to_string()));
        }

        let size = payload.len() as u64;
        verify_length(content_range, size)?;

        let max = self.inner.config.max_chunk_bytes;
        if size > max {
            return Err(AppError::Validation(format!(
                "Block size too large. Maximum {} allowed",
                format_bytes(max)
            )));
        }

        if self.inner.sessions.get(path).await?.is_none() {
            return Err(AppError::NotFound(format!("Upload session not found: {}", path)));
        }

        let inner = self.inner.clone();
        let path = path.to_string();
        let block_id = block_id.to_string();

        let staged = tokio::spawn(async move {
            let _permit = permit;

            inner.storage.stage_chunk(&path, &block_id, payload).await?;
            let Some(total) = inner.sessions.add_uploaded_bytes(&path, size).await? else {
                // Aborted or committed while this block was being written
                tracing::warn!(
                    session_path = %path,
                    block_id = %block_id,
                    "Session vanished mid-chunk, discarding staged data"
                );
                inner.storage.abort_staged(&path).await?;
                return Err(AppError::NotFound(format!("Upload session not found: {}", path)));
            };
            inner.progress.record(&path, total);

            tracing::debug!(
                session_path = %path,
                block_id = %block_id,
                size,
                uploaded_bytes = total,
                "Staged chunk"
            );

            Ok::<_, AppError>(ChunkResponse {
                block_id,
                size,
                uploaded_bytes: total,
            })
        });

        staged
            .await
            .map_err(|e| AppError::Internal(format!("Chunk task failed: {}", e)))?
    }

    /// Assemble the staged blocks into the final object
    ///
    /// Block ids that were never staged are skipped, not rejected; the
    /// storage backend logs each one. The session is only flagged committed
    /// once the file record exists, so a commit that failed after assembly
    /// can be retried and picks up the object already in place.
    pub async fn commit(
        &self,
        path: &str,
        request: CommitRequest,
        owner_id: Option<&str>,
    ) -> Result<CommitResponse> {
        let block_ids = request
            .block_ids
            .ok_or_else(|| AppError::Validation("blockIds array required".to_string()))?;

        let session = self
            .inner
            .sessions
            .get(path)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Upload session not found: {}", path)))?;
        if session.committed {
            return Err(AppError::Validation(format!(
                "Upload session already committed: {}",
                path
            )));
        }

        let file_name = request
            .file_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| session.file_name.clone());
        let content_type = request
            .content_type
            .filter(|ct| !ct.trim().is_empty())
            .unwrap_or_else(|| session.content_type.clone());

        let assembled = match self.inner.storage.stat(path).await? {
            Some(existing) => {
                tracing::info!(
                    session_path = %path,
                    size = existing.size,
                    "Object already assembled by an earlier commit attempt"
                );
                existing.size
            }
            None => {
                self.inner
                    .storage
                    .commit_chunks(path, &block_ids, &content_type)
                    .await?
            }
        };

        let uploaded = session.uploaded_bytes;
        if assembled != uploaded {
            tracing::warn!(
                session_path = %path,
                assembled,
                uploaded_bytes = uploaded,
                "Committed object size differs from tracked upload total"
            );
        }

        let record = FileRecord::new(
            file_name.clone(),
            content_type,
            uploaded,
            owner_id.unwrap_or_default(),
            path,
        );
        self.inner.files.add(&record).await?;
        self.inner.sessions.mark_committed(path).await?;

        self.inner.progress.complete(path, uploaded, record.size_bytes);
        if let Err(e) = self.inner.sessions.delete(path).await {
            tracing::warn!(session_path = %path, "Failed to remove committed session: {}", e);
        }

        tracing::info!(
            session_path = %path,
            file_id = %record.id,
            blocks = block_ids.len(),
            size = uploaded,
            "Upload committed"
        );

        Ok(CommitResponse {
            id: record.id,
            file_name,
            size: uploaded,
        })
    }

    /// Discard a session and everything staged for it; idempotent
    pub async fn abort(&self, path: &str) -> Result<()> {
        self.inner.storage.abort_staged(path).await?;
        self.inner.sessions.delete(path).await?;
        self.inner.progress.remove(path);

        tracing::info!(session_path = %path, "Upload aborted");
        Ok(())
    }

    /// Progress events for a session until it commits
    ///
    /// A session with no live counter (one that outlived a restart) is
    /// reseeded from its stored total first.
    pub async fn progress(
        &self,
        path: &str,
    ) -> Result<impl Stream<Item = ProgressSnapshot> + Send + 'static> {
        if !self.inner.progress.is_tracked(path) {
            let session = self
                .inner
                .sessions
                .get(path)
                .await?
                .ok_or_else(|| AppError::NotFound(format!("Upload session not found: {}", path)))?;
            self.inner.progress.record(path, session.uploaded_bytes);
        }

        Ok(self
            .inner
            .progress
            .subscribe(path.to_string(), self.inner.config.progress_interval))
    }

    pub async fn session(&self, path: &str) -> Result<Option<UploadSession>> {
        self.inner.sessions.get(path).await
    }

    pub fn progress_tracker(&self) -> &ProgressTracker {
        &self.inner.progress
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Keep only the final path component of a client-supplied name
fn sanitize_file_name(name: Option<&str>) -> String {
    let name = name
        .and_then(|n| n.rsplit(['/', '\\']).next())
        .map(str::trim)
        .unwrap_or_default();

    match name {
        "" | "." | ".." => DEFAULT_FILE_NAME.to_string(),
        name => name.to_string(),
    }
}

/// Human-readable byte count, two decimals at most
pub fn format_bytes(bytes: u64) -> String {
    let round = |v: f64| (v * 100.0).round() / 100.0;
    if bytes >= 1024 * 1024 {
        format!("{} MB", round(bytes as f64 / (1024.0 * 1024.0)))
    } else if bytes >= 1024 {
        format!("{} KB", round(bytes as f64 / 1024.0))
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
