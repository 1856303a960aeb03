//! Session Reaper
//!
//! Periodic sweep retiring upload sessions that expired before they were
//! committed. Each sweep:
//! - fetches at most `max_sessions_per_run` expired sessions
//! - aborts their staged blocks, retrying with capped exponential backoff
//! - deletes the session record whatever the abort outcome, with the same retries
//!
//! Anything that still fails is logged and picked up again by the next sweep.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio_util::sync::CancellationToken;

use super::progress::ProgressTracker;
use super::session::SessionStore;
use crate::config::CleanupConfig;
use crate::error::Result;
use crate::storage::BlobStorage;

/// Outcome of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub processed: usize,
    pub aborted: usize,
    pub deleted: usize,
    pub failed_aborts: usize,
    pub failed_deletes: usize,
    /// Committed progress entries dropped
    pub pruned_progress: usize,
}

#[derive(Clone)]
pub struct SessionReaper {
    storage: Arc<dyn BlobStorage>,
    sessions: Arc<dyn SessionStore>,
    progress: ProgressTracker,
    config: CleanupConfig,
    /// How long a committed progress entry lingers
    progress_ttl: Duration,
}

impl SessionReaper {
    pub fn new(
        storage: Arc<dyn BlobStorage>,
        sessions: Arc<dyn SessionStore>,
        progress: ProgressTracker,
        config: CleanupConfig,
        progress_ttl: Duration,
    ) -> Self {
        Self {
            storage,
            sessions,
            progress,
            config,
            progress_ttl,
        }
    }

    /// Sweep until `token` is cancelled, once immediately and then every interval
    pub async fn run(self, token: CancellationToken) {
        tracing::info!(interval = ?self.config.interval, "Session reaper started");
        let mut interval = tokio::time::interval(self.config.interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.run_once().await {
                Ok(report) if report.processed > 0 || report.pruned_progress > 0 => {
                    tracing::info!(
                        processed = report.processed,
                        aborted = report.aborted,
                        deleted = report.deleted,
                        failed_aborts = report.failed_aborts,
                        failed_deletes = report.failed_deletes,
                        pruned_progress = report.pruned_progress,
                        "Session sweep finished"
                    );
                }
                Ok(_) => {}
                Err(e) => tracing::error!("Session sweep failed: {}", e),
            }
        }

        tracing::info!("Session reaper stopping");
    }

    /// One sweep over the expired sessions
    pub async fn run_once(&self) -> Result<ReapReport> {
        let mut report = ReapReport {
            pruned_progress: self.progress.prune_committed(self.progress_ttl),
            ..ReapReport::default()
        };

        let cap = self.config.max_sessions_per_run;
        let expired = self.sessions.query_expired(Utc::now(), cap).await?;

        for session in expired.into_iter().take(cap) {
            let path = session.path.as_str();
            tracing::info!(session_path = %path, "Cleaning expired upload session");

            // A committed object has no staged blocks left to discard
            if !session.committed {
                let aborted = self
                    .with_retry("abort staged blocks", path, || self.storage.abort_staged(path))
                    .await;
                if aborted {
                    report.aborted += 1;
                } else {
                    report.failed_aborts += 1;
                }
            }

            if self
                .with_retry("delete session record", path, || self.sessions.delete(path))
                .await
            {
                report.deleted += 1;
                self.progress.remove(path);
            } else {
                report.failed_deletes += 1;
            }

            report.processed += 1;
        }

        Ok(report)
    }

    /// Run `op` up to `retry_count` times; `false` once every attempt failed
    async fn with_retry<F, Fut, E>(&self, what: &str, path: &str, mut op: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<(), E>>,
        E: Display,
    {
        let attempts = self.config.retry_count.max(1);

        for attempt in 0..attempts {
            match op().await {
                Ok(()) => return true,
                Err(e) => {
                    tracing::warn!(
                        session_path = %path,
                        attempt = attempt + 1,
                        "Attempt to {} failed: {}",
                        what,
                        e
                    );
                    if attempt + 1 < attempts {
                        tokio::time::sleep(self.backoff(attempt)).await;
                    }
                }
            }
        }

        tracing::warn!(
            session_path = %path,
            attempts,
            "Failed to {} after every attempt",
            what
        );
        false
    }

    /// Full jitter over `min(max_delay, base_delay * 2^attempt)`
    fn backoff(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as u64;
        let max = self.config.max_delay.as_millis() as u64;
        let delay = base.saturating_mul(1u64 << attempt.min(32)).min(max);

        if delay == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AppError, StorageError};
    use crate::storage::{BlobWriter, ByteStream, MemoryBlobStorage, ObjectMetadata};
    use crate::upload::{MemorySessionStore, UploadSession};
    use bytes::Bytes;
    use chrono::DateTime;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(max_sessions_per_run: usize) -> CleanupConfig {
        CleanupConfig {
            max_sessions_per_run,
            ..CleanupConfig::default()
        }
    }

    async fn expired_session(store: &MemorySessionStore, path: &str, committed: bool) {
        let mut session = UploadSession::new(path, "a.bin", "application/octet-stream", 0, Duration::from_secs(60));
        session.expires_at = Utc::now() - chrono::Duration::hours(1);
        session.committed = committed;
        store.create(&session).await.unwrap();
    }

    fn reaper(
        storage: Arc<dyn BlobStorage>,
        sessions: Arc<dyn SessionStore>,
        config: CleanupConfig,
    ) -> SessionReaper {
        SessionReaper::new(storage, sessions, ProgressTracker::new(), config, Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn test_sweep_respects_per_run_cap() {
        let storage = MemoryBlobStorage::new();
        let sessions = MemorySessionStore::new();
        for i in 0..7 {
            let path = format!("p{}", i);
            expired_session(&sessions, &path, false).await;
            storage.stage_chunk(&path, "b0", Bytes::from_static(b"x")).await.unwrap();
        }
        let live = UploadSession::new("live", "a.bin", "application/octet-stream", 0, Duration::from_secs(60));
        sessions.create(&live).await.unwrap();

        let reaper = reaper(Arc::new(storage.clone()), Arc::new(sessions.clone()), config(5));

        let report = reaper.run_once().await.unwrap();
        assert_eq!(report.processed, 5);
        assert_eq!(report.aborted, 5);
        assert_eq!(report.deleted, 5);
        assert_eq!(sessions.len(), 3);

        let report = reaper.run_once().await.unwrap();
        assert_eq!(report.processed, 2);
        assert_eq!(sessions.len(), 1);
        assert!(sessions.get("live").await.unwrap().is_some());
        assert!((0..7).all(|i| storage.staged_block_ids(&format!("p{}", i)).is_empty()));
    }

    #[tokio::test]
    async fn test_committed_sessions_skip_abort() {
        let sessions = MemorySessionStore::new();
        expired_session(&sessions, "done", true).await;

        let reaper = reaper(Arc::new(MemoryBlobStorage::new()), Arc::new(sessions.clone()), config(10));
        let report = reaper.run_once().await.unwrap();

        assert_eq!(report.aborted, 0);
        assert_eq!(report.deleted, 1);
        assert!(sessions.is_empty());
    }

    /// Abort fails the first `failures` times it is called
    struct FlakyStorage {
        inner: MemoryBlobStorage,
        failures: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl BlobStorage for FlakyStorage {
        async fn stage_chunk(&self, p: &str, b: &str, d: Bytes) -> std::result::Result<(), StorageError> {
            self.inner.stage_chunk(p, b, d).await
        }
        async fn commit_chunks(&self, p: &str, ids: &[String], ct: &str) -> std::result::Result<u64, StorageError> {
            self.inner.commit_chunks(p, ids, ct).await
        }
        async fn abort_staged(&self, p: &str) -> std::result::Result<(), StorageError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.failures {
                return Err(StorageError::SdkError("throttled".into()));
            }
            self.inner.abort_staged(p).await
        }
        async fn open_write(&self, p: &str, ct: &str) -> std::result::Result<Box<dyn BlobWriter>, StorageError> {
            self.inner.open_write(p, ct).await
        }
        async fn open_read(&self, p: &str) -> std::result::Result<Option<ByteStream>, StorageError> {
            self.inner.open_read(p).await
        }
        async fn stat(&self, p: &str) -> std::result::Result<Option<ObjectMetadata>, StorageError> {
            self.inner.stat(p).await
        }
        async fn delete(&self, p: &str) -> std::result::Result<(), StorageError> {
            self.inner.delete(p).await
        }
        async fn list(&self, p: &str) -> std::result::Result<Vec<ObjectMetadata>, StorageError> {
            self.inner.list(p).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_abort_failures_are_retried() {
        let storage = Arc::new(FlakyStorage {
            inner: MemoryBlobStorage::new(),
            failures: 2,
            calls: AtomicUsize::new(0),
        });
        let sessions = MemorySessionStore::new();
        expired_session(&sessions, "p", false).await;

        let reaper = reaper(storage.clone(), Arc::new(sessions.clone()), config(10));
        let report = reaper.run_once().await.unwrap();

        assert_eq!(storage.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.aborted, 1);
        assert_eq!(report.failed_aborts, 0);
        assert!(sessions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_deleted_even_when_abort_keeps_failing() {
        let storage = Arc::new(FlakyStorage {
            inner: MemoryBlobStorage::new(),
            failures: usize::MAX,
            calls: AtomicUsize::new(0),
        });
        let sessions = MemorySessionStore::new();
        expired_session(&sessions, "p", false).await;

        let reaper = reaper(storage.clone(), Arc::new(sessions.clone()), config(10));
        let report = reaper.run_once().await.unwrap();

        assert_eq!(storage.calls.load(Ordering::SeqCst), 3);
        assert_eq!(report.failed_aborts, 1);
        assert_eq!(report.deleted, 1);
        assert!(sessions.is_empty());
    }

    /// Session store whose deletes always fail
    struct StickyStore(MemorySessionStore);

    #[async_trait::async_trait]
    impl SessionStore for StickyStore {
        async fn create(&self, s: &UploadSession) -> Result<()> {
            self.0.create(s).await
        }
        async fn get(&self, p: &str) -> Result<Option<UploadSession>> {
            self.0.get(p).await
        }
        async fn add_uploaded_bytes(&self, p: &str, b: u64) -> Result<Option<u64>> {
            self.0.add_uploaded_bytes(p, b).await
        }
        async fn mark_committed(&self, p: &str) -> Result<bool> {
            self.0.mark_committed(p).await
        }
        async fn delete(&self, _: &str) -> Result<()> {
            Err(AppError::Internal("table unavailable".into()))
        }
        async fn query_expired(&self, before: DateTime<Utc>, max: usize) -> Result<Vec<UploadSession>> {
            self.0.query_expired(before, max).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_delete_is_retried_next_sweep() {
        let inner = MemorySessionStore::new();
        expired_session(&inner, "p", false).await;

        let reaper = reaper(
            Arc::new(MemoryBlobStorage::new()),
            Arc::new(StickyStore(inner.clone())),
            config(10),
        );

        let report = reaper.run_once().await.unwrap();
        assert_eq!(report.failed_deletes, 1);
        assert_eq!(inner.len(), 1);

        let report = reaper.run_once().await.unwrap();
        assert_eq!(report.processed, 1);
    }

    #[test]
    fn test_backoff_is_capped() {
        let reaper = reaper(
            Arc::new(MemoryBlobStorage::new()),
            Arc::new(MemorySessionStore::new()),
            CleanupConfig {
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_millis(500),
                ..CleanupConfig::default()
            },
        );

        for attempt in 0..40 {
            assert!(reaper.backoff(attempt) < Duration::from_millis(500));
        }
        assert!(reaper.backoff(0) < Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let sessions = MemorySessionStore::new();
        expired_session(&sessions, "p", false).await;

        let reaper = reaper(Arc::new(MemoryBlobStorage::new()), Arc::new(sessions.clone()), config(10));
        let token = CancellationToken::new();
        let handle = tokio::spawn(reaper.run(token.clone()));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(sessions.is_empty());

        token.cancel();
        handle.await.unwrap();
    }
}
