//! Orphaned archive sweeper
//!
//! Expiry timers live in process memory, so a restart forgets them. This
//! sweep deletes any archive under the export prefix that outlived the
//! retention window.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::config::ExportConfig;
use crate::error::Result;
use crate::storage::BlobStorage;

#[derive(Clone)]
pub struct ExportSweeper {
    storage: Arc<dyn BlobStorage>,
    prefix: String,
    retention: Duration,
    interval: Duration,
}

impl ExportSweeper {
    pub fn new(storage: Arc<dyn BlobStorage>, config: &ExportConfig) -> Self {
        Self {
            storage,
            prefix: config.prefix.clone(),
            retention: config.retention,
            interval: config.sweep_interval,
        }
    }

    pub async fn run(self, token: CancellationToken) {
        tracing::info!(interval = ?self.interval, prefix = %self.prefix, "Export sweeper started");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = interval.tick() => {}
            }

            match self.run_once().await {
                Ok(0) => {}
                Ok(deleted) => tracing::info!(deleted, "Deleted stale export archives"),
                Err(e) => tracing::error!("Export sweep failed: {}", e),
            }
        }

        tracing::info!("Export sweeper stopping");
    }

    /// Delete stale archives; returns how many went
    pub async fn run_once(&self) -> Result<usize> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.retention).unwrap_or(chrono::Duration::hours(2));
        let mut deleted = 0;

        for object in self.storage.list(&self.prefix).await? {
            if !object.modified_before(cutoff) {
                continue;
            }
            match self.storage.delete(&object.key).await {
                Ok(()) => {
                    tracing::debug!(key = %object.key, "Deleted stale export archive");
                    deleted += 1;
                }
                Err(e) => tracing::warn!(key = %object.key, "Failed to delete stale archive: {}", e),
            }
        }

        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBlobStorage;

    #[tokio::test]
    async fn test_sweeps_only_stale_archives() {
        let storage = MemoryBlobStorage::new();
        storage.put("exports/old.zip", "old", "application/zip");
        storage.put("exports/fresh.zip", "fresh", "application/zip");
        storage.put("keep_old.bin", "upload", "application/octet-stream");

        let three_hours_ago = Utc::now() - chrono::Duration::hours(3);
        storage.set_modified("exports/old.zip", three_hours_ago);
        storage.set_modified("keep_old.bin", three_hours_ago);

        let sweeper = ExportSweeper::new(Arc::new(storage.clone()), &ExportConfig::default());
        assert_eq!(sweeper.run_once().await.unwrap(), 1);

        assert!(storage.object_bytes("exports/old.zip").is_none());
        assert!(storage.object_bytes("exports/fresh.zip").is_some());
        assert!(storage.object_bytes("keep_old.bin").is_some());
        assert_eq!(sweeper.run_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stops_on_cancel() {
        let sweeper = ExportSweeper::new(
            Arc::new(MemoryBlobStorage::new()),
            &ExportConfig::default(),
        );
        let token = CancellationToken::new();
        let handle = tokio::spawn(sweeper.run(token.clone()));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
