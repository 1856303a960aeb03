//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::db::{FileRepository, MemoryFileRepository};
use crate::export::{ExportEngine, ExportJobStore, ExportSweeper, MemoryJobStore};
use crate::storage::{BlobStorage, MemoryBlobStorage};
use crate::tasks::TaskSupervisor;
use crate::upload::{MemorySessionStore, ProgressTracker, SessionReaper, SessionStore, UploadCoordinator};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    storage: Arc<dyn BlobStorage>,
    sessions: Arc<dyn SessionStore>,
    files: Arc<dyn FileRepository>,
    uploads: UploadCoordinator,
    exports: ExportEngine,
    supervisor: TaskSupervisor,
}

impl AppState {
    /// Wire the coordinator and the export engine over the given backends
    pub fn new(
        config: Config,
        storage: Arc<dyn BlobStorage>,
        sessions: Arc<dyn SessionStore>,
        files: Arc<dyn FileRepository>,
        jobs: Arc<dyn ExportJobStore>,
        supervisor: TaskSupervisor,
    ) -> Self {
        let uploads = UploadCoordinator::new(
            storage.clone(),
            sessions.clone(),
            files.clone(),
            ProgressTracker::new(),
            config.upload.clone(),
        );
        let exports = ExportEngine::new(
            storage.clone(),
            files.clone(),
            jobs,
            supervisor.clone(),
            config.export.clone(),
        );

        Self {
            inner: Arc::new(AppStateInner {
                config,
                storage,
                sessions,
                files,
                uploads,
                exports,
                supervisor,
            }),
        }
    }

    /// Everything in process memory
    pub fn in_memory(config: Config) -> Self {
        Self::new(
            config,
            Arc::new(MemoryBlobStorage::new()),
            Arc::new(MemorySessionStore::new()),
            Arc::new(MemoryFileRepository::new()),
            Arc::new(MemoryJobStore::new()),
            TaskSupervisor::new(),
        )
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn storage(&self) -> &Arc<dyn BlobStorage> {
        &self.inner.storage
    }

    pub fn files(&self) -> &Arc<dyn FileRepository> {
        &self.inner.files
    }

    pub fn uploads(&self) -> &UploadCoordinator {
        &self.inner.uploads
    }

    pub fn exports(&self) -> &ExportEngine {
        &self.inner.exports
    }

    pub fn supervisor(&self) -> &TaskSupervisor {
        &self.inner.supervisor
    }

    /// Sweeper over this state's expired upload sessions
    pub fn reaper(&self) -> SessionReaper {
        SessionReaper::new(
            self.inner.storage.clone(),
            self.inner.sessions.clone(),
            self.inner.uploads.progress_tracker().clone(),
            self.inner.config.cleanup.clone(),
            self.inner.config.upload.session_ttl,
        )
    }

    /// Sweeper over this state's stale export archives
    pub fn export_sweeper(&self) -> ExportSweeper {
        ExportSweeper::new(self.inner.storage.clone(), &self.inner.config.export)
    }

    /// Start the periodic sweepers under the supervisor
    pub fn spawn_background(&self) {
        let token = self.inner.supervisor.token();
        self.inner
            .supervisor
            .spawn("session-reaper", self.reaper().run(token.clone()));
        self.inner
            .supervisor
            .spawn("export-sweeper", self.export_sweeper().run(token));
    }
}
