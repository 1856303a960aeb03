//! Supervised background work
//!
//! Export builds, delayed cleanups and the periodic sweepers all run through a
//! [`TaskSupervisor`] so shutdown can drain them instead of abandoning them.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Owner of every detached task the server starts
#[derive(Clone, Default)]
pub struct TaskSupervisor {
    tracker: TaskTracker,
    token: CancellationToken,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled when shutdown begins; long-running loops select on it
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Run `fut` to completion; shutdown waits for it within the grace period
    pub fn spawn<F>(&self, name: &'static str, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::debug!(task = name, "Spawning task");
        self.tracker.spawn(fut);
    }

    /// Run `fut` after `delay`, unless shutdown starts first
    pub fn spawn_after<F>(&self, name: &'static str, delay: Duration, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let token = self.token.clone();
        self.tracker.spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(task = name, "Delayed task cancelled by shutdown");
                }
                _ = tokio::time::sleep(delay) => fut.await,
            }
        });
    }

    /// Number of tasks still running or waiting
    pub fn active(&self) -> usize {
        self.tracker.len()
    }

    /// Cancel timers and loops, then wait up to `grace` for in-flight work
    ///
    /// Returns `false` when the grace period ran out first.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.token.cancel();
        self.tracker.close();

        let pending = self.tracker.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for background tasks to finish");
        }

        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    pending = self.tracker.len(),
                    "Background tasks still running after {:?}",
                    grace
                );
                false
            }
        }
    }
}
