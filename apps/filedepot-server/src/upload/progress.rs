//! Upload progress tracking
//!
//! In-memory counters republished to progress subscribers. A committed
//! upload leaves a terminal entry behind so late subscribers still see
//! `committed: true` and stop; the reaper prunes those entries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use parking_lot::Mutex;

use super::types::ProgressSnapshot;

#[derive(Debug, Clone, Copy)]
struct ProgressEntry {
    uploaded_bytes: u64,
    committed: bool,
    total_bytes: Option<u64>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Default)]
pub struct ProgressTracker {
    entries: Arc<Mutex<HashMap<String, ProgressEntry>>>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a zeroed counter for a new session
    pub fn register(&self, path: &str) {
        self.entries.lock().insert(
            path.to_string(),
            ProgressEntry {
                uploaded_bytes: 0,
                committed: false,
                total_bytes: None,
                updated_at: Utc::now(),
            },
        );
    }

    /// Publish the session's current total
    ///
    /// Totals only move forward, so a late write from a slower chunk never
    /// rolls the counter back.
    pub fn record(&self, path: &str, uploaded_bytes: u64) {
        let mut entries = self.entries.lock();
        let entry = entries.entry(path.to_string()).or_insert(ProgressEntry {
            uploaded_bytes: 0,
            committed: false,
            total_bytes: None,
            updated_at: Utc::now(),
        });
        if !entry.committed {
            entry.uploaded_bytes = entry.uploaded_bytes.max(uploaded_bytes);
            entry.updated_at = Utc::now();
        }
    }

    /// Publish the terminal event for a committed session
    pub fn complete(&self, path: &str, uploaded_bytes: u64, total_bytes: u64) {
        self.entries.lock().insert(
            path.to_string(),
            ProgressEntry {
                uploaded_bytes,
                committed: true,
                total_bytes: Some(total_bytes),
                updated_at: Utc::now(),
            },
        );
    }

    pub fn remove(&self, path: &str) {
        self.entries.lock().remove(path);
    }

    pub fn is_tracked(&self, path: &str) -> bool {
        self.entries.lock().contains_key(path)
    }

    /// Current state; unknown sessions read as zero and uncommitted
    pub fn snapshot(&self, path: &str) -> ProgressSnapshot {
        self.entries
            .lock()
            .get(path)
            .map(|e| ProgressSnapshot {
                bytes: e.uploaded_bytes,
                committed: e.committed,
                total_bytes: e.total_bytes,
            })
            .unwrap_or(ProgressSnapshot {
                bytes: 0,
                committed: false,
                total_bytes: None,
            })
    }

    /// Drop terminal entries older than `max_age`; returns how many went
    pub fn prune_committed(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !(e.committed && e.updated_at < cutoff));
        before - entries.len()
    }

    /// Poll the counter every `interval` until the session is committed
    ///
    /// The first snapshot is emitted immediately; the stream ends right after
    /// emitting a committed snapshot, or when the subscriber drops it.
    pub fn subscribe(
        &self,
        path: impl Into<String>,
        interval: Duration,
    ) -> impl Stream<Item = ProgressSnapshot> + Send + 'static {
        let tracker = self.clone();
        let path = path.into();

        stream::unfold((false, true), move |(done, first)| {
            let tracker = tracker.clone();
            let path = path.clone();
            async move {
                if done {
                    return None;
                }
                if !first {
                    tokio::time::sleep(interval).await;
                }
                let snapshot = tracker.snapshot(&path);
                Some((snapshot, (snapshot.committed, false)))
            }
        })
    }
}
