//! Upload Session Store
//!
//! Durable record of every in-flight upload, keyed by target path. The
//! coordinator and the reaper only need atomic single-key operations, so any
//! key-value backend will do:
//! - [`MemorySessionStore`] keeps sessions in process memory
//! - `SqliteSessionStore` (in `db`) persists them across restarts

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::types::UploadSession;
use crate::error::Result;

// ============================================================================
// Session Store Port
// ============================================================================

#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Insert a session, replacing any session already stored at its path
    async fn create(&self, session: &UploadSession) -> Result<()>;

    async fn get(&self, path: &str) -> Result<Option<UploadSession>>;

    /// Atomically add `bytes` to the uploaded total; returns the new total,
    /// or `None` when the session no longer exists
    async fn add_uploaded_bytes(&self, path: &str, bytes: u64) -> Result<Option<u64>>;

    /// Set the one-way committed flag; returns `false` when the session is unknown
    async fn mark_committed(&self, path: &str) -> Result<bool>;

    /// Remove a session; removing an unknown path is not an error
    async fn delete(&self, path: &str) -> Result<()>;

    /// Sessions whose expiry is before `before`, oldest expiry first, at most `max`
    async fn query_expired(&self, before: DateTime<Utc>, max: usize)
        -> Result<Vec<UploadSession>>;
}

// ============================================================================
// In-memory Store
// ============================================================================

#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, UploadSession>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

#[async_trait::async_trait]
impl SessionStore for MemorySessionStore {
    async fn create(&self, session: &UploadSession) -> Result<()> {
        self.sessions
            .write()
            .insert(session.path.clone(), session.clone());
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<UploadSession>> {
        Ok(self.sessions.read().get(path).cloned())
    }

    async fn add_uploaded_bytes(&self, path: &str, bytes: u64) -> Result<Option<u64>> {
        let mut sessions = self.sessions.write();
        Ok(sessions.get_mut(path).map(|session| {
            session.uploaded_bytes += bytes;
            session.uploaded_bytes
        }))
    }

    async fn mark_committed(&self, path: &str) -> Result<bool> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(path) {
            Some(session) => {
                session.committed = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.sessions.write().remove(path);
        Ok(())
    }

    async fn query_expired(
        &self,
        before: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<UploadSession>> {
        let sessions = self.sessions.read();
        let mut expired: Vec<UploadSession> = sessions
            .values()
            .filter(|s| s.is_expired_at(before))
            .cloned()
            .collect();
        expired.sort_by_key(|s| s.expires_at);
        expired.truncate(max);
        Ok(expired)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn session(path: &str) -> UploadSession {
        UploadSession::new(path, "a.bin", "application/octet-stream", 0, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = MemorySessionStore::new();
        store.create(&session("p1")).await.unwrap();

        let found = store.get("p1").await.unwrap().unwrap();
        assert_eq!(found.file_name, "a.bin");
        assert!(store.get("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_concurrent_increments_sum() {
        let store = MemorySessionStore::new();
        store.create(&session("p1")).await.unwrap();

        let tasks: Vec<_> = (1..=50u64)
            .map(|n| {
                let store = store.clone();
                tokio::spawn(async move { store.add_uploaded_bytes("p1", n).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let found = store.get("p1").await.unwrap().unwrap();
        assert_eq!(found.uploaded_bytes, (1..=50u64).sum::<u64>());
        assert_eq!(store.add_uploaded_bytes("missing", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_mark_committed_and_delete() {
        let store = MemorySessionStore::new();
        store.create(&session("p1")).await.unwrap();

        assert!(store.mark_committed("p1").await.unwrap());
        assert!(store.get("p1").await.unwrap().unwrap().committed);
        assert!(!store.mark_committed("nope").await.unwrap());

        store.delete("p1").await.unwrap();
        store.delete("p1").await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_query_expired_respects_cap() {
        let store = MemorySessionStore::new();
        for i in 0..5 {
            store.create(&session(&format!("p{}", i))).await.unwrap();
        }

        let now = Utc::now();
        assert!(store.query_expired(now, 10).await.unwrap().is_empty());

        let later = now + chrono::Duration::minutes(5);
        assert_eq!(store.query_expired(later, 3).await.unwrap().len(), 3);
        assert_eq!(store.query_expired(later, 10).await.unwrap().len(), 5);
    }
}
