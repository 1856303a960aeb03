//! Upload session persistence

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::Result;
use crate::upload::{SessionStore, UploadSession};

#[derive(Debug, sqlx::FromRow)]
struct SessionRow {
    path: String,
    file_name: String,
    content_type: String,
    total_bytes: i64,
    uploaded_bytes: i64,
    committed: bool,
    created_at: i64,
    expires_at: i64,
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

impl From<SessionRow> for UploadSession {
    fn from(row: SessionRow) -> Self {
        UploadSession {
            path: row.path,
            file_name: row.file_name,
            content_type: row.content_type,
            total_bytes: row.total_bytes.max(0) as u64,
            uploaded_bytes: row.uploaded_bytes.max(0) as u64,
            committed: row.committed,
            created_at: from_millis(row.created_at),
            expires_at: from_millis(row.expires_at),
        }
    }
}

/// Session store backed by the `upload_sessions` table
#[derive(Clone)]
pub struct SqliteSessionStore {
    pool: SqlitePool,
}

impl SqliteSessionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create(&self, session: &UploadSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO upload_sessions
                (path, file_name, content_type, total_bytes, uploaded_bytes, committed,
                 created_at, expires_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.path)
        .bind(&session.file_name)
        .bind(&session.content_type)
        .bind(session.total_bytes as i64)
        .bind(session.uploaded_bytes as i64)
        .bind(session.committed)
        .bind(session.created_at.timestamp_millis())
        .bind(session.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<UploadSession>> {
        let row = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT path, file_name, content_type, total_bytes, uploaded_bytes, committed,
                   created_at, expires_at
            FROM upload_sessions
            WHERE path = ?
            "#,
        )
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(UploadSession::from))
    }

    async fn add_uploaded_bytes(&self, path: &str, bytes: u64) -> Result<Option<u64>> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE upload_sessions
            SET uploaded_bytes = uploaded_bytes + ?
            WHERE path = ?
            RETURNING uploaded_bytes
            "#,
        )
        .bind(bytes as i64)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(total.map(|t| t.max(0) as u64))
    }

    async fn mark_committed(&self, path: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE upload_sessions SET committed = 1 WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM upload_sessions WHERE path = ?")
            .bind(path)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn query_expired(
        &self,
        before: DateTime<Utc>,
        max: usize,
    ) -> Result<Vec<UploadSession>> {
        let rows = sqlx::query_as::<_, SessionRow>(
            r#"
            SELECT path, file_name, content_type, total_bytes, uploaded_bytes, committed,
                   created_at, expires_at
            FROM upload_sessions
            WHERE expires_at < ?
            ORDER BY expires_at ASC
            LIMIT ?
            "#,
        )
        .bind(before.timestamp_millis())
        .bind(max as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(UploadSession::from).collect())
    }
}
