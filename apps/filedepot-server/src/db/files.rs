//! File metadata repository
//!
//! One record per committed upload. Deletion is soft by default so the
//! record stays around for audit; listings skip soft-deleted records.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::Result;

/// Permanent record of a committed object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    /// Empty when the upload had no caller identity
    pub owner_id: String,
    pub uploaded_at: DateTime<Utc>,
    /// Object path in blob storage
    #[serde(skip_serializing)]
    pub path: String,
    pub is_deleted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn new(
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        size_bytes: u64,
        owner_id: impl Into<String>,
        path: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            size_bytes,
            owner_id: owner_id.into(),
            uploaded_at: Utc::now(),
            path: path.into(),
            is_deleted: false,
            deleted_at: None,
        }
    }

    /// Case-insensitive owner match
    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id.eq_ignore_ascii_case(user_id)
    }
}

// ============================================================================
// Repository Port
// ============================================================================

#[async_trait::async_trait]
pub trait FileRepository: Send + Sync {
    async fn add(&self, record: &FileRecord) -> Result<()>;

    /// Fetch a record, soft-deleted ones included
    async fn get(&self, id: &str) -> Result<Option<FileRecord>>;

    /// Live records of one owner, newest first
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>>;

    /// Live records of every owner, newest first
    async fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<FileRecord>>;

    /// Remove the record for good; returns `false` when it was unknown
    async fn delete(&self, id: &str) -> Result<bool>;

    /// Flag the record deleted; returns `false` when it was unknown
    async fn soft_delete(&self, id: &str) -> Result<bool>;
}

// ============================================================================
// In-memory Repository
// ============================================================================

#[derive(Clone, Default)]
pub struct MemoryFileRepository {
    records: Arc<RwLock<HashMap<String, FileRecord>>>,
}

impl MemoryFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn live_sorted(&self, keep: impl Fn(&FileRecord) -> bool) -> Vec<FileRecord> {
        let records = self.records.read();
        let mut listed: Vec<FileRecord> = records
            .values()
            .filter(|r| !r.is_deleted && keep(r))
            .cloned()
            .collect();
        listed.sort_by(|a, b| b.uploaded_at.cmp(&a.uploaded_at));
        listed
    }
}

#[async_trait::async_trait]
impl FileRepository for MemoryFileRepository {
    async fn add(&self, record: &FileRecord) -> Result<()> {
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>> {
        Ok(self.live_sorted(|r| r.is_owned_by(owner_id)))
    }

    async fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<FileRecord>> {
        Ok(self
            .live_sorted(|_| true)
            .into_iter()
            .skip(offset)
            .take(limit)
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        Ok(self.records.write().remove(id).is_some())
    }

    async fn soft_delete(&self, id: &str) -> Result<bool> {
        let mut records = self.records.write();
        match records.get_mut(id) {
            Some(record) => {
                record.is_deleted = true;
                record.deleted_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

// ============================================================================
// SQLite Repository
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct FileRow {
    id: String,
    file_name: String,
    content_type: String,
    size_bytes: i64,
    owner_id: String,
    path: String,
    uploaded_at: String,
    is_deleted: bool,
    deleted_at: Option<String>,
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

impl From<FileRow> for FileRecord {
    fn from(row: FileRow) -> Self {
        FileRecord {
            uploaded_at: parse_timestamp(&row.uploaded_at).unwrap_or_default(),
            deleted_at: row.deleted_at.as_deref().and_then(parse_timestamp),
            id: row.id,
            file_name: row.file_name,
            content_type: row.content_type,
            size_bytes: row.size_bytes.max(0) as u64,
            owner_id: row.owner_id,
            path: row.path,
            is_deleted: row.is_deleted,
        }
    }
}

const SELECT_FILES: &str = r#"
    SELECT id, file_name, content_type, size_bytes, owner_id, path,
           uploaded_at, is_deleted, deleted_at
    FROM files
"#;

#[derive(Clone)]
pub struct SqliteFileRepository {
    pool: SqlitePool,
}

impl SqliteFileRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl FileRepository for SqliteFileRepository {
    async fn add(&self, record: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (id, file_name, content_type, size_bytes, owner_id, path,
                               uploaded_at, is_deleted, deleted_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.file_name)
        .bind(&record.content_type)
        .bind(record.size_bytes as i64)
        .bind(&record.owner_id)
        .bind(&record.path)
        .bind(record.uploaded_at.to_rfc3339())
        .bind(record.is_deleted)
        .bind(record.deleted_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<FileRecord>> {
        let row = sqlx::query_as::<_, FileRow>(&format!("{} WHERE id = ?", SELECT_FILES))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(FileRecord::from))
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "{} WHERE owner_id = ? COLLATE NOCASE AND is_deleted = 0 ORDER BY uploaded_at DESC",
            SELECT_FILES
        ))
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FileRecord::from).collect())
    }

    async fn list_all(&self, limit: usize, offset: usize) -> Result<Vec<FileRecord>> {
        let rows = sqlx::query_as::<_, FileRow>(&format!(
            "{} WHERE is_deleted = 0 ORDER BY uploaded_at DESC LIMIT ? OFFSET ?",
            SELECT_FILES
        ))
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(FileRecord::from).collect())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn soft_delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE files SET is_deleted = 1, deleted_at = ? WHERE id = ?")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
