//! Upload types for the resumable block protocol

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// File name used when the client does not send one
pub const DEFAULT_FILE_NAME: &str = "upload.bin";

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

// ============================================================================
// Session Types
// ============================================================================

/// Server-side state of one in-flight upload
///
/// The session is keyed by its target object path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadSession {
    /// Target object path, also the session id
    pub path: String,

    pub file_name: String,

    pub content_type: String,

    /// Declared total size; advisory only
    pub total_bytes: u64,

    /// Sum of every chunk staged so far
    pub uploaded_bytes: u64,

    pub committed: bool,

    pub created_at: DateTime<Utc>,

    /// Fixed at creation, never extended
    pub expires_at: DateTime<Utc>,
}

impl UploadSession {
    pub fn new(
        path: impl Into<String>,
        file_name: impl Into<String>,
        content_type: impl Into<String>,
        total_bytes: u64,
        ttl: std::time::Duration,
    ) -> Self {
        let now = Utc::now();
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::hours(24));

        Self {
            path: path.into(),
            file_name: file_name.into(),
            content_type: content_type.into(),
            total_bytes,
            uploaded_bytes: 0,
            committed: false,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Check if the session expired before `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

// ============================================================================
// Start Types
// ============================================================================

/// Request to open an upload session; every field is optional
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartUploadRequest {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub total_bytes: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadResponse {
    /// Path to use in every later call for this upload
    pub session_path: String,
    pub file_name: String,
    pub content_type: String,
    pub expires_at: DateTime<Utc>,
}

// ============================================================================
// Chunk Types
// ============================================================================

/// Response after staging a chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkResponse {
    pub block_id: String,
    pub size: u64,
    /// Session total after this chunk
    pub uploaded_bytes: u64,
}

// ============================================================================
// Commit Types
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommitRequest {
    /// Block ids in final object order
    pub block_ids: Option<Vec<String>>,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    pub id: String,
    pub file_name: String,
    pub size: u64,
}

// ============================================================================
// Progress Types
// ============================================================================

/// One progress event as pushed to subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub bytes: u64,
    pub committed: bool,
    /// Size of the committed object, present on the terminal event only
    #[serde(rename = "totalBytes", default, skip_serializing_if = "Option::is_none")]
    pub total_bytes: Option<u64>,
}
