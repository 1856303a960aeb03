//! File metadata routes
//!
//! Committed uploads, scoped to their owner. Admins may list everyone's.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::Response,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::Caller;
use crate::db::FileRecord;
use crate::error::{AppError, Result};
use crate::state::AppState;

/// Upper bound on an admin-wide listing
const LIST_ALL_LIMIT: usize = 100;

/// Create the files router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_files))
        .route("/:id", get(get_file).delete(delete_file))
        .route("/:id/content", get(file_content))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDetail {
    pub id: String,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub uploaded_at: DateTime<Utc>,
    pub download_url: String,
}

impl From<FileRecord> for FileDetail {
    fn from(record: FileRecord) -> Self {
        Self {
            download_url: format!("/api/v1/files/{}/content", record.id),
            id: record.id,
            file_name: record.file_name,
            content_type: record.content_type,
            size_bytes: record.size_bytes,
            uploaded_at: record.uploaded_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    all: bool,
}

async fn list_files(
    State(state): State<AppState>,
    caller: Caller,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<FileDetail>>> {
    let user_id = caller.require_user()?;

    let records = if query.all && caller.is_admin() {
        state.files().list_all(LIST_ALL_LIMIT, 0).await?
    } else {
        state.files().list_by_owner(user_id).await?
    };

    Ok(Json(records.into_iter().map(FileDetail::from).collect()))
}

/// Fetch a live record the caller may see
async fn accessible_record(state: &AppState, id: &str, caller: &Caller) -> Result<FileRecord> {
    let record = state
        .files()
        .get(id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File not found: {}", id)))?;

    if record.is_deleted {
        return Err(AppError::Gone(format!("File has been deleted: {}", id)));
    }
    if !caller.can_access(&record.owner_id) {
        return Err(AppError::Forbidden("Not allowed to access this file".to_string()));
    }
    Ok(record)
}

async fn get_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Json<FileDetail>> {
    let record = accessible_record(&state, &id, &caller).await?;
    Ok(Json(record.into()))
}

/// Stream the stored object
async fn file_content(
    State(state): State<AppState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<Response> {
    let record = accessible_record(&state, &id, &caller).await?;

    let stream = state
        .storage()
        .open_read(&record.path)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("File content missing: {}", id)))?;

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, record.content_type)
        .header(header::CONTENT_LENGTH, record.size_bytes)
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename*=UTF-8''{}",
                urlencoding::encode(&record.file_name)
            ),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}

/// Remove the object and flag the record deleted
async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    caller: Caller,
) -> Result<StatusCode> {
    let record = accessible_record(&state, &id, &caller).await?;

    state.storage().delete(&record.path).await?;
    state.files().soft_delete(&record.id).await?;

    tracing::info!(file_id = %record.id, path = %record.path, "File deleted");
    Ok(StatusCode::NO_CONTENT)
}
