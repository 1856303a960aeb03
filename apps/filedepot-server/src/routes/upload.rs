//! Upload Routes
//!
//! HTTP endpoints for the resumable chunked upload protocol.
//!
//! Endpoints:
//! - POST /api/v1/upload/start - Open a session
//! - PUT /api/v1/upload/:session_path/block/:block_id - Stage one block
//! - POST /api/v1/upload/:session_path/commit - Assemble the blocks
//! - POST /api/v1/upload/:session_path/abort - Discard the session
//! - GET /api/v1/upload/:session_path/progress - Server-sent progress events

use std::convert::Infallible;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    middleware,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post, put},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde_json::json;

use crate::auth::{require_api_key, Caller};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::upload::{ChunkResponse, CommitRequest, StartUploadRequest, StartUploadResponse};

/// Create the upload router
///
/// Block bodies may run past the chunk limit so the handler, not the body
/// extractor, reports oversize blocks.
pub fn router(state: AppState) -> Router<AppState> {
    let body_limit = (state.config().upload.max_chunk_bytes as usize).saturating_mul(2);

    Router::new()
        .route("/start", post(start_upload))
        .route(
            "/:session_path/block/:block_id",
            put(upload_block).layer(DefaultBodyLimit::max(body_limit)),
        )
        .route("/:session_path/commit", post(commit_upload))
        .route("/:session_path/abort", post(abort_upload))
        .route("/:session_path/progress", get(upload_progress))
        .route_layer(middleware::from_fn_with_state(state, require_api_key))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /api/v1/upload/start
async fn start_upload(
    State(state): State<AppState>,
    body: Option<Json<StartUploadRequest>>,
) -> Result<Json<StartUploadResponse>> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    Ok(Json(state.uploads().start(request).await?))
}

/// PUT /api/v1/upload/:session_path/block/:block_id
async fn upload_block(
    State(state): State<AppState>,
    Path((session_path, block_id)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ChunkResponse>> {
    let content_range = match headers.get(header::CONTENT_RANGE) {
        Some(value) => Some(
            value
                .to_str()
                .map_err(|_| AppError::Validation("Invalid Content-Range header".to_string()))?,
        ),
        None => None,
    };

    let staged = state
        .uploads()
        .apply_chunk(&session_path, &block_id, content_range, body)
        .await?;
    Ok(Json(staged))
}

/// POST /api/v1/upload/:session_path/commit
async fn commit_upload(
    State(state): State<AppState>,
    Path(session_path): Path<String>,
    caller: Caller,
    Json(request): Json<CommitRequest>,
) -> Result<impl IntoResponse> {
    let committed = state
        .uploads()
        .commit(&session_path, request, caller.user_id.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(committed)))
}

/// POST /api/v1/upload/:session_path/abort
async fn abort_upload(
    State(state): State<AppState>,
    Path(session_path): Path<String>,
) -> Result<impl IntoResponse> {
    state.uploads().abort(&session_path).await?;
    Ok(Json(json!({ "sessionPath": session_path, "aborted": true })))
}

/// GET /api/v1/upload/:session_path/progress
///
/// Emits `{"bytes":…,"committed":…}` every poll interval; the stream closes
/// after the committed event.
async fn upload_progress(
    State(state): State<AppState>,
    Path(session_path): Path<String>,
) -> Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let snapshots = state.uploads().progress(&session_path).await?;

    let events = snapshots.filter_map(|snapshot| async move {
        match Event::default().json_data(snapshot) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!("Failed to encode progress event: {}", e);
                None
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
