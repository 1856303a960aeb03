//! Export Routes
//!
//! - POST /api/v1/export - Start a zip export, 202 with the job location
//! - GET /api/v1/export/:job_id - Poll a job
//! - DELETE /api/v1/export/:job_id - Drop a finished job and its archive
//! - GET /api/v1/export/:job_id/download - Stream the finished archive

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};

use crate::auth::Caller;
use crate::error::{AppError, Result};
use crate::export::{ExportAccepted, ExportJob, ExportRequest};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(start_export))
        .route("/:job_id", get(job_status).delete(cleanup_job))
        .route("/:job_id/download", get(download_archive))
}

async fn start_export(
    State(state): State<AppState>,
    caller: Caller,
    Json(request): Json<ExportRequest>,
) -> Result<impl IntoResponse> {
    let job = state
        .exports()
        .start_export(&request.object_ids, &caller)
        .await?;

    let location = format!("/api/v1/export/{}", job.job_id);
    Ok((
        StatusCode::ACCEPTED,
        [(header::LOCATION, location)],
        Json(ExportAccepted {
            job_id: job.job_id,
            status: job.status,
        }),
    ))
}

async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    caller: Caller,
) -> Result<Json<ExportJob>> {
    Ok(Json(state.exports().status(&job_id, &caller)?))
}

async fn cleanup_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    caller: Caller,
) -> Result<StatusCode> {
    state.exports().cleanup(&job_id, &caller).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn download_archive(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    caller: Caller,
) -> Result<Response> {
    let download = state.exports().open_download(&job_id, &caller).await?;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/zip")
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", download.file_name),
        );
    if let Some(size) = download.size {
        response = response.header(header::CONTENT_LENGTH, size);
    }

    response
        .body(Body::from_stream(download.stream))
        .map_err(|e| AppError::Internal(e.to_string()))
}
