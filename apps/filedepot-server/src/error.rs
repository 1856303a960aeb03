//! Error types for the FileDepot server

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Application-wide result type
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    #[error("Too many concurrent uploads, retry later")]
    CapacityExceeded,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("S3 connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("S3 SDK error: {0}")]
    SdkError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        match self {
            StorageError::ObjectNotFound(_) => true,
            StorageError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

/// Error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl AppError {
    /// HTTP status for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Gone(_) => StatusCode::GONE,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Storage(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            AppError::Storage(StorageError::InvalidKey(_)) => StatusCode::BAD_REQUEST,
            AppError::Storage(StorageError::AccessDenied(_)) => StatusCode::FORBIDDEN,
            AppError::Internal(_)
            | AppError::Storage(_)
            | AppError::Database(_)
            | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let (error_type, message) = match &self {
            AppError::Validation(msg) => ("validation_error", msg.clone()),
            AppError::CapacityExceeded => ("capacity_exceeded", self.to_string()),
            AppError::NotFound(msg) => ("not_found", msg.clone()),
            AppError::Gone(msg) => ("gone", msg.clone()),
            AppError::Forbidden(msg) => ("forbidden", msg.clone()),
            AppError::Unauthorized(msg) => ("unauthorized", msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                ("internal_error", "An internal error occurred".to_string())
            }
            AppError::Storage(e) => {
                tracing::error!("Storage error: {}", e);
                match e {
                    e if e.is_not_found() => ("not_found", e.to_string()),
                    StorageError::InvalidKey(key) => {
                        ("validation_error", format!("Invalid object key: {}", key))
                    }
                    StorageError::AccessDenied(_) => ("access_denied", "Access denied".to_string()),
                    _ => ("storage_error", "Storage error".to_string()),
                }
            }
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                ("database_error", "Database error".to_string())
            }
            AppError::Io(e) => {
                tracing::error!("IO error: {}", e);
                ("io_error", "IO error".to_string())
            }
        };

        let body = Json(ErrorResponse {
            error: error_type.to_string(),
            message,
            details: if cfg!(debug_assertions) {
                Some(self.to_string())
            } else {
                None
            },
        });

        if matches!(self, AppError::CapacityExceeded) {
            return (status, [(header::RETRY_AFTER, "5")], body).into_response();
        }

        (status, body).into_response()
    }
}
