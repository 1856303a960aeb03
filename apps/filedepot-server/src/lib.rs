//! FileDepot Server Library
//!
//! Resumable chunked uploads and streamed zip exports over pluggable blob
//! storage. The server binary in main.rs wires configuration to [`router`].
//!
//! # Modules
//!
//! - `upload`: session lifecycle, chunk budget, progress and the reaper
//! - `export`: background zip builds and their retention
//! - `storage`: the blob storage port and its memory, local and S3 backends
//! - `db`: session and file record persistence

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod export;
pub mod routes;
pub mod state;
pub mod storage;
pub mod tasks;
pub mod upload;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the full HTTP surface over `state`
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/api/v1/health", get(routes::health::health_check))
        .nest("/api/v1/upload", routes::upload::router(state.clone()))
        .nest("/api/v1/export", routes::export::router())
        .nest("/api/v1/files", routes::files::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
