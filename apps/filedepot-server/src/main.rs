//! FileDepot Server
//!
//! Resumable chunked uploads and asynchronous zip exports over S3-compatible,
//! local or in-memory blob storage.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filedepot_server::config::{Config, StorageProvider};
use filedepot_server::db::{self, FileRepository, MemoryFileRepository, SqliteFileRepository, SqliteSessionStore};
use filedepot_server::export::MemoryJobStore;
use filedepot_server::storage::{BlobStorage, LocalBlobStorage, MemoryBlobStorage, S3BlobStorage, S3Client};
use filedepot_server::tasks::TaskSupervisor;
use filedepot_server::upload::{MemorySessionStore, SessionStore};
use filedepot_server::AppState;

/// How long shutdown waits for in-flight exports
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "filedepot_server=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("Failed to load configuration")?;

    tracing::info!("Starting FileDepot Server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage provider: {:?}", config.storage.provider);

    let storage = build_storage(&config).await?;

    let (sessions, files): (Arc<dyn SessionStore>, Arc<dyn FileRepository>) =
        match &config.database.url {
            Some(url) => {
                let pool = db::create_pool(url)
                    .await
                    .context("Failed to initialize database")?;
                tracing::info!("Database initialized at {}", url);
                (
                    Arc::new(SqliteSessionStore::new(pool.clone())),
                    Arc::new(SqliteFileRepository::new(pool)),
                )
            }
            None => {
                tracing::warn!("DATABASE_URL not set, sessions and file records live in memory");
                (
                    Arc::new(MemorySessionStore::new()),
                    Arc::new(MemoryFileRepository::new()),
                )
            }
        };

    let supervisor = TaskSupervisor::new();
    let state = AppState::new(
        config.clone(),
        storage,
        sessions,
        files,
        Arc::new(MemoryJobStore::new()),
        supervisor.clone(),
    );
    state.spawn_background();

    let app = filedepot_server::router(state);

    // Start server with graceful shutdown
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid SERVER_HOST/SERVER_PORT")?;
    tracing::info!("FileDepot Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    if !supervisor.shutdown(SHUTDOWN_GRACE).await {
        tracing::warn!("Abandoning unfinished background work");
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn build_storage(config: &Config) -> anyhow::Result<Arc<dyn BlobStorage>> {
    let storage: Arc<dyn BlobStorage> = match config.storage.provider {
        StorageProvider::Memory => {
            tracing::warn!("Using in-memory blob storage, objects are lost on restart");
            Arc::new(MemoryBlobStorage::new())
        }
        StorageProvider::Local => {
            tracing::info!("Local storage root: {}", config.storage.local_root.display());
            Arc::new(LocalBlobStorage::new(config.storage.local_root.clone()))
        }
        _ => {
            let s3 = config
                .storage
                .s3
                .as_ref()
                .context("S3 settings missing for an S3-compatible provider")?;
            tracing::info!("S3 endpoint: {}", s3.endpoint);
            tracing::info!("S3 bucket: {}", s3.bucket);

            let client = S3Client::new(s3)
                .await
                .context("Failed to initialize S3 client")?;
            Arc::new(S3BlobStorage::new(client, config.storage.staging_prefix.clone()))
        }
    };

    Ok(storage)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
