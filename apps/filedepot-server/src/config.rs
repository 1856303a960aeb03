//! Configuration management for the FileDepot server

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(String),

    #[error("Invalid value for {var}: {value}")]
    Invalid { var: String, value: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub database: DatabaseConfig,
    pub upload: UploadConfig,
    pub cleanup: CleanupConfig,
    pub export: ExportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub provider: StorageProvider,
    /// Root directory for the `local` provider
    pub local_root: PathBuf,
    pub s3: Option<S3Config>,
    /// Key prefix under which staged blocks live
    pub staging_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    pub endpoint: String,
    pub bucket: String,
    pub access_key: String,
    pub secret_key: String,
    pub region: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    Memory,
    Local,
    Minio,
    R2,
    S3,
    B2,
}

impl StorageProvider {
    pub fn is_s3_compatible(&self) -> bool {
        matches!(self, Self::Minio | Self::R2 | Self::S3 | Self::B2)
    }
}

impl FromStr for StorageProvider {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "stub" => Ok(Self::Memory),
            "local" | "fs" => Ok(Self::Local),
            "minio" => Ok(Self::Minio),
            "r2" => Ok(Self::R2),
            "s3" => Ok(Self::S3),
            "b2" => Ok(Self::B2),
            other => Err(ConfigError::Invalid {
                var: "STORAGE_PROVIDER".to_string(),
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite URL; in-process stores are used when unset
    pub url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadConfig {
    pub max_chunk_bytes: u64,
    pub max_concurrency: usize,
    pub acquire_timeout: Duration,
    pub session_ttl: Duration,
    pub progress_interval: Duration,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    pub interval: Duration,
    pub max_sessions_per_run: usize,
    pub retry_count: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    pub prefix: String,
    pub retention: Duration,
    pub sweep_interval: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        UploadConfig {
            max_chunk_bytes: 4 * 1024 * 1024,
            max_concurrency: 8,
            acquire_timeout: Duration::from_secs(5 * 60),
            session_ttl: Duration::from_secs(24 * 60 * 60),
            progress_interval: Duration::from_millis(500),
            api_key: None,
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        CleanupConfig {
            interval: Duration::from_secs(60 * 60),
            max_sessions_per_run: 500,
            retry_count: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_millis(5000),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        ExportConfig {
            prefix: "exports/".to_string(),
            retention: Duration::from_secs(2 * 60 * 60),
            sweep_interval: Duration::from_secs(10 * 60),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 3000,
            },
            storage: StorageConfig {
                provider: StorageProvider::Memory,
                local_root: PathBuf::from("./data"),
                s3: None,
                staging_prefix: "staging".to_string(),
            },
            database: DatabaseConfig { url: None },
            upload: UploadConfig::default(),
            cleanup: CleanupConfig::default(),
            export: ExportConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let provider: StorageProvider = env_or("STORAGE_PROVIDER", StorageProvider::Memory)?;
        let s3 = if provider.is_s3_compatible() {
            Some(S3Config {
                endpoint: required("S3_ENDPOINT")?,
                bucket: required("S3_BUCKET")?,
                access_key: required("S3_ACCESS_KEY")?,
                secret_key: required("S3_SECRET_KEY")?,
                region: env::var("S3_REGION").ok(),
            })
        } else {
            None
        };

        let upload = UploadConfig {
            max_chunk_bytes: env_or("UPLOAD_MAX_CHUNK_BYTES", defaults.upload.max_chunk_bytes)?,
            max_concurrency: env_or("UPLOAD_MAX_CONCURRENCY", defaults.upload.max_concurrency)?
                .max(1),
            acquire_timeout: Duration::from_secs(env_or("UPLOAD_ACQUIRE_TIMEOUT_SECS", 300)?),
            session_ttl: Duration::from_secs(env_or::<u64>("UPLOAD_SESSION_TTL_HOURS", 24)? * 3600),
            progress_interval: Duration::from_millis(env_or("UPLOAD_PROGRESS_INTERVAL_MS", 500)?),
            api_key: env::var("UPLOAD_API_KEY").ok().filter(|k| !k.is_empty()),
        };

        let cleanup = CleanupConfig {
            interval: Duration::from_secs(env_or::<u64>("CLEANUP_INTERVAL_MINUTES", 60)?.max(1) * 60),
            max_sessions_per_run: env_or(
                "CLEANUP_MAX_SESSIONS_PER_RUN",
                defaults.cleanup.max_sessions_per_run,
            )?,
            retry_count: env_or("CLEANUP_RETRY_COUNT", defaults.cleanup.retry_count)?.max(1),
            base_delay: Duration::from_millis(env_or("CLEANUP_BASE_DELAY_MS", 200)?),
            max_delay: Duration::from_millis(env_or("CLEANUP_MAX_DELAY_MS", 5000)?),
        };

        let export = ExportConfig {
            prefix: env::var("EXPORT_PREFIX").unwrap_or(defaults.export.prefix),
            retention: Duration::from_secs(env_or::<u64>("EXPORT_RETENTION_MINUTES", 120)? * 60),
            sweep_interval: Duration::from_secs(
                env_or::<u64>("EXPORT_SWEEP_INTERVAL_MINUTES", 10)?.max(1) * 60,
            ),
        };

        Ok(Config {
            server: ServerConfig {
                host: env::var("SERVER_HOST").unwrap_or(defaults.server.host),
                port: env_or("SERVER_PORT", defaults.server.port)?,
            },
            storage: StorageConfig {
                provider,
                local_root: env::var("STORAGE_LOCAL_ROOT")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.storage.local_root),
                s3,
                staging_prefix: env::var("STORAGE_STAGING_PREFIX")
                    .unwrap_or(defaults.storage.staging_prefix),
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok().filter(|u| !u.is_empty()),
            },
            upload,
            cleanup,
            export,
        })
    }
}

fn required(var: &str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::Missing(var.to_string()))
}

/// Parse an optional variable, falling back to `default` only when it is unset
fn env_or<T: FromStr>(var: &str, default: T) -> Result<T, ConfigError> {
    match env::var(var) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            var: var.to_string(),
            value,
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service_limits() {
        let config = Config::default();
        assert_eq!(config.upload.max_chunk_bytes, 4 * 1024 * 1024);
        assert_eq!(config.upload.max_concurrency, 8);
        assert_eq!(config.upload.session_ttl, Duration::from_secs(86_400));
        assert_eq!(config.cleanup.max_sessions_per_run, 500);
        assert_eq!(config.cleanup.retry_count, 3);
        assert_eq!(config.export.retention, Duration::from_secs(7_200));
        assert_eq!(config.storage.provider, StorageProvider::Memory);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn test_provider_parsing() {
        assert_eq!("R2".parse::<StorageProvider>().unwrap(), StorageProvider::R2);
        assert_eq!("local".parse::<StorageProvider>().unwrap(), StorageProvider::Local);
        assert!("ftp".parse::<StorageProvider>().is_err());
        assert!(StorageProvider::Minio.is_s3_compatible());
        assert!(!StorageProvider::Memory.is_s3_compatible());
    }

    #[test]
    fn test_env_or_rejects_garbage() {
        env::set_var("FILEDEPOT_TEST_NUMBER", "twelve");
        let parsed: Result<u64, _> = env_or("FILEDEPOT_TEST_NUMBER", 1);
        assert!(matches!(parsed, Err(ConfigError::Invalid { .. })));

        env::set_var("FILEDEPOT_TEST_NUMBER", " 12 ");
        assert_eq!(env_or::<u64>("FILEDEPOT_TEST_NUMBER", 1).unwrap(), 12);
        env::remove_var("FILEDEPOT_TEST_NUMBER");
        assert_eq!(env_or::<u64>("FILEDEPOT_TEST_NUMBER", 1).unwrap(), 1);
    }
}
