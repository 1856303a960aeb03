//! Local filesystem storage
//!
//! Layout under the root directory:
//! - `staging/<sha256(path)>/<hex(block id)>.block` for staged chunks
//! - `objects/<path>` for committed objects
//!
//! Writers stream into a `.partial` sibling that is renamed into place on
//! finish, so readers never observe a half-written object.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use sha2::{Digest, Sha256};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::io::ReaderStream;

use super::{guess_content_type, validate_key, BlobStorage, BlobWriter, ByteStream, ObjectMetadata};
use crate::error::StorageError;

const PARTIAL_SUFFIX: &str = ".partial";

/// Filesystem-backed blob storage
#[derive(Clone)]
pub struct LocalBlobStorage {
    base_path: PathBuf,
}

impl LocalBlobStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn staging_dir(&self, path: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(path.as_bytes());
        self.base_path
            .join("staging")
            .join(hex::encode(hasher.finalize()))
    }

    fn block_path(&self, path: &str, block_id: &str) -> PathBuf {
        self.staging_dir(path)
            .join(format!("{}.block", hex::encode(block_id.as_bytes())))
    }

    fn objects_root(&self) -> PathBuf {
        self.base_path.join("objects")
    }

    fn object_path(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_key(path)?;
        Ok(self.objects_root().join(path))
    }
}

fn partial_path(target: &Path) -> PathBuf {
    let mut partial = target.as_os_str().to_owned();
    partial.push(PARTIAL_SUFFIX);
    PathBuf::from(partial)
}

async fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

fn ignore_not_found(result: std::io::Result<()>) -> Result<(), StorageError> {
    match result {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

#[async_trait::async_trait]
impl BlobStorage for LocalBlobStorage {
    async fn stage_chunk(
        &self,
        path: &str,
        block_id: &str,
        data: Bytes,
    ) -> Result<(), StorageError> {
        let block_path = self.block_path(path, block_id);
        ensure_parent(&block_path).await?;
        fs::write(&block_path, &data).await?;
        Ok(())
    }

    async fn commit_chunks(
        &self,
        path: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let mut writer = self.open_write(path, content_type).await?;

        for id in block_ids {
            let block_path = self.block_path(path, id);
            let file = match File::open(&block_path).await {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tracing::warn!(path = %path, block_id = %id, "Skipping unstaged block");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            let mut blocks = ReaderStream::new(file);
            while let Some(chunk) = blocks.next().await {
                writer.write(chunk?).await?;
            }
        }

        let size = writer.finish().await?;
        ignore_not_found(fs::remove_dir_all(self.staging_dir(path)).await)?;
        Ok(size)
    }

    async fn abort_staged(&self, path: &str) -> Result<(), StorageError> {
        ignore_not_found(fs::remove_dir_all(self.staging_dir(path)).await)
    }

    async fn open_write(
        &self,
        path: &str,
        _content_type: &str,
    ) -> Result<Box<dyn BlobWriter>, StorageError> {
        let target = self.object_path(path)?;
        ensure_parent(&target).await?;

        let partial = partial_path(&target);
        let file = File::create(&partial).await?;

        Ok(Box::new(LocalWriter {
            file: BufWriter::new(file),
            partial,
            target,
            written: 0,
            finished: false,
        }))
    }

    async fn open_read(&self, path: &str) -> Result<Option<ByteStream>, StorageError> {
        let object_path = self.object_path(path)?;
        match File::open(&object_path).await {
            Ok(file) => Ok(Some(
                ReaderStream::new(file).map_err(StorageError::Io).boxed(),
            )),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn stat(&self, path: &str) -> Result<Option<ObjectMetadata>, StorageError> {
        let object_path = self.object_path(path)?;
        match fs::metadata(&object_path).await {
            Ok(meta) => Ok(Some(ObjectMetadata {
                key: path.to_string(),
                size: meta.len(),
                last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                content_type: Some(guess_content_type(path)),
                etag: None,
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        let object_path = self.object_path(path)?;
        ignore_not_found(fs::remove_file(&object_path).await)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMetadata>, StorageError> {
        let root = self.objects_root();
        let mut listed = Vec::new();
        let mut pending = vec![root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            while let Some(entry) = entries.next_entry().await? {
                let meta = entry.metadata().await?;
                let entry_path = entry.path();
                if meta.is_dir() {
                    pending.push(entry_path);
                    continue;
                }

                let Ok(relative) = entry_path.strip_prefix(&root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(PARTIAL_SUFFIX) || !key.starts_with(prefix) {
                    continue;
                }

                listed.push(ObjectMetadata {
                    content_type: Some(guess_content_type(&key)),
                    key,
                    size: meta.len(),
                    last_modified: meta.modified().ok().map(DateTime::<Utc>::from),
                    etag: None,
                });
            }
        }

        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }
}

/// Streams into `<target>.partial`, renamed into place on finish
struct LocalWriter {
    file: BufWriter<File>,
    partial: PathBuf,
    target: PathBuf,
    written: u64,
    finished: bool,
}

#[async_trait::async_trait]
impl BlobWriter for LocalWriter {
    async fn write(&mut self, data: Bytes) -> Result<(), StorageError> {
        self.file.write_all(&data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64, StorageError> {
        self.file.flush().await?;
        fs::rename(&self.partial, &self.target).await?;
        self.finished = true;
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) {
        if let Err(e) = fs::remove_file(&self.partial).await {
            tracing::warn!("Failed to remove {}: {}", self.partial.display(), e);
        }
        self.finished = true;
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        if !self.finished {
            let _ = std::fs::remove_file(&self.partial);
        }
    }
}
