//! In-process storage stub
//!
//! Mimics blob storage until a real backend is configured; also the backend
//! used by the test suites.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{BlobStorage, BlobWriter, ByteStream, ObjectMetadata};
use crate::error::StorageError;

/// Read buffer size handed out by `open_read`
const READ_CHUNK: usize = 64 * 1024;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    content_type: String,
    modified: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryInner {
    objects: RwLock<HashMap<String, StoredObject>>,
    /// path -> (block id -> staged bytes)
    staged: RwLock<HashMap<String, HashMap<String, Bytes>>>,
}

/// In-memory blob storage
#[derive(Clone, Default)]
pub struct MemoryBlobStorage {
    inner: Arc<MemoryInner>,
}

impl MemoryBlobStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block ids currently staged for a path, sorted
    pub fn staged_block_ids(&self, path: &str) -> Vec<String> {
        let staged = self.inner.staged.read();
        let mut ids: Vec<String> = staged
            .get(path)
            .map(|blocks| blocks.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Full object contents, if present
    pub fn object_bytes(&self, path: &str) -> Option<Bytes> {
        self.inner.objects.read().get(path).map(|o| o.data.clone())
    }

    /// Store an object directly
    pub fn put(&self, path: &str, data: impl Into<Bytes>, content_type: &str) {
        self.insert(path, data.into(), content_type);
    }

    /// Backdate an object's modification time
    pub fn set_modified(&self, path: &str, modified: DateTime<Utc>) {
        if let Some(object) = self.inner.objects.write().get_mut(path) {
            object.modified = modified;
        }
    }

    fn insert(&self, path: &str, data: Bytes, content_type: &str) {
        self.inner.objects.write().insert(
            path.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
                modified: Utc::now(),
            },
        );
    }
}

#[async_trait::async_trait]
impl BlobStorage for MemoryBlobStorage {
    async fn stage_chunk(
        &self,
        path: &str,
        block_id: &str,
        data: Bytes,
    ) -> Result<(), StorageError> {
        self.inner
            .staged
            .write()
            .entry(path.to_string())
            .or_default()
            .insert(block_id.to_string(), data);
        Ok(())
    }

    async fn commit_chunks(
        &self,
        path: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> Result<u64, StorageError> {
        let blocks = self.inner.staged.write().remove(path).unwrap_or_default();

        let mut assembled = BytesMut::new();
        for id in block_ids {
            match blocks.get(id) {
                Some(chunk) => assembled.extend_from_slice(chunk),
                None => tracing::warn!(path = %path, block_id = %id, "Skipping unstaged block"),
            }
        }

        let size = assembled.len() as u64;
        self.insert(path, assembled.freeze(), content_type);
        Ok(size)
    }

    async fn abort_staged(&self, path: &str) -> Result<(), StorageError> {
        self.inner.staged.write().remove(path);
        Ok(())
    }

    async fn open_write(
        &self,
        path: &str,
        content_type: &str,
    ) -> Result<Box<dyn BlobWriter>, StorageError> {
        Ok(Box::new(MemoryWriter {
            storage: self.clone(),
            path: path.to_string(),
            content_type: content_type.to_string(),
            buffer: BytesMut::new(),
        }))
    }

    async fn open_read(&self, path: &str) -> Result<Option<ByteStream>, StorageError> {
        let Some(data) = self.object_bytes(path) else {
            return Ok(None);
        };

        let chunks: Vec<Result<Bytes, StorageError>> = data
            .chunks(READ_CHUNK)
            .map(|c| Ok(data.slice_ref(c)))
            .collect();
        Ok(Some(Box::pin(futures::stream::iter(chunks))))
    }

    async fn stat(&self, path: &str) -> Result<Option<ObjectMetadata>, StorageError> {
        Ok(self.inner.objects.read().get(path).map(|o| ObjectMetadata {
            key: path.to_string(),
            size: o.data.len() as u64,
            last_modified: Some(o.modified),
            content_type: Some(o.content_type.clone()),
            etag: None,
        }))
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        self.inner.objects.write().remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMetadata>, StorageError> {
        let objects = self.inner.objects.read();
        let mut listed: Vec<ObjectMetadata> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, o)| ObjectMetadata {
                key: key.clone(),
                size: o.data.len() as u64,
                last_modified: Some(o.modified),
                content_type: Some(o.content_type.clone()),
                etag: None,
            })
            .collect();
        listed.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(listed)
    }
}

/// Buffers writes and publishes the object on finish
struct MemoryWriter {
    storage: MemoryBlobStorage,
    path: String,
    content_type: String,
    buffer: BytesMut,
}

#[async_trait::async_trait]
impl BlobWriter for MemoryWriter {
    async fn write(&mut self, data: Bytes) -> Result<(), StorageError> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> Result<u64, StorageError> {
        let this = *self;
        let size = this.buffer.len() as u64;
        this.storage
            .insert(&this.path, this.buffer.freeze(), &this.content_type);
        Ok(size)
    }

    async fn abort(self: Box<Self>) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    async fn read_all(storage: &MemoryBlobStorage, path: &str) -> Vec<u8> {
        let stream = storage.open_read(path).await.unwrap().unwrap();
        let chunks: Vec<Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_commit_in_supplied_order() {
        let storage = MemoryBlobStorage::new();
        storage.stage_chunk("p", "b", Bytes::from_static(b"World!")).await.unwrap();
        storage.stage_chunk("p", "a", Bytes::from_static(b"Hello, ")).await.unwrap();

        let size = storage
            .commit_chunks("p", &["a".to_string(), "b".to_string()], "text/plain")
            .await
            .unwrap();

        assert_eq!(size, 13);
        assert_eq!(read_all(&storage, "p").await, b"Hello, World!");
        assert!(storage.staged_block_ids("p").is_empty());
    }

    #[tokio::test]
    async fn test_commit_skips_unstaged_blocks() {
        let storage = MemoryBlobStorage::new();
        storage.stage_chunk("p", "a", Bytes::from_static(b"one")).await.unwrap();
        storage.stage_chunk("p", "c", Bytes::from_static(b"three")).await.unwrap();

        let ids = vec!["c".to_string(), "missing".to_string(), "a".to_string()];
        storage.commit_chunks("p", &ids, "text/plain").await.unwrap();

        assert_eq!(read_all(&storage, "p").await, b"threeone");
    }

    #[tokio::test]
    async fn test_abort_discards_staged() {
        let storage = MemoryBlobStorage::new();
        storage.stage_chunk("p", "a", Bytes::from_static(b"x")).await.unwrap();
        storage.abort_staged("p").await.unwrap();
        storage.abort_staged("p").await.unwrap();

        assert!(storage.staged_block_ids("p").is_empty());
        assert!(storage.open_read("p").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_writer_publishes_on_finish() {
        let storage = MemoryBlobStorage::new();
        let mut writer = storage.open_write("exports/a.zip", "application/zip").await.unwrap();
        writer.write(Bytes::from_static(b"PK")).await.unwrap();
        assert!(storage.stat("exports/a.zip").await.unwrap().is_none());

        assert_eq!(writer.finish().await.unwrap(), 2);
        let meta = storage.stat("exports/a.zip").await.unwrap().unwrap();
        assert_eq!(meta.size, 2);
        assert_eq!(meta.content_type.as_deref(), Some("application/zip"));
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let storage = MemoryBlobStorage::new();
        storage.put("exports/1.zip", vec![1u8], "application/zip");
        storage.put("exports/2.zip", vec![2u8], "application/zip");
        storage.put("abc_file.bin", vec![3u8], "application/octet-stream");

        let listed = storage.list("exports/").await.unwrap();
        let keys: Vec<_> = listed.iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["exports/1.zip", "exports/2.zip"]);
    }
}
