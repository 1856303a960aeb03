//! Blob storage port and its backends
//!
//! Every backend speaks the same staged-block protocol: chunks are staged
//! under an opaque block id, then committed in caller order into one object.
//! Supports an in-process stub, a local filesystem root, and S3-compatible
//! buckets (MinIO, Cloudflare R2, Backblaze B2, AWS S3).

mod local;
mod memory;
mod s3;
mod s3_client;
mod types;

pub use local::LocalBlobStorage;
pub use memory::MemoryBlobStorage;
pub use s3::S3BlobStorage;
pub use s3_client::S3Client;
pub use types::*;

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::StorageError;

/// Stream of object bytes, read one buffer at a time
pub type ByteStream = BoxStream<'static, Result<Bytes, StorageError>>;

/// Storage port consumed by the upload coordinator and the export engine
///
/// All operations are idempotent except `commit_chunks`, which is meaningful
/// at most once per path.
#[async_trait::async_trait]
pub trait BlobStorage: Send + Sync {
    /// Stage one chunk for `path` under `block_id`, replacing any earlier
    /// chunk staged under the same id
    async fn stage_chunk(&self, path: &str, block_id: &str, data: Bytes)
        -> Result<(), StorageError>;

    /// Assemble staged chunks, in the given order, into the object at `path`
    ///
    /// Block ids that were never staged are skipped. Returns the size of the
    /// committed object.
    async fn commit_chunks(
        &self,
        path: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> Result<u64, StorageError>;

    /// Discard every chunk staged for `path`
    async fn abort_staged(&self, path: &str) -> Result<(), StorageError>;

    /// Open a streaming writer; the object becomes visible on `finish`
    async fn open_write(
        &self,
        path: &str,
        content_type: &str,
    ) -> Result<Box<dyn BlobWriter>, StorageError>;

    /// Open a streaming reader, `None` when the object does not exist
    async fn open_read(&self, path: &str) -> Result<Option<ByteStream>, StorageError>;

    /// Object metadata, `None` when the object does not exist
    async fn stat(&self, path: &str) -> Result<Option<ObjectMetadata>, StorageError>;

    async fn delete(&self, path: &str) -> Result<(), StorageError>;

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMetadata>, StorageError>;
}

/// Sink half of [`BlobStorage::open_write`]
#[async_trait::async_trait]
pub trait BlobWriter: Send {
    async fn write(&mut self, data: Bytes) -> Result<(), StorageError>;

    /// Make the object visible and return its size
    async fn finish(self: Box<Self>) -> Result<u64, StorageError>;

    /// Give up on the object and release anything written so far
    async fn abort(self: Box<Self>);
}

/// Reject keys that could escape a storage root
pub fn validate_key(path: &str) -> Result<(), StorageError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");

    if invalid {
        return Err(StorageError::InvalidKey(path.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("abc_file.bin").is_ok());
        assert!(validate_key("exports/job.zip").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("/etc/passwd").is_err());
        assert!(validate_key("a/../b").is_err());
        assert!(validate_key("a//b").is_err());
        assert!(validate_key("a\\b").is_err());
    }
}
