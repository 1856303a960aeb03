//! S3-compatible blob storage
//!
//! Staged blocks are plain objects under `<staging prefix>/<path>/<hex(block id)>`.
//! Commit streams them, in order, through the same multipart writer that
//! backs `open_write`, then drops the staging prefix.

use bytes::{Bytes, BytesMut};
use futures::StreamExt;

use super::{validate_key, BlobStorage, BlobWriter, ByteStream, ObjectMetadata, S3Client};
use crate::error::StorageError;

/// S3 minimum part size is 5 MiB; parts are cut at 8 MiB
const PART_SIZE: usize = 8 * 1024 * 1024;

#[derive(Clone)]
pub struct S3BlobStorage {
    client: S3Client,
    staging_prefix: String,
}

impl S3BlobStorage {
    pub fn new(client: S3Client, staging_prefix: impl Into<String>) -> Self {
        let staging_prefix = staging_prefix.into().trim_end_matches('/').to_string();
        Self {
            client,
            staging_prefix,
        }
    }

    fn staging_dir(&self, path: &str) -> String {
        format!("{}/{}/", self.staging_prefix, path)
    }

    fn block_key(&self, path: &str, block_id: &str) -> String {
        format!("{}{}", self.staging_dir(path), hex::encode(block_id.as_bytes()))
    }

    fn writer(&self, path: &str, content_type: &str) -> S3Writer {
        S3Writer {
            client: self.client.clone(),
            key: path.to_string(),
            content_type: content_type.to_string(),
            buffer: BytesMut::new(),
            upload_id: None,
            parts: Vec::new(),
            written: 0,
        }
    }
}

fn into_stream(body: aws_sdk_s3::primitives::ByteStream) -> ByteStream {
    futures::stream::unfold(body, |mut body| async move {
        match body.next().await {
            Some(Ok(bytes)) => Some((Ok(bytes), body)),
            Some(Err(e)) => Some((Err(StorageError::SdkError(e.to_string())), body)),
            None => None,
        }
    })
    .boxed()
}

#[async_trait::async_trait]
impl BlobStorage for S3BlobStorage {
    async fn stage_chunk(
        &self,
        path: &str,
        block_id: &str,
        data: Bytes,
    ) -> Result<(), StorageError> {
        validate_key(path)?;
        self.client
            .put_object(
                &self.block_key(path, block_id),
                data,
                "application/octet-stream",
            )
            .await
    }

    async fn commit_chunks(
        &self,
        path: &str,
        block_ids: &[String],
        content_type: &str,
    ) -> Result<u64, StorageError> {
        validate_key(path)?;
        let mut writer = self.writer(path, content_type);

        for id in block_ids {
            let Some(body) = self.client.get_object_stream(&self.block_key(path, id)).await? else {
                tracing::warn!(path = %path, block_id = %id, "Skipping unstaged block");
                continue;
            };

            let mut chunks = into_stream(body);
            while let Some(chunk) = chunks.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        Box::new(writer).abort().await;
                        return Err(e);
                    }
                };
                if let Err(e) = writer.push(chunk).await {
                    Box::new(writer).abort().await;
                    return Err(e);
                }
            }
        }

        let size = Box::new(writer).finish().await?;
        let removed = self
            .client
            .delete_objects_with_prefix(&self.staging_dir(path))
            .await?;
        tracing::debug!(path = %path, removed, "Removed staged blocks");
        Ok(size)
    }

    async fn abort_staged(&self, path: &str) -> Result<(), StorageError> {
        self.client
            .delete_objects_with_prefix(&self.staging_dir(path))
            .await?;
        Ok(())
    }

    async fn open_write(
        &self,
        path: &str,
        content_type: &str,
    ) -> Result<Box<dyn BlobWriter>, StorageError> {
        validate_key(path)?;
        Ok(Box::new(self.writer(path, content_type)))
    }

    async fn open_read(&self, path: &str) -> Result<Option<ByteStream>, StorageError> {
        validate_key(path)?;
        Ok(self.client.get_object_stream(path).await?.map(into_stream))
    }

    async fn stat(&self, path: &str) -> Result<Option<ObjectMetadata>, StorageError> {
        validate_key(path)?;
        self.client.head_object(path).await
    }

    async fn delete(&self, path: &str) -> Result<(), StorageError> {
        validate_key(path)?;
        self.client.delete_object(path).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMetadata>, StorageError> {
        self.client.list_all_objects(Some(prefix)).await
    }
}

/// Multipart writer holding at most one part in memory
///
/// The multipart upload is only started once a full part has accumulated;
/// smaller objects go out as one PUT on finish.
struct S3Writer {
    client: S3Client,
    key: String,
    content_type: String,
    buffer: BytesMut,
    upload_id: Option<String>,
    parts: Vec<aws_sdk_s3::types::CompletedPart>,
    written: u64,
}

impl S3Writer {
    async fn push(&mut self, data: Bytes) -> Result<(), StorageError> {
        self.written += data.len() as u64;
        self.buffer.extend_from_slice(&data);

        while self.buffer.len() >= PART_SIZE {
            let part = self.buffer.split_to(PART_SIZE).freeze();
            self.upload_part(part).await?;
        }
        Ok(())
    }

    async fn upload_part(&mut self, data: Bytes) -> Result<(), StorageError> {
        let upload_id = match &self.upload_id {
            Some(id) => id.clone(),
            None => {
                let id = self
                    .client
                    .create_multipart_upload(&self.key, &self.content_type)
                    .await?;
                self.upload_id = Some(id.clone());
                id
            }
        };

        let part_number = self.parts.len() as i32 + 1;
        let part = self
            .client
            .upload_part(&self.key, &upload_id, part_number, data)
            .await?;
        self.parts.push(part);
        Ok(())
    }

    async fn abandon(&mut self) {
        if let Some(upload_id) = self.upload_id.take() {
            if let Err(e) = self.client.abort_multipart_upload(&self.key, &upload_id).await {
                tracing::warn!(key = %self.key, "Failed to abort multipart upload: {}", e);
            }
        }
    }

    async fn complete(&mut self) -> Result<(), StorageError> {
        if self.upload_id.is_none() {
            let data = self.buffer.split().freeze();
            return self.client.put_object(&self.key, data, &self.content_type).await;
        }

        if !self.buffer.is_empty() {
            let tail = self.buffer.split().freeze();
            self.upload_part(tail).await?;
        }

        let upload_id = self.upload_id.clone().unwrap_or_default();
        let parts = std::mem::take(&mut self.parts);
        self.client
            .complete_multipart_upload(&self.key, &upload_id, parts)
            .await
    }
}

#[async_trait::async_trait]
impl BlobWriter for S3Writer {
    async fn write(&mut self, data: Bytes) -> Result<(), StorageError> {
        if let Err(e) = self.push(data).await {
            self.abandon().await;
            return Err(e);
        }
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> Result<u64, StorageError> {
        if let Err(e) = self.complete().await {
            self.abandon().await;
            return Err(e);
        }
        tracing::debug!(key = %self.key, size = self.written, "Object written");
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) {
        self.abandon().await;
    }
}
