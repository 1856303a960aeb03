//! S3-compatible storage client
//!
//! Wraps the AWS SDK for S3-compatible storage access.

use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{Credentials, Region},
    primitives::ByteStream,
    types::{CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier},
    Client,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::config::S3Config;
use crate::error::StorageError;

use super::types::{ListOptions, ObjectList, ObjectMetadata};

/// S3 caps batch deletes at 1000 keys
const DELETE_BATCH: usize = 1000;

/// S3-compatible storage client
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    bucket: String,
}

fn is_missing(message: &str) -> bool {
    message.contains("404") || message.contains("NoSuchKey") || message.contains("NotFound")
}

fn to_datetime(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

impl S3Client {
    /// Create a new S3 client from configuration
    pub async fn new(config: &S3Config) -> Result<Self, StorageError> {
        let credentials = Credentials::new(
            &config.access_key,
            &config.secret_key,
            None,
            None,
            "filedepot",
        );

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());

        let s3_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint)
            .region(Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(true) // Required for MinIO and other S3-compatible services
            .build();

        let client = Client::from_conf(s3_config);

        // Test connection by checking if bucket exists
        let bucket = config.bucket.clone();
        match client.head_bucket().bucket(&bucket).send().await {
            Ok(_) => {
                tracing::info!("Connected to S3 bucket: {}", bucket);
            }
            Err(e) => {
                tracing::warn!(
                    "Could not verify bucket {}: {}. Will attempt operations anyway.",
                    bucket,
                    e
                );
            }
        }

        Ok(Self { client, bucket })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// List objects in the bucket
    pub async fn list_objects(&self, options: ListOptions) -> Result<ObjectList, StorageError> {
        let mut request = self.client.list_objects_v2().bucket(&self.bucket);

        if let Some(prefix) = options.prefix {
            request = request.prefix(prefix);
        }

        if let Some(max_keys) = options.max_keys {
            request = request.max_keys(max_keys);
        }

        if let Some(token) = options.continuation_token {
            request = request.continuation_token(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to list objects: {}", e)))?;

        let objects: Vec<ObjectMetadata> = response
            .contents()
            .iter()
            .map(|obj| ObjectMetadata {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or(0).max(0) as u64,
                last_modified: obj.last_modified().and_then(to_datetime),
                content_type: None, // Not available in list response
                etag: obj.e_tag().map(|s| s.to_string()),
            })
            .collect();

        Ok(ObjectList {
            objects,
            continuation_token: response.next_continuation_token().map(|s| s.to_string()),
            is_truncated: response.is_truncated().unwrap_or(false),
        })
    }

    /// List all objects with a given prefix (handles pagination)
    pub async fn list_all_objects(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<ObjectMetadata>, StorageError> {
        let mut all_objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let mut options = ListOptions::new().with_max_keys(1000);

            if let Some(p) = prefix {
                options = options.with_prefix(p);
            }

            if let Some(token) = continuation_token.take() {
                options = options.with_continuation_token(token);
            }

            let result = self.list_objects(options).await?;
            all_objects.extend(result.objects);

            if !result.is_truncated {
                break;
            }

            continuation_token = result.continuation_token;
        }

        Ok(all_objects)
    }

    /// Get object metadata (HEAD request), `None` when absent
    pub async fn head_object(&self, key: &str) -> Result<Option<ObjectMetadata>, StorageError> {
        let response = match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if is_missing(&format!("{:?}", e)) => return Ok(None),
            Err(e) => {
                return Err(StorageError::SdkError(format!(
                    "Failed to head object {}: {}",
                    key, e
                )))
            }
        };

        Ok(Some(ObjectMetadata {
            key: key.to_string(),
            size: response.content_length().unwrap_or(0).max(0) as u64,
            last_modified: response.last_modified().and_then(to_datetime),
            content_type: response.content_type().map(|s| s.to_string()),
            etag: response.e_tag().map(|s| s.to_string()),
        }))
    }

    /// Get object as a byte stream, `None` when absent
    pub async fn get_object_stream(&self, key: &str) -> Result<Option<ByteStream>, StorageError> {
        match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => Ok(Some(response.body)),
            Err(e) if is_missing(&format!("{:?}", e)) => Ok(None),
            Err(e) => Err(StorageError::SdkError(format!(
                "Failed to get object stream {}: {}",
                key, e
            ))),
        }
    }

    /// Upload an object in one request
    pub async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<(), StorageError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::SdkError(format!("Failed to put object {}: {}", key, e)))?;
        Ok(())
    }

    /// Delete one object; deleting a missing key succeeds
    pub async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!("Failed to delete object {}: {}", key, e))
            })?;
        Ok(())
    }

    /// Delete every object under a prefix, returning how many were removed
    pub async fn delete_objects_with_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let objects = self.list_all_objects(Some(prefix)).await?;
        let count = objects.len();

        for batch in objects.chunks(DELETE_BATCH) {
            let identifiers = batch
                .iter()
                .map(|o| ObjectIdentifier::builder().key(&o.key).build())
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StorageError::SdkError(e.to_string()))?;

            let delete = Delete::builder()
                .set_objects(Some(identifiers))
                .quiet(true)
                .build()
                .map_err(|e| StorageError::SdkError(e.to_string()))?;

            self.client
                .delete_objects()
                .bucket(&self.bucket)
                .delete(delete)
                .send()
                .await
                .map_err(|e| {
                    StorageError::SdkError(format!("Failed to delete prefix {}: {}", prefix, e))
                })?;
        }

        Ok(count)
    }

    /// Start a multipart upload and return its upload id
    pub async fn create_multipart_upload(
        &self,
        key: &str,
        content_type: &str,
    ) -> Result<String, StorageError> {
        let response = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!("Failed to start multipart upload {}: {}", key, e))
            })?;

        response
            .upload_id()
            .map(|id| id.to_string())
            .ok_or_else(|| StorageError::SdkError(format!("No upload id returned for {}", key)))
    }

    /// Upload one part of a multipart upload
    pub async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        data: Bytes,
    ) -> Result<CompletedPart, StorageError> {
        let response = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!(
                    "Failed to upload part {} of {}: {}",
                    part_number, key, e
                ))
            })?;

        Ok(CompletedPart::builder()
            .set_e_tag(response.e_tag().map(|s| s.to_string()))
            .part_number(part_number)
            .build())
    }

    pub async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> Result<(), StorageError> {
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!(
                    "Failed to complete multipart upload {}: {}",
                    key, e
                ))
            })?;
        Ok(())
    }

    pub async fn abort_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
    ) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| {
                StorageError::SdkError(format!("Failed to abort multipart upload {}: {}", key, e))
            })?;
        Ok(())
    }
}
