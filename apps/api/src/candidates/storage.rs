//! Object storage for original resume files.

use std::future::Future;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{info, warn};

use crate::candidates::ingest::ResumeUpload;
use crate::errors::AppError;

#[async_trait]
pub trait ResumeStorage: Send + Sync {
    async fn put(&self, key: &str, upload: &ResumeUpload) -> Result<(), AppError>;
    async fn delete(&self, key: &str) -> Result<(), AppError>;
}

pub struct S3ResumeStorage {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl S3ResumeStorage {
    pub fn new(client: aws_sdk_s3::Client, bucket: String) -> Self {
        Self { client, bucket }
    }
}

#[async_trait]
impl ResumeStorage for S3ResumeStorage {
    async fn put(&self, key: &str, upload: &ResumeUpload) -> Result<(), AppError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(upload.bytes.clone()))
            .content_type(
                upload
                    .content_type
                    .as_deref()
                    .unwrap_or("application/octet-stream"),
            )
            .send()
            .await
            .map_err(|e| AppError::S3(format!("Resume upload failed: {e}")))?;
        info!("Stored resume at s3://{}/{}", self.bucket, key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), AppError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| AppError::S3(format!("Resume delete failed: {e}")))?;
        info!("Removed s3://{}/{}", self.bucket, key);
        Ok(())
    }
}

/// Stores `upload` under `key`, then runs `record`. When `record` fails the
/// stored object is deleted again and `record`'s error is returned.
pub async fn store_then_record<R, F>(
    storage: &dyn ResumeStorage,
    key: &str,
    upload: &ResumeUpload,
    record: F,
) -> Result<R, AppError>
where
    F: Future<Output = Result<R, AppError>>,
{
    storage.put(key, upload).await?;
    match record.await {
        Ok(value) => Ok(value),
        Err(err) => {
            if let Err(cleanup) = storage.delete(key).await {
                warn!("Could not remove orphaned resume object {key}: {cleanup}");
            }
            Err(err)
        }
    }
}
