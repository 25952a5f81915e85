//! Durable storage for resolved output images.

use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use bridge_core::encoding::image_mime_type;

use crate::config::BucketConfig;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Upload of {key} failed: {message}")]
    Upload { key: String, message: String },

    #[error("Could not sign download URL for {key}: {message}")]
    Presign { key: String, message: String },

    #[error("Upload of {key} failed: no bucket name configured for {endpoint}, set BUCKET_NAME")]
    MissingBucket { key: String, endpoint: String },
}

/// Destination for output images when inline encoding is not wanted.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store `bytes` for `job_id` and return a URL the caller can fetch
    /// them from.
    async fn put_image(
        &self,
        job_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError>;
}

/// Object key for an output image: one prefix per job.
pub fn object_key(job_id: &str, filename: &str) -> String {
    format!("{job_id}/{filename}")
}

/// S3-compatible bucket (AWS, MinIO, R2, ...).
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: Option<String>,
    endpoint_url: String,
    url_expiry: Duration,
}

impl S3ObjectStore {
    pub async fn from_config(config: &BucketConfig) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&config.endpoint_url);

        // Without explicit keys the default provider chain applies.
        if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                id.clone(),
                secret.clone(),
                None,
                None,
                "bucket-env",
            ));
        }

        let shared = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(config.force_path_style)
            .build();

        tracing::info!(
            endpoint = %config.endpoint_url,
            bucket = ?config.name,
            "Output uploads enabled",
        );

        Self {
            client: aws_sdk_s3::Client::from_conf(s3_config),
            bucket: config.name.clone(),
            endpoint_url: config.endpoint_url.clone(),
            url_expiry: config.url_expiry,
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_image(
        &self,
        job_id: &str,
        filename: &str,
        bytes: Vec<u8>,
    ) -> Result<String, StorageError> {
        let key = object_key(job_id, filename);
        let bucket = require_bucket(self.bucket.as_deref(), &self.endpoint_url, &key)?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(&key)
            .content_type(image_mime_type(filename))
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| StorageError::Upload {
                key: key.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let presigning = PresigningConfig::expires_in(self.url_expiry).map_err(|e| {
            StorageError::Presign {
                key: key.clone(),
                message: e.to_string(),
            }
        })?;

        let request = self
            .client
            .get_object()
            .bucket(bucket)
            .key(&key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::Presign {
                key: key.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!(bucket, %key, "Uploaded output image");
        Ok(request.uri().to_string())
    }
}

fn require_bucket<'a>(
    bucket: Option<&'a str>,
    endpoint: &str,
    key: &str,
) -> Result<&'a str, StorageError> {
    bucket.ok_or_else(|| StorageError::MissingBucket {
        key: key.to_string(),
        endpoint: endpoint.to_string(),
    })
}
