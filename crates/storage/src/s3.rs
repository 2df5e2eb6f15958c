//! AWS S3 backend.

use crate::{Error, Result, StorageService};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use bytes::Bytes;
use tracing::debug;

/// S3-backed storage. Static credentials are optional; without them the
/// default provider chain (role auth, env, profile) applies.
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    registry_base: String,
}

impl S3Storage {
    pub async fn new(
        region: &str,
        bucket: &str,
        registry_base: String,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self> {
        if bucket.is_empty() {
            return Err(Error::backend("AWS bucket name is not configured"));
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(region.to_string()));
        if !access_key.is_empty() {
            loader = loader.credentials_provider(Credentials::new(
                access_key, secret_key, None, None, "terrakube",
            ));
        }
        if !endpoint.is_empty() {
            loader = loader.endpoint_url(endpoint);
        }
        let config = loader.load().await;

        Ok(Self {
            client: aws_sdk_s3::Client::new(&config),
            bucket: bucket.to_string(),
            registry_base,
        })
    }
}

#[async_trait]
impl StorageService for S3Storage {
    async fn upload(&self, key: &str, content: Bytes) -> Result<()> {
        debug!(bucket = %self.bucket, key, "uploading object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(content))
            .send()
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    Error::not_found(key)
                } else {
                    Error::backend(service_error.to_string())
                }
            })?;

        let data = output
            .body
            .collect()
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
        Ok(data.into_bytes())
    }

    fn registry_base_url(&self) -> &str {
        &self.registry_base
    }
}
