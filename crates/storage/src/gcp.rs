//! Google Cloud Storage backend.
//!
//! Driven through the `gsutil` CLI the same way instance data syncing does
//! it; credentials, when provided inline, are materialized once and passed
//! via `GOOGLE_APPLICATION_CREDENTIALS`.

use crate::{Error, Result, StorageService};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

pub struct GcpStorage {
    bucket: String,
    credentials_file: Option<PathBuf>,
    registry_base: String,
}

impl GcpStorage {
    pub fn new(bucket: &str, credentials_json: &str, registry_base: String) -> Result<Self> {
        if bucket.is_empty() {
            return Err(Error::backend("GCP bucket name is not configured"));
        }

        let credentials_file = if credentials_json.is_empty() {
            None
        } else {
            let path = std::env::temp_dir().join("terrakube-gcp-credentials.json");
            std::fs::write(&path, credentials_json)?;
            Some(path)
        };

        Ok(Self {
            bucket: bucket.to_string(),
            credentials_file,
            registry_base,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("gs://{}/{}", self.bucket, key)
    }

    async fn gsutil(&self, args: &[&str]) -> Result<std::process::Output> {
        let mut cmd = Command::new("gsutil");
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(path) = &self.credentials_file {
            cmd.env("GOOGLE_APPLICATION_CREDENTIALS", path);
        }
        cmd.output()
            .await
            .map_err(|e| Error::backend(format!("gsutil did not run: {e}")))
    }
}

#[async_trait]
impl StorageService for GcpStorage {
    async fn upload(&self, key: &str, content: Bytes) -> Result<()> {
        let staging = tempfile::NamedTempFile::new()?;
        tokio::fs::write(staging.path(), &content).await?;

        let url = self.object_url(key);
        debug!(%url, "uploading object via gsutil");
        let staging_path = staging.path().to_string_lossy().into_owned();
        let output = self.gsutil(&["cp", staging_path.as_str(), url.as_str()]).await?;
        if !output.status.success() {
            return Err(Error::backend(format!(
                "gsutil cp failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        let staging = tempfile::NamedTempFile::new()?;
        let url = self.object_url(key);
        let staging_path = staging.path().to_string_lossy().into_owned();
        let output = self.gsutil(&["cp", url.as_str(), staging_path.as_str()]).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("No URLs matched") || stderr.contains("does not exist") {
                return Err(Error::not_found(key));
            }
            return Err(Error::backend(format!("gsutil cp failed: {stderr}")));
        }

        let data = tokio::fs::read(staging.path()).await?;
        Ok(Bytes::from(data))
    }

    fn registry_base_url(&self) -> &str {
        &self.registry_base
    }
}
