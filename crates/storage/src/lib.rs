//! Object storage behind the executor and the module registry.
//!
//! Backends are polymorphic over `{upload, download, search_module,
//! download_module}`; keys are `/`-separated logical paths. Module packaging
//! (clone at tag, zip the selected folder, cache by coordinate) is shared by
//! every backend through the trait's default methods.

mod azure;
mod gcp;
mod nop;
mod package;
mod s3;

pub use azure::AzureStorage;
pub use gcp::GcpStorage;
pub use nop::NopStorage;
pub use package::{extract_readme, zip_directory};
pub use s3::S3Storage;

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use terrakube_core::config::{Config, StorageType};
use thiserror::Error;
use tracing::info;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// The object does not exist. Callers treat this as "no prior artifact".
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("module clone failed: {0}")]
    Clone(#[from] terrakube_git::Error),

    #[error("module packaging failed: {0}")]
    Package(String),

    #[error("operation not supported by this storage backend")]
    Unsupported,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Registry coordinate of a module artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleCoordinate {
    pub organization: String,
    pub name: String,
    pub provider: String,
    pub version: String,
}

impl ModuleCoordinate {
    /// Storage key of the packaged module zip.
    pub fn zip_key(&self) -> String {
        format!(
            "registry/{}/{}/{}/{}/module.zip",
            self.organization, self.name, self.provider, self.version
        )
    }

    /// Public download path served by the registry.
    pub fn download_path(&self) -> String {
        format!(
            "terraform/modules/v1/download/{}/{}/{}/{}/module.zip",
            self.organization, self.name, self.provider, self.version
        )
    }
}

/// Where and how to fetch a module's source tree.
#[derive(Debug, Clone, Default)]
pub struct ModuleSource {
    pub source: String,
    pub vcs_type: String,
    pub access_token: String,
    pub tag_prefix: String,
    pub folder: String,
}

/// Backend-polymorphic storage operations.
#[async_trait]
pub trait StorageService: Send + Sync {
    /// Upload `content` under `key`, overwriting any previous object.
    async fn upload(&self, key: &str, content: Bytes) -> Result<()>;

    /// Download the object at `key`; missing objects surface as
    /// [`Error::NotFound`].
    async fn download(&self, key: &str) -> Result<Bytes>;

    /// Base URL of the registry serving module downloads.
    fn registry_base_url(&self) -> &str;

    /// Resolve a module coordinate to a downloadable zip URL, packaging the
    /// module from its VCS source on first request.
    async fn search_module(
        &self,
        coordinate: &ModuleCoordinate,
        source: &ModuleSource,
    ) -> Result<String> {
        let url = format!(
            "{}/{}",
            self.registry_base_url().trim_end_matches('/'),
            coordinate.download_path()
        );

        // Packaged zips are immutable per (coordinate, tag); an existing
        // object short-circuits the clone.
        if self.download(&coordinate.zip_key()).await.is_ok() {
            return Ok(url);
        }

        let checkout = terrakube_git::clone_module(
            &source.source,
            &coordinate.version,
            &source.vcs_type,
            &source.access_token,
            &source.tag_prefix,
            &source.folder,
        )
        .await?;

        let zipped = zip_directory(&checkout.path);
        let _ = std::fs::remove_dir_all(&checkout.root);
        let zipped = zipped?;

        info!(
            key = %coordinate.zip_key(),
            commit = %checkout.commit_id,
            bytes = zipped.len(),
            "packaged module"
        );
        self.upload(&coordinate.zip_key(), Bytes::from(zipped)).await?;
        Ok(url)
    }

    /// Download a previously packaged module zip.
    async fn download_module(&self, coordinate: &ModuleCoordinate) -> Result<Bytes> {
        self.download(&coordinate.zip_key()).await
    }
}

/// Build the storage backend selected by configuration.
pub async fn from_config(cfg: &Config) -> Result<Arc<dyn StorageService>> {
    let registry_base = cfg.registry_base_url.clone();
    match cfg.storage_type {
        StorageType::Aws => Ok(Arc::new(
            S3Storage::new(
                &cfg.aws_region,
                &cfg.aws_bucket_name,
                registry_base,
                &cfg.aws_endpoint,
                &cfg.aws_access_key,
                &cfg.aws_secret_key,
            )
            .await?,
        )),
        StorageType::Azure => Ok(Arc::new(AzureStorage::new(
            &cfg.azure_account_name,
            &cfg.azure_account_key,
            &cfg.azure_container_name,
            registry_base,
        )?)),
        StorageType::Gcp => Ok(Arc::new(GcpStorage::new(
            &cfg.gcp_bucket_name,
            &cfg.gcp_credentials,
            registry_base,
        )?)),
        StorageType::Local => {
            info!("storage type LOCAL, artifact persistence disabled");
            Ok(Arc::new(NopStorage::new(registry_base)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_coordinate_keys() {
        let coordinate = ModuleCoordinate {
            organization: "acme".into(),
            name: "vpc".into(),
            provider: "aws".into(),
            version: "1.2.3".into(),
        };
        assert_eq!(coordinate.zip_key(), "registry/acme/vpc/aws/1.2.3/module.zip");
        assert_eq!(
            coordinate.download_path(),
            "terraform/modules/v1/download/acme/vpc/aws/1.2.3/module.zip"
        );
    }
}
