//! Azure Blob Storage backend.

use crate::{Error, Result, StorageService};
use async_trait::async_trait;
use azure_core::StatusCode;
use azure_storage::StorageCredentials;
use azure_storage_blobs::prelude::{BlobServiceClient, ContainerClient};
use bytes::Bytes;
use tracing::debug;

pub struct AzureStorage {
    container: ContainerClient,
    registry_base: String,
}

impl AzureStorage {
    pub fn new(
        account: &str,
        access_key: &str,
        container: &str,
        registry_base: String,
    ) -> Result<Self> {
        if account.is_empty() || container.is_empty() {
            return Err(Error::backend(
                "Azure storage account/container is not configured",
            ));
        }

        let credentials = StorageCredentials::access_key(account.to_string(), access_key.to_string());
        let service = BlobServiceClient::new(account, credentials);

        Ok(Self {
            container: service.container_client(container),
            registry_base,
        })
    }

    fn is_not_found(error: &azure_core::Error) -> bool {
        error
            .as_http_error()
            .map(|http| http.status() == StatusCode::NotFound)
            .unwrap_or(false)
    }
}

#[async_trait]
impl StorageService for AzureStorage {
    async fn upload(&self, key: &str, content: Bytes) -> Result<()> {
        debug!(key, "uploading blob");
        self.container
            .blob_client(key)
            .put_block_blob(content)
            .await
            .map_err(|e| Error::backend(e.to_string()))?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        match self.container.blob_client(key).get_content().await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if Self::is_not_found(&e) => Err(Error::not_found(key)),
            Err(e) => Err(Error::backend(e.to_string())),
        }
    }

    fn registry_base_url(&self) -> &str {
        &self.registry_base
    }
}
