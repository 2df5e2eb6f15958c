//! No-op backend for local development without object storage.

use crate::{Error, Result, StorageService};
use async_trait::async_trait;
use bytes::Bytes;

/// Accepts every upload and has nothing to download. Downloads surface as
/// `NotFound`, which callers already treat as "no prior artifact".
pub struct NopStorage {
    registry_base: String,
}

impl NopStorage {
    pub fn new(registry_base: String) -> Self {
        Self { registry_base }
    }
}

#[async_trait]
impl StorageService for NopStorage {
    async fn upload(&self, _key: &str, _content: Bytes) -> Result<()> {
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Bytes> {
        Err(Error::not_found(key))
    }

    fn registry_base_url(&self) -> &str {
        &self.registry_base
    }

    async fn search_module(
        &self,
        _coordinate: &crate::ModuleCoordinate,
        _source: &crate::ModuleSource,
    ) -> Result<String> {
        Err(Error::Unsupported)
    }

    async fn download_module(&self, _coordinate: &crate::ModuleCoordinate) -> Result<Bytes> {
        Err(Error::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_download_is_not_found() {
        let storage = NopStorage::new("http://localhost:8075".into());
        let err = storage.download("tfstate/a/b/state.json").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(storage.upload("any", Bytes::from_static(b"x")).await.is_ok());
    }
}
