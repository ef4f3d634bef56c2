//! Backend selected at runtime from configuration

use crate::config::{BlobstoreConfig, ProviderConfig};
use crate::{
    Backend, ListPage, LocalBackend, MemoryBackend, RedirectBlobstore, RedirectPolicy, Result,
    S3Backend, SecureLinkSigner, StreamingBlobstore, UrlSigner,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::info;

/// A backend that can be memory, local filesystem or S3
#[derive(Clone)]
pub enum FlexibleBackend {
    /// In-memory storage
    Memory(MemoryBackend),
    /// Files under a root directory
    Local(LocalBackend),
    /// Objects in an S3 bucket
    S3(S3Backend),
}

impl FlexibleBackend {
    /// Build the backend described by `config`
    pub async fn from_config(config: &BlobstoreConfig) -> Result<Self> {
        let backend = match &config.provider {
            ProviderConfig::Memory { capacity_bytes } => {
                let store = match capacity_bytes {
                    Some(capacity) => MemoryBackend::with_capacity(*capacity),
                    None => MemoryBackend::new(),
                };
                Self::Memory(store)
            }
            ProviderConfig::Local { root } => Self::Local(LocalBackend::new(root.clone()).await?),
            ProviderConfig::S3(s3) => Self::S3(S3Backend::new(s3)?),
        };
        info!(provider = backend.provider_name(), "Blobstore backend ready");
        Ok(backend)
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Local(_) => "local",
            Self::S3(_) => "s3",
        }
    }

    /// The backend's own presigner, if it has one
    pub fn native_signer(&self) -> Option<Arc<dyn UrlSigner>> {
        match self {
            Self::S3(store) => Some(Arc::new(store.clone())),
            Self::Memory(_) | Self::Local(_) => None,
        }
    }

    /// Wrap in the redirect-capable adapter
    pub fn into_redirect(
        self,
        config: &BlobstoreConfig,
        policy: RedirectPolicy,
        secure_link: SecureLinkSigner,
    ) -> RedirectBlobstore<Self> {
        let signer = self
            .native_signer()
            .unwrap_or_else(|| Arc::new(secure_link));
        RedirectBlobstore::new(self, signer)
            .with_policy(policy)
            .with_delete_options(config.delete_options())
    }

    /// Wrap in the streaming-only adapter
    pub fn into_streaming(self, config: &BlobstoreConfig) -> StreamingBlobstore<Self> {
        StreamingBlobstore::new(self).with_delete_options(config.delete_options())
    }
}

#[async_trait]
impl Backend for FlexibleBackend {
    async fn exists(&self, key: &str) -> Result<bool> {
        match self {
            Self::Memory(store) => store.exists(key).await,
            Self::Local(store) => store.exists(key).await,
            Self::S3(store) => store.exists(key).await,
        }
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        match self {
            Self::Memory(store) => store.get(key).await,
            Self::Local(store) => store.get(key).await,
            Self::S3(store) => store.get(key).await,
        }
    }

    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        match self {
            Self::Memory(store) => store.put(key, content).await,
            Self::Local(store) => store.put(key, content).await,
            Self::S3(store) => store.put(key, content).await,
        }
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<()> {
        match self {
            Self::Memory(store) => store.copy(src, dest).await,
            Self::Local(store) => store.copy(src, dest).await,
            Self::S3(store) => store.copy(src, dest).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Self::Memory(store) => store.delete(key).await,
            Self::Local(store) => store.delete(key).await,
            Self::S3(store) => store.delete(key).await,
        }
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage> {
        match self {
            Self::Memory(store) => store.list_page(prefix, start_after, limit).await,
            Self::Local(store) => store.list_page(prefix, start_after, limit).await,
            Self::S3(store) => store.list_page(prefix, start_after, limit).await,
        }
    }

    async fn delete_many(&self, keys: Vec<String>, concurrency: usize) -> Result<usize> {
        match self {
            Self::Memory(store) => store.delete_many(keys, concurrency).await,
            Self::Local(store) => store.delete_many(keys, concurrency).await,
            Self::S3(store) => store.delete_many(keys, concurrency).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Blobstore;
    use tempfile::TempDir;

    fn secure_link() -> SecureLinkSigner {
        SecureLinkSigner::new("http://localhost:8080", "droplets", "secret").unwrap()
    }

    #[tokio::test]
    async fn test_from_config_memory() {
        let backend = FlexibleBackend::from_config(&BlobstoreConfig::memory()).await.unwrap();
        assert_eq!(backend.provider_name(), "memory");
        assert!(backend.native_signer().is_none());
    }

    #[tokio::test]
    async fn test_from_config_local_creates_root() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("droplets");
        let config = BlobstoreConfig::local(&root);

        let backend = FlexibleBackend::from_config(&config).await.unwrap();
        assert_eq!(backend.provider_name(), "local");
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn test_local_redirect_uses_secure_links() {
        let dir = TempDir::new().unwrap();
        let config = BlobstoreConfig::local(dir.path());
        let store = FlexibleBackend::from_config(&config)
            .await
            .unwrap()
            .into_redirect(&config, RedirectPolicy::default(), secure_link());

        store.put("guid/sha", Bytes::from_static(b"droplet")).await.unwrap();
        let location = store.head_or_redirect_as_get("guid/sha").await.unwrap();
        assert_eq!(location.url().path(), "/signed/droplets/guid/sha");
    }
}
