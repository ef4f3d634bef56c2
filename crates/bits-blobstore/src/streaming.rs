//! Streaming-only adapter over a [`Backend`]

use crate::key::validate_key;
use crate::prefix::{delete_prefix, PrefixDeleteOptions};
use crate::{Backend, NoRedirectBlobstore, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, instrument};

/// [`NoRedirectBlobstore`] that moves every byte through the service
pub struct StreamingBlobstore<B> {
    backend: B,
    delete_options: PrefixDeleteOptions,
}

impl<B: Backend> StreamingBlobstore<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            delete_options: PrefixDeleteOptions::default(),
        }
    }

    pub fn with_delete_options(mut self, options: PrefixDeleteOptions) -> Self {
        self.delete_options = options;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }
}

#[async_trait]
impl<B: Backend> NoRedirectBlobstore for StreamingBlobstore<B> {
    async fn exists(&self, path: &str) -> Result<bool> {
        validate_key(path)?;
        self.backend.exists(path).await
    }

    #[instrument(skip(self))]
    async fn get(&self, path: &str) -> Result<Bytes> {
        validate_key(path)?;
        self.backend.get(path).await
    }

    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn put(&self, path: &str, content: Bytes) -> Result<()> {
        validate_key(path)?;
        self.backend.put(path, content).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, path: &str) -> Result<()> {
        validate_key(path)?;
        self.backend.delete(path).await
    }

    #[instrument(skip(self))]
    async fn delete_dir(&self, prefix: &str) -> Result<()> {
        let report = delete_prefix(&self.backend, prefix, &self.delete_options).await?;
        debug!(deleted = report.deleted, "Directory deleted");
        Ok(())
    }
}
