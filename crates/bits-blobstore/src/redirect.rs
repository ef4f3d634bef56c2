//! Redirect-capable adapter over a [`Backend`]

use crate::key::validate_key;
use crate::prefix::{delete_prefix, PrefixDeleteOptions};
use crate::{
    Backend, Blobstore, BlobstoreError, Fetched, RedirectLocation, Result, SignMethod, UrlSigner,
};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Default validity of issued locations
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(3600);

/// Longest validity a presigned location may carry
pub const MAX_EXPIRES_IN: Duration = Duration::from_secs(7 * 24 * 3600);

/// How a [`RedirectBlobstore`] answers reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RedirectPolicy {
    /// Fail `NotFound` for absent keys before issuing a location. When off,
    /// locations are issued unconditionally and the backing store reports
    /// absence when the location is fetched.
    pub verify_existence: bool,
    /// Return bodies inline from `get_or_redirect` instead of a location
    pub inline_reads: bool,
    pub expires_in: Duration,
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self {
            verify_existence: true,
            inline_reads: false,
            expires_in: DEFAULT_EXPIRES_IN,
        }
    }
}

impl RedirectPolicy {
    /// Issue locations without checking the key first
    pub fn pure_redirect() -> Self {
        Self {
            verify_existence: false,
            ..Self::default()
        }
    }

    pub fn with_expires_in(mut self, expires_in: Duration) -> Result<Self> {
        if expires_in.is_zero() || expires_in > MAX_EXPIRES_IN {
            return Err(BlobstoreError::Configuration(format!(
                "expiry must be between 1 second and {} seconds, got {} seconds",
                MAX_EXPIRES_IN.as_secs(),
                expires_in.as_secs()
            )));
        }
        self.expires_in = expires_in;
        Ok(self)
    }
}

/// [`Blobstore`] built from a backend and a signer for its locations
pub struct RedirectBlobstore<B> {
    backend: B,
    signer: Arc<dyn UrlSigner>,
    policy: RedirectPolicy,
    delete_options: PrefixDeleteOptions,
}

impl<B: Backend> RedirectBlobstore<B> {
    pub fn new(backend: B, signer: Arc<dyn UrlSigner>) -> Self {
        Self {
            backend,
            signer,
            policy: RedirectPolicy::default(),
            delete_options: PrefixDeleteOptions::default(),
        }
    }

    pub fn with_policy(mut self, policy: RedirectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_delete_options(mut self, options: PrefixDeleteOptions) -> Self {
        self.delete_options = options;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn policy(&self) -> &RedirectPolicy {
        &self.policy
    }

    async fn location_for_get(&self, path: &str) -> Result<RedirectLocation> {
        if self.policy.verify_existence && !self.backend.exists(path).await? {
            return Err(BlobstoreError::not_found(path));
        }
        self.signer
            .sign_url(SignMethod::Get, path, self.policy.expires_in)
            .await
    }
}

#[async_trait]
impl<B: Backend> Blobstore for RedirectBlobstore<B> {
    async fn exists(&self, path: &str) -> Result<bool> {
        validate_key(path)?;
        self.backend.exists(path).await
    }

    #[instrument(skip(self))]
    async fn head_or_redirect_as_get(&self, path: &str) -> Result<RedirectLocation> {
        validate_key(path)?;
        self.location_for_get(path).await
    }

    #[instrument(skip(self))]
    async fn get_or_redirect(&self, path: &str) -> Result<Fetched> {
        validate_key(path)?;
        if self.policy.inline_reads {
            return self.backend.get(path).await.map(Fetched::Body);
        }
        self.location_for_get(path).await.map(Fetched::Redirect)
    }

    #[instrument(skip(self, content), fields(size = content.len()))]
    async fn put(&self, path: &str, content: Bytes) -> Result<()> {
        validate_key(path)?;
        self.backend.put(path, content).await
    }

    #[instrument(skip(self))]
    async fn put_redirect(&self, path: &str) -> Result<RedirectLocation> {
        validate_key(path)?;
        self.signer
            .sign_url(SignMethod::Put, path, self.policy.expires_in)
            .await
    }

    #[instrument(skip(self))]
    async fn copy(&self, src: &str, dest: &str) -> Result<()> {
        validate_key(src)?;
        validate_key(dest)?;
        self.backend.copy(src, dest).await
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
