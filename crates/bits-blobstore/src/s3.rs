//! S3 backend over `object_store`
//!
//! Presigned locations come from the store's native signer, so redirects go
//! straight to the bucket.

use crate::key::validate_key;
use crate::{Backend, BlobstoreError, ListPage, RedirectLocation, Result, SignMethod, UrlSigner};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::{ObjectStore, PutPayload};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

/// Connection settings for an S3 (or S3-compatible) bucket.
///
/// Unset credentials fall back to the usual `AWS_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible stores (MinIO, localstack)
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub access_key_id: Option<String>,
    #[serde(default)]
    pub secret_access_key: Option<String>,
    #[serde(default)]
    pub allow_http: bool,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

/// Backend storing blobs as objects in one bucket
#[derive(Debug, Clone)]
pub struct S3Backend {
    bucket: String,
    client: Arc<AmazonS3>,
}

impl S3Backend {
    pub fn new(config: &S3Config) -> Result<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.with_endpoint(endpoint);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }
        if config.allow_http {
            builder = builder.with_allow_http(true);
        }
        if let Some(access_key_id) = &config.access_key_id {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret_access_key) = &config.secret_access_key {
            builder = builder.with_secret_access_key(secret_access_key);
        }

        let client = builder
            .build()
            .map_err(|e| BlobstoreError::Configuration(format!("s3 bucket {}: {}", config.bucket, e)))?;

        Ok(Self {
            bucket: config.bucket.clone(),
            client: Arc::new(client),
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn path(key: &str) -> Result<Path> {
        validate_key(key)?;
        Ok(Path::from(key))
    }

    /// Invert [`Self::path`]: listed locations carry percent-encoded parts
    fn key_from_location(location: &Path) -> Result<String> {
        let parts = location
            .parts()
            .map(|part| {
                urlencoding::decode(part.as_ref())
                    .map(|decoded| decoded.into_owned())
                    .map_err(|e| {
                        BlobstoreError::Backend(format!("undecodable object name {}: {}", location, e))
                    })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join("/"))
    }
}

#[async_trait]
impl Backend for S3Backend {
    async fn exists(&self, key: &str) -> Result<bool> {
        match self.client.head(&Self::path(key)?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(BlobstoreError::from_object_store(e, key)),
        }
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn get(&self, key: &str) -> Result<Bytes> {
        let result = self
            .client
            .get(&Self::path(key)?)
            .await
            .map_err(|e| BlobstoreError::from_object_store(e, key))?;
        result
            .bytes()
            .await
            .map_err(|e| BlobstoreError::from_object_store(e, key))
    }

    #[instrument(skip(self, content), fields(bucket = %self.bucket, size = content.len()))]
    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        self.client
            .put(&Self::path(key)?, PutPayload::from(content))
            .await
            .map_err(|e| BlobstoreError::from_object_store(e, key))?;
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn copy(&self, src: &str, dest: &str) -> Result<()> {
        self.client
            .copy(&Self::path(src)?, &Self::path(dest)?)
            .await
            .map_err(|e| BlobstoreError::from_object_store(e, src))
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str) -> Result<()> {
        // S3 deletes of absent objects succeed silently
        if !self.exists(key).await? {
            return Err(BlobstoreError::not_found(key));
        }
        self.client
            .delete(&Self::path(key)?)
            .await
            .map_err(|e| BlobstoreError::from_object_store(e, key))
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage> {
        let trimmed = prefix.trim_end_matches('/');
        let prefix_path = if trimmed.is_empty() {
            None
        } else {
            Some(Self::path(trimmed)?)
        };

        // Listing by path only yields children, so an object stored exactly
        // at the prefix goes first on the first page.
        let mut keys = Vec::with_capacity(limit);
        if start_after.is_none() && !trimmed.is_empty() && self.exists(trimmed).await? {
            keys.push(trimmed.to_string());
        }

        let listing = match start_after {
            Some(token) => self
                .client
                .list_with_offset(prefix_path.as_ref(), &Path::from(token)),
            None => self.client.list(prefix_path.as_ref()),
        };
        let remaining = limit.saturating_sub(keys.len());
        let listed: Vec<Path> = listing
            .take(remaining)
            .map_ok(|meta| meta.location)
            .try_collect()
            .await
            .map_err(|e| BlobstoreError::from_object_store(e, prefix))?;
        for location in &listed {
            keys.push(Self::key_from_location(location)?);
        }

        let next = if keys.len() >= limit {
            keys.last().cloned()
        } else {
            None
        };
        Ok(ListPage { keys, next })
    }

    /// Uses the bucket's bulk delete API
    async fn delete_many(&self, keys: Vec<String>, _concurrency: usize) -> Result<usize> {
        let paths = keys
            .iter()
            .map(|key| Self::path(key))
            .collect::<Result<Vec<_>>>()?;
        let locations = stream::iter(paths.into_iter().map(Ok::<_, object_store::Error>)).boxed();

        let mut deleted = 0;
        let mut results = self.client.delete_stream(locations);
        while let Some(result) = results.next().await {
            match result {
                Ok(_) => deleted += 1,
                Err(object_store::Error::NotFound { .. }) => {}
                Err(e) => return Err(BlobstoreError::ObjectStore(e)),
            }
        }
        debug!(bucket = %self.bucket, deleted, "Bulk delete finished");
        Ok(deleted)
    }
}

#[async_trait]
impl UrlSigner for S3Backend {
    async fn sign_url(
        &self,
        method: SignMethod,
        key: &str,
        expires_in: Duration,
    ) -> Result<RedirectLocation> {
        let method = match method {
            SignMethod::Get => Method::GET,
            SignMethod::Put => Method::PUT,
        };
        let url = self
            .client
            .signed_url(method, &Self::path(key)?, expires_in)
            .await
            .map_err(|e| BlobstoreError::Signing(e.to_string()))?;
        RedirectLocation::from_url(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> S3Config {
        S3Config {
            bucket: "bits-test".to_string(),
            region: "us-east-1".to_string(),
            endpoint: Some("http://localhost:4566".to_string()),
            access_key_id: Some("test".to_string()),
            secret_access_key: Some("test".to_string()),
            allow_http: true,
        }
    }

    #[test]
    fn test_config_defaults() {
        let config: S3Config = serde_json::from_str(r#"{"bucket": "droplets"}"#).unwrap();
        assert_eq!(config.region, "us-east-1");
        assert!(config.endpoint.is_none());
        assert!(!config.allow_http);
    }

    #[test]
    fn test_build_backend() {
        let backend = S3Backend::new(&config()).unwrap();
        assert_eq!(backend.bucket(), "bits-test");
    }

    #[tokio::test]
    async fn test_presigned_get_is_absolute() {
        let backend = S3Backend::new(&config()).unwrap();
        let location = backend
            .sign_url(SignMethod::Get, "packages/guid", Duration::from_secs(60))
            .await
            .unwrap();

        assert!(location.as_str().starts_with("http://localhost:4566/bits-test/packages/guid"));
        assert!(location.as_str().contains("X-Amz-Signature"));
    }

    #[test]
    fn test_listed_locations_map_back_to_keys() {
        for key in ["dir/a#b", "dir/100%/x", "caf\u{e9}/[tag]", "plain/key"] {
            let stored = S3Backend::path(key).unwrap();
            let listed = Path::parse(stored.as_ref()).unwrap();
            let decoded = S3Backend::key_from_location(&listed).unwrap();
            assert_eq!(decoded, key);
            assert_eq!(S3Backend::path(&decoded).unwrap(), stored);
        }
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_request() {
        let backend = S3Backend::new(&config()).unwrap();
        let err = backend.get("/absolute").await.unwrap_err();
        assert!(matches!(err, BlobstoreError::InvalidKey { .. }));
    }
}
