//! # Bits Blobstore
//!
//! Blob storage access layer for the bits service.
//!
//! This crate provides:
//! - **Capabilities**: a redirect-capable [`Blobstore`] and a streaming-only
//!   [`NoRedirectBlobstore`] contract over opaque byte blobs
//! - **Error taxonomy**: `NotFound` and `NoSpaceLeft` reported identically by
//!   every backend
//! - **Prefix deletion**: paged, segment-bounded removal of a key hierarchy
//! - **Backends**: in-memory, local filesystem and S3 (`object_store`)
//! - **Signing**: native presigned URLs or secure links served by the service
//! - **Compliance**: a reusable harness every backend must pass
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │     HTTP endpoints / manifest endpoint      │
//! ├──────────────────────┬──────────────────────┤
//! │  RedirectBlobstore   │  StreamingBlobstore  │
//! │  (Blobstore)         │  (NoRedirectBlob...) │
//! ├──────────────────────┴──────────────────────┤
//! │      Backend trait  +  prefix deletion      │
//! ├──────────────┬──────────────┬───────────────┤
//! │ MemoryBackend│ LocalBackend │   S3Backend   │
//! └──────────────┴──────────────┴───────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use bits_blobstore::{Blobstore, Fetched, MemoryBackend, RedirectBlobstore, SecureLinkSigner};
//!
//! let signer = SecureLinkSigner::new("http://localhost:8080", "packages", "secret")?;
//! let store = RedirectBlobstore::new(MemoryBackend::new(), Arc::new(signer));
//! store.put("guid", Bytes::from_static(b"zip")).await?;
//! match store.get_or_redirect("guid").await? {
//!     Fetched::Body(bytes) => { /* stream it */ }
//!     Fetched::Redirect(location) => { /* 302 to location */ }
//! }
//! ```

pub mod compliance;
pub mod config;
pub mod error;
pub mod flexible;
pub mod key;
pub mod local;
pub mod location;
pub mod manifest;
pub mod memory;
pub mod prefix;
pub mod redirect;
pub mod s3;
pub mod signer;
pub mod streaming;

pub use config::{BlobstoreConfig, ProviderConfig, RedirectPolicyConfig};
pub use error::{BlobstoreError, ErrorKind, Result};
pub use flexible::FlexibleBackend;
pub use key::{matches_prefix, normalize_prefix, validate_key};
pub use local::LocalBackend;
pub use location::{Fetched, RedirectLocation};
pub use manifest::{is_valid_repository_name, BlobManifestStore, ManifestStore, MANIFEST_CONTENT_TYPE};
pub use memory::MemoryBackend;
pub use prefix::{delete_prefix, DeleteDirReport, PrefixDeleteOptions};
pub use redirect::{RedirectBlobstore, RedirectPolicy};
pub use s3::{S3Backend, S3Config};
pub use signer::{SecureLinkSigner, SignMethod, UrlSigner};
pub use streaming::StreamingBlobstore;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt, TryStreamExt};

/// Default number of keys requested per listing page
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Default number of concurrent deletes during prefix deletion
pub const DEFAULT_DELETE_CONCURRENCY: usize = 16;

/// One page of a key listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    /// Keys in ascending order
    pub keys: Vec<String>,
    /// Token to pass as `start_after` for the next page, `None` when done
    pub next: Option<String>,
}

/// Primitive key/value operations a storage technology implements once.
///
/// Backends report missing keys as [`BlobstoreError::NotFound`] and exhausted
/// capacity as [`BlobstoreError::NoSpaceLeft`]. Both capability adapters are
/// built on top of this trait.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Check if a blob exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Read a whole blob
    async fn get(&self, key: &str) -> Result<Bytes>;

    /// Create or replace a blob
    async fn put(&self, key: &str, content: Bytes) -> Result<()>;

    /// Duplicate `src` to `dest`, leaving `src` untouched
    async fn copy(&self, src: &str, dest: &str) -> Result<()>;

    /// Delete one blob
    async fn delete(&self, key: &str) -> Result<()>;

    /// List keys starting with `prefix` (raw string match) after `start_after`.
    ///
    /// Backends may return a superset of the segment-bounded match; callers
    /// filter with [`matches_prefix`].
    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage>;

    /// Delete many keys, returning how many were removed.
    ///
    /// Keys that are already gone are skipped. The default issues individual
    /// deletes with at most `concurrency` in flight.
    async fn delete_many(&self, keys: Vec<String>, concurrency: usize) -> Result<usize> {
        stream::iter(keys)
            .map(|key| async move {
                match self.delete(&key).await {
                    Ok(()) => Ok(1),
                    Err(e) if e.is_not_found() => Ok(0),
                    Err(e) => Err(e),
                }
            })
            .buffer_unordered(concurrency.max(1))
            .try_fold(0usize, |total, n| async move { Ok(total + n) })
            .await
    }
}

/// Redirect-capable blob access.
///
/// Reads may hand the transfer to the client through a time-limited
/// [`RedirectLocation`]; on success exactly one of body and location is
/// produced, which [`Fetched`] enforces.
#[async_trait]
pub trait Blobstore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    /// A location a client can `GET` to read the blob
    async fn head_or_redirect_as_get(&self, path: &str) -> Result<RedirectLocation>;

    /// The blob inline, or a location to read it from
    async fn get_or_redirect(&self, path: &str) -> Result<Fetched>;

    async fn put(&self, path: &str, content: Bytes) -> Result<()>;

    /// A location a client can `PUT` content to
    async fn put_redirect(&self, path: &str) -> Result<RedirectLocation>;

    async fn copy(&self, src: &str, dest: &str) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    /// Delete every blob under `prefix`. Zero matches succeed.
    async fn delete_dir(&self, prefix: &str) -> Result<()>;
}

/// Blob access that always streams bytes through the service
#[async_trait]
pub trait NoRedirectBlobstore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    async fn get(&self, path: &str) -> Result<Bytes>;

    async fn put(&self, path: &str, content: Bytes) -> Result<()>;

    async fn delete(&self, path: &str) -> Result<()>;

    async fn delete_dir(&self, prefix: &str) -> Result<()>;
}

#[async_trait]
impl<T: Backend + ?Sized> Backend for std::sync::Arc<T> {
    async fn exists(&self, key: &str) -> Result<bool> {
        (**self).exists(key).await
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        (**self).get(key).await
    }

    async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        (**self).put(key, content).await
    }

    async fn copy(&self, src: &str, dest: &str) -> Result<()> {
        (**self).copy(src, dest).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        (**self).delete(key).await
    }

    async fn list_page(
        &self,
        prefix: &str,
        start_after: Option<&str>,
        limit: usize,
    ) -> Result<ListPage> {
        (**self).list_page(prefix, start_after, limit).await
    }

    async fn delete_many(&self, keys: Vec<String>, concurrency: usize) -> Result<usize> {
        (**self).delete_many(keys, concurrency).await
    }
}
