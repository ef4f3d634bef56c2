//! Behavioral checks every backend must pass
//!
//! The same suite runs against the in-process backends in unit tests and
//! against live buckets in ignored integration tests. All keys live under a
//! random namespace so runs against shared stores do not collide.
//!
//! ```rust,ignore
//! let suite = ComplianceSuite::new().with_http(reqwest::Client::new());
//! suite.run_redirect(&store).await?;
//! ```

use crate::{Blobstore, BlobstoreError, Fetched, NoRedirectBlobstore, RedirectLocation};
use anyhow::{bail, ensure, Context};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tracing::{debug, info};
use uuid::Uuid;

/// What a read through a capability revealed
#[derive(Debug)]
enum Observed {
    Present(Bytes),
    Missing,
    /// A location was issued but there is no client to follow it
    Unobservable,
}

/// Uniform view of both capabilities for the shared checks
#[async_trait]
trait Probe: Send + Sync {
    async fn exists(&self, key: &str) -> crate::Result<bool>;
    async fn read(&self, key: &str) -> anyhow::Result<Observed>;
    async fn put(&self, key: &str, content: Bytes) -> crate::Result<()>;
    async fn delete(&self, key: &str) -> crate::Result<()>;
    async fn delete_dir(&self, prefix: &str) -> crate::Result<()>;
}

struct RedirectProbe<'a, S: ?Sized> {
    store: &'a S,
    http: Option<&'a reqwest::Client>,
}

#[async_trait]
impl<'a, S: Blobstore + ?Sized> Probe for RedirectProbe<'a, S> {
    async fn exists(&self, key: &str) -> crate::Result<bool> {
        self.store.exists(key).await
    }

    async fn read(&self, key: &str) -> anyhow::Result<Observed> {
        match self.store.get_or_redirect(key).await {
            Ok(Fetched::Body(body)) => Ok(Observed::Present(body)),
            Ok(Fetched::Redirect(location)) => match self.http {
                Some(http) => follow(http, &location).await,
                None => Ok(Observed::Unobservable),
            },
            Err(e) if e.is_not_found() => Ok(Observed::Missing),
            Err(e) => Err(e).context("get_or_redirect"),
        }
    }

    async fn put(&self, key: &str, content: Bytes) -> crate::Result<()> {
        self.store.put(key, content).await
    }

    async fn delete(&self, key: &str) -> crate::Result<()> {
        self.store.delete(key).await
    }

    async fn delete_dir(&self, prefix: &str) -> crate::Result<()> {
        self.store.delete_dir(prefix).await
    }
}

struct StreamingProbe<'a, S: ?Sized> {
    store: &'a S,
}

#[async_trait]
impl<'a, S: NoRedirectBlobstore + ?Sized> Probe for StreamingProbe<'a, S> {
    async fn exists(&self, key: &str) -> crate::Result<bool> {
        self.store.exists(key).await
    }

    async fn read(&self, key: &str) -> anyhow::Result<Observed> {
        match self.store.get(key).await {
            Ok(body) => Ok(Observed::Present(body)),
            Err(e) if e.is_not_found() => Ok(Observed::Missing),
            Err(e) => Err(e).context("get"),
        }
    }

    async fn put(&self, key: &str, content: Bytes) -> crate::Result<()> {
        self.store.put(key, content).await
    }

    async fn delete(&self, key: &str) -> crate::Result<()> {
        self.store.delete(key).await
    }

    async fn delete_dir(&self, prefix: &str) -> crate::Result<()> {
        self.store.delete_dir(prefix).await
    }
}

/// GET a location, mapping 404 to `Missing`
async fn follow(http: &reqwest::Client, location: &RedirectLocation) -> anyhow::Result<Observed> {
    let response = http
        .get(location.as_str())
        .send()
        .await
        .with_context(|| format!("GET {}", location))?;
    match response.status() {
        StatusCode::NOT_FOUND => Ok(Observed::Missing),
        status if status.is_success() => Ok(Observed::Present(response.bytes().await?)),
        status => bail!("GET {} returned {}", location, status),
    }
}

/// The reusable backend compliance harness
#[derive(Debug, Clone)]
pub struct ComplianceSuite {
    namespace: String,
    http: Option<reqwest::Client>,
    empty_prefix: bool,
}

impl Default for ComplianceSuite {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplianceSuite {
    pub fn new() -> Self {
        Self {
            namespace: format!("compliance-{}", Uuid::new_v4()),
            http: None,
            empty_prefix: false,
        }
    }

    /// Follow redirect locations with `http`, enabling redirect fidelity checks
    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Also check that deleting the empty prefix clears the whole store.
    ///
    /// Only enable this against a store dedicated to the test run.
    pub fn with_empty_prefix(mut self, enabled: bool) -> Self {
        self.empty_prefix = enabled;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn key(&self, name: &str) -> String {
        format!("{}/{}", self.namespace, name)
    }

    /// Run every check against a redirect-capable store
    pub async fn run_redirect<S: Blobstore + ?Sized>(&self, store: &S) -> anyhow::Result<()> {
        let probe = RedirectProbe {
            store,
            http: self.http.as_ref(),
        };
        self.run_shared(&probe).await?;
        self.check_copy(store).await.context("copy")?;
        if let Some(http) = &self.http {
            self.check_redirect_fidelity(store, http)
                .await
                .context("redirect fidelity")?;
            self.check_upload_location(store, http)
                .await
                .context("upload location")?;
        }
        info!(namespace = %self.namespace, "Redirect compliance passed");
        Ok(())
    }

    /// Run every check against a streaming-only store
    pub async fn run_no_redirect<S: NoRedirectBlobstore + ?Sized>(&self, store: &S) -> anyhow::Result<()> {
        self.run_shared(&StreamingProbe { store }).await?;
        info!(namespace = %self.namespace, "Streaming compliance passed");
        Ok(())
    }

    async fn run_shared(&self, probe: &dyn Probe) -> anyhow::Result<()> {
        self.check_absence(probe).await.context("absence before creation")?;
        self.check_round_trip(probe).await.context("write-read round trip")?;
        self.check_deletion(probe).await.context("deletion effect")?;
        self.check_prefix_scope(probe).await.context("prefix deletion scope")?;
        if self.empty_prefix {
            self.check_empty_prefix(probe).await.context("empty prefix deletion")?;
        }
        Ok(())
    }

    async fn check_absence(&self, probe: &dyn Probe) -> anyhow::Result<()> {
        let key = self.key("never-written");
        ensure!(!probe.exists(&key).await?, "{} exists before creation", key);
        match probe.read(&key).await? {
            Observed::Present(_) => bail!("{} readable before creation", key),
            Observed::Missing | Observed::Unobservable => {}
        }
        match probe.delete(&key).await {
            Err(BlobstoreError::NotFound { .. }) => Ok(()),
            other => bail!("deleting missing {} returned {:?}", key, other),
        }
    }

    async fn check_round_trip(&self, probe: &dyn Probe) -> anyhow::Result<()> {
        let key = self.key("round-trip");
        let first = Bytes::from_static(b"the quick brown fox\x00\xff");
        let second = Bytes::from_static(b"jumps over the lazy dog");

        probe.put(&key, first.clone()).await?;
        ensure!(probe.exists(&key).await?, "{} missing after put", key);
        expect_content(probe, &key, &first).await?;

        probe.put(&key, second.clone()).await?;
        expect_content(probe, &key, &second).await?;

        probe.delete(&key).await?;
        Ok(())
    }

    async fn check_deletion(&self, probe: &dyn Probe) -> anyhow::Result<()> {
        let key = self.key("deleted");
        probe.put(&key, Bytes::from_static(b"short lived")).await?;
        probe.delete(&key).await?;

        ensure!(!probe.exists(&key).await?, "{} exists after delete", key);
        if let Observed::Present(_) = probe.read(&key).await? {
            bail!("{} readable after delete", key);
        }
        Ok(())
    }

    async fn check_prefix_scope(&self, probe: &dyn Probe) -> anyhow::Result<()> {
        let inside = [self.key("dir/one"), self.key("dir/sub/two")];
        let outside = [self.key("dirty/x"), self.key("other/three")];
        for key in inside.iter().chain(outside.iter()) {
            probe.put(key, Bytes::from(key.clone())).await?;
        }

        probe.delete_dir(&self.key("dir")).await?;
        for key in &inside {
            ensure!(!probe.exists(key).await?, "{} survived delete_dir", key);
        }
        for key in &outside {
            ensure!(probe.exists(key).await?, "{} removed by delete_dir", key);
        }

        probe
            .delete_dir(&self.key("nothing/here"))
            .await
            .context("delete_dir with zero matches")?;

        probe.delete_dir(&self.namespace).await?;
        for key in &outside {
            ensure!(!probe.exists(key).await?, "{} survived namespace cleanup", key);
        }
        Ok(())
    }

    async fn check_empty_prefix(&self, probe: &dyn Probe) -> anyhow::Result<()> {
        let keys = [self.key("a"), self.key("b/c")];
        for key in &keys {
            probe.put(key, Bytes::from_static(b"x")).await?;
        }
        probe.delete_dir("").await?;
        for key in &keys {
            ensure!(!probe.exists(key).await?, "{} survived empty prefix delete", key);
        }
        Ok(())
    }

    async fn check_copy<S: Blobstore + ?Sized>(&self, store: &S) -> anyhow::Result<()> {
        let src = self.key("copy/src");
        let dest = self.key("copy/dest");
        let original = Bytes::from_static(b"original");
        store.put(&src, original.clone()).await?;
        store.put(&dest, Bytes::from_static(b"stale destination")).await?;
        store.copy(&src, &dest).await?;

        ensure!(store.exists(&src).await?, "copy removed its source");
        ensure!(store.exists(&dest).await?, "copy destination missing");
        let probe = RedirectProbe {
            store,
            http: self.http.as_ref(),
        };
        expect_content(&probe, &dest, &original)
            .await
            .context("copy destination")?;
        expect_content(&probe, &src, &original)
            .await
            .context("copy source")?;

        match store.copy(&self.key("copy/missing"), &dest).await {
            Err(BlobstoreError::NotFound { .. }) => {}
            other => bail!("copy from missing source returned {:?}", other),
        }

        store.delete_dir(&self.key("copy")).await?;
        Ok(())
    }

    async fn check_redirect_fidelity<S: Blobstore + ?Sized>(
        &self,
        store: &S,
        http: &reqwest::Client,
    ) -> anyhow::Result<()> {
        let key = self.key("redirect");
        let content = Bytes::from_static(b"served from the backing store");
        store.put(&key, content.clone()).await?;

        let location = store.head_or_redirect_as_get(&key).await?;
        match follow(http, &location).await? {
            Observed::Present(body) => ensure!(body == content, "location served different bytes"),
            other => bail!("location for {} resolved to {:?}", key, other),
        }

        if let Fetched::Redirect(get_location) = store.get_or_redirect(&key).await? {
            match follow(http, &get_location).await? {
                Observed::Present(body) => ensure!(body == content, "get location served different bytes"),
                other => bail!("get location for {} resolved to {:?}", key, other),
            }
        }

        store.delete(&key).await?;
        match follow(http, &location).await? {
            Observed::Missing => {}
            other => bail!("location for deleted {} resolved to {:?}", key, other),
        }
        debug!(%location, "Redirect fidelity verified");
        Ok(())
    }

    async fn check_upload_location<S: Blobstore + ?Sized>(
        &self,
        store: &S,
        http: &reqwest::Client,
    ) -> anyhow::Result<()> {
        let key = self.key("uploaded");
        let content = Bytes::from_static(b"uploaded through a location");

        let location = store.put_redirect(&key).await?;
        let response = http
            .put(location.as_str())
            .body(content.clone())
            .send()
            .await
            .with_context(|| format!("PUT {}", location))?;
        ensure!(
            response.status().is_success(),
            "PUT {} returned {}",
            location,
            response.status()
        );

        ensure!(store.exists(&key).await?, "{} missing after upload", key);
        let probe = RedirectProbe {
            store,
            http: Some(http),
        };
        expect_content(&probe, &key, &content).await?;
        store.delete(&key).await?;
        Ok(())
    }
}

async fn expect_content(probe: &dyn Probe, key: &str, expected: &Bytes) -> anyhow::Result<()> {
    match probe.read(key).await? {
        Observed::Present(body) => {
            ensure!(&body == expected, "{} read back {} bytes, expected {}", key, body.len(), expected.len());
            Ok(())
        }
        Observed::Missing => bail!("{} missing after put", key),
        Observed::Unobservable => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        LocalBackend, MemoryBackend, RedirectBlobstore, RedirectPolicy, SecureLinkSigner,
        StreamingBlobstore,
    };
    use std::sync::Arc;
    use tempfile::TempDir;

    fn signer() -> Arc<SecureLinkSigner> {
        Arc::new(SecureLinkSigner::new("http://127.0.0.1:1", "packages", "secret").unwrap())
    }

    #[test_log::test(tokio::test)]
    async fn test_memory_streaming() {
        let store = StreamingBlobstore::new(MemoryBackend::new());
        ComplianceSuite::new()
            .with_empty_prefix(true)
            .run_no_redirect(&store)
            .await
            .unwrap();
        assert!(store.backend().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_memory_redirect_inline() {
        let policy = RedirectPolicy {
            inline_reads: true,
            ..RedirectPolicy::default()
        };
        let store = RedirectBlobstore::new(MemoryBackend::new(), signer()).with_policy(policy);
        ComplianceSuite::new()
            .with_empty_prefix(true)
            .run_redirect(&store)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_memory_redirect_locations() {
        let store = RedirectBlobstore::new(MemoryBackend::new(), signer());
        ComplianceSuite::new().run_redirect(&store).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_pure_redirect() {
        let store = RedirectBlobstore::new(MemoryBackend::new(), signer())
            .with_policy(RedirectPolicy::pure_redirect());
        ComplianceSuite::new().run_redirect(&store).await.unwrap();
    }

    #[test_log::test(tokio::test)]
    async fn test_local_streaming() {
        let dir = TempDir::new().unwrap();
        let store = StreamingBlobstore::new(LocalBackend::new(dir.path()).await.unwrap());
        ComplianceSuite::new()
            .with_empty_prefix(true)
            .run_no_redirect(&store)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_local_redirect_inline() {
        let dir = TempDir::new().unwrap();
        let policy = RedirectPolicy {
            inline_reads: true,
            ..RedirectPolicy::default()
        };
        let store = RedirectBlobstore::new(LocalBackend::new(dir.path()).await.unwrap(), signer())
            .with_policy(policy);
        ComplianceSuite::new()
            .with_empty_prefix(true)
            .run_redirect(&store)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_suite_detects_broken_prefix_deletion() {
        /// Deletes nothing on delete_dir
        struct NoopDeleteDir(StreamingBlobstore<MemoryBackend>);

        #[async_trait]
        impl NoRedirectBlobstore for NoopDeleteDir {
            async fn exists(&self, path: &str) -> crate::Result<bool> {
                self.0.exists(path).await
            }
            async fn get(&self, path: &str) -> crate::Result<Bytes> {
                self.0.get(path).await
            }
            async fn put(&self, path: &str, content: Bytes) -> crate::Result<()> {
                self.0.put(path, content).await
            }
            async fn delete(&self, path: &str) -> crate::Result<()> {
                self.0.delete(path).await
            }
            async fn delete_dir(&self, _prefix: &str) -> crate::Result<()> {
                Ok(())
            }
        }

        let store = NoopDeleteDir(StreamingBlobstore::new(MemoryBackend::new()));
        let err = ComplianceSuite::new().run_no_redirect(&store).await.unwrap_err();
        assert!(format!("{:#}", err).contains("prefix deletion scope"));
    }

    #[tokio::test]
    async fn test_suite_detects_copy_with_wrong_content() {
        /// Copies create an empty destination
        struct EmptyCopy(RedirectBlobstore<MemoryBackend>);

        #[async_trait]
        impl Blobstore for EmptyCopy {
            async fn exists(&self, path: &str) -> crate::Result<bool> {
                self.0.exists(path).await
            }
            async fn head_or_redirect_as_get(&self, path: &str) -> crate::Result<RedirectLocation> {
                self.0.head_or_redirect_as_get(path).await
            }
            async fn get_or_redirect(&self, path: &str) -> crate::Result<Fetched> {
                self.0.get_or_redirect(path).await
            }
            async fn put(&self, path: &str, content: Bytes) -> crate::Result<()> {
                self.0.put(path, content).await
            }
            async fn put_redirect(&self, path: &str) -> crate::Result<RedirectLocation> {
                self.0.put_redirect(path).await
            }
            async fn copy(&self, src: &str, dest: &str) -> crate::Result<()> {
                if !self.0.exists(src).await? {
                    return Err(BlobstoreError::not_found(src));
                }
                self.0.put(dest, Bytes::new()).await
            }
            async fn delete(&self, path: &str) -> crate::Result<()> {
                self.0.delete(path).await
            }
            async fn delete_dir(&self, prefix: &str) -> crate::Result<()> {
                self.0.delete_dir(prefix).await
            }
        }

        let policy = RedirectPolicy {
            inline_reads: true,
            ..RedirectPolicy::default()
        };
        let store = EmptyCopy(RedirectBlobstore::new(MemoryBackend::new(), signer()).with_policy(policy));
        let err = ComplianceSuite::new().run_redirect(&store).await.unwrap_err();
        assert!(format!("{:#}", err).contains("copy destination"));
    }
}
