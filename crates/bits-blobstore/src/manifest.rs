//! OCI image manifest reads

use crate::{BlobstoreError, NoRedirectBlobstore, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tracing::instrument;

/// Content type of a Docker image manifest, schema 2
pub const MANIFEST_CONTENT_TYPE: &str = "application/vnd.docker.distribution.manifest.v2+json";

/// Whether `name` is a repository name the registry serves (`[a-z0-9/._-]+`)
pub fn is_valid_repository_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| matches!(b, b'a'..=b'z' | b'0'..=b'9' | b'/' | b'.' | b'_' | b'-'))
}

/// Source of image manifests for the registry endpoint
#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn get_manifest(&self, name: &str, tag: &str) -> Result<Bytes>;
}

/// Manifests stored as blobs under `{name}/manifests/{tag}`
pub struct BlobManifestStore<S> {
    blobstore: S,
}

impl<S: NoRedirectBlobstore> BlobManifestStore<S> {
    pub fn new(blobstore: S) -> Self {
        Self { blobstore }
    }

    pub fn manifest_key(name: &str, tag: &str) -> String {
        format!("{}/manifests/{}", name, tag)
    }

    pub async fn put_manifest(&self, name: &str, tag: &str, manifest: Bytes) -> Result<()> {
        self.blobstore
            .put(&Self::manifest_key(name, tag), manifest)
            .await
    }

    pub fn blobstore(&self) -> &S {
        &self.blobstore
    }
}

#[async_trait]
impl<S: NoRedirectBlobstore> ManifestStore for BlobManifestStore<S> {
    #[instrument(skip(self))]
    async fn get_manifest(&self, name: &str, tag: &str) -> Result<Bytes> {
        if !is_valid_repository_name(name) {
            return Err(BlobstoreError::InvalidKey {
                key: name.to_string(),
                reason: "invalid repository name",
            });
        }
        self.blobstore.get(&Self::manifest_key(name, tag)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Backend, MemoryBackend, StreamingBlobstore};
    use rstest::rstest;

    #[rstest]
    #[case("ubuntu", true)]
    #[case("library/ubuntu", true)]
    #[case("cf/app-guid.v1_2", true)]
    #[case("Ubuntu", false)]
    #[case("name with space", false)]
    #[case("", false)]
    fn test_repository_names(#[case] name: &str, #[case] valid: bool) {
        assert_eq!(is_valid_repository_name(name), valid);
    }

    #[tokio::test]
    async fn test_get_manifest() {
        let store = BlobManifestStore::new(StreamingBlobstore::new(MemoryBackend::new()));
        let manifest = Bytes::from_static(br#"{"schemaVersion": 2}"#);
        store
            .put_manifest("library/app", "latest", manifest.clone())
            .await
            .unwrap();

        assert_eq!(store.get_manifest("library/app", "latest").await.unwrap(), manifest);
        assert!(store
            .blobstore()
            .backend()
            .exists("library/app/manifests/latest")
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_missing_manifest_is_not_found() {
        let store = BlobManifestStore::new(StreamingBlobstore::new(MemoryBackend::new()));
        let err = store.get_manifest("app", "v1").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
