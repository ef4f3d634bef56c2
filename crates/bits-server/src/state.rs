//! Application state

use crate::config::{AccessMode, ResourceConfig, ServerConfig};
use bits_blobstore::{
    Backend, BlobManifestStore, Blobstore, FlexibleBackend, Fetched, NoRedirectBlobstore,
    RedirectBlobstore, RedirectLocation, Result, SecureLinkSigner, SignMethod,
    StreamingBlobstore, UrlSigner,
};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// A resource's blobstore in its configured access mode
pub enum ResourceStore {
    Redirect(RedirectBlobstore<FlexibleBackend>),
    Stream(StreamingBlobstore<FlexibleBackend>),
}

/// One blob resource served under its own route prefix
pub struct Resource {
    name: &'static str,
    store: ResourceStore,
    /// Raw access for resolving secure links
    backend: FlexibleBackend,
    /// Signer for redirect-mode resources
    signer: Option<Arc<dyn UrlSigner>>,
    /// Set when locations point back at this server
    secure_link: Option<SecureLinkSigner>,
    expires_in: Duration,
}

impl Resource {
    pub async fn from_config(
        name: &'static str,
        config: &ResourceConfig,
        public_endpoint: &str,
        signing_secret: &str,
    ) -> anyhow::Result<Self> {
        let backend = FlexibleBackend::from_config(&config.blobstore).await?;
        let policy = config.redirect.to_policy()?;

        let (store, signer, secure_link) = match config.mode {
            AccessMode::Redirect => {
                let (signer, secure_link) = match backend.native_signer() {
                    Some(signer) => (signer, None),
                    None => {
                        let secure_link =
                            SecureLinkSigner::new(public_endpoint, name, signing_secret)?;
                        let signer: Arc<dyn UrlSigner> = Arc::new(secure_link.clone());
                        (signer, Some(secure_link))
                    }
                };
                let store = RedirectBlobstore::new(backend.clone(), Arc::clone(&signer))
                    .with_policy(policy)
                    .with_delete_options(config.blobstore.delete_options());
                (ResourceStore::Redirect(store), Some(signer), secure_link)
            }
            AccessMode::Stream => (
                ResourceStore::Stream(backend.clone().into_streaming(&config.blobstore)),
                None,
                None,
            ),
        };

        info!(
            resource = name,
            provider = backend.provider_name(),
            mode = ?config.mode,
            "Resource configured"
        );

        Ok(Self {
            name,
            store,
            backend,
            signer,
            secure_link,
            expires_in: policy.expires_in,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn store(&self) -> &ResourceStore {
        &self.store
    }

    pub fn backend(&self) -> &FlexibleBackend {
        &self.backend
    }

    pub fn secure_link(&self) -> Option<&SecureLinkSigner> {
        self.secure_link.as_ref()
    }

    /// The blob inline, or where to fetch it
    pub async fn get(&self, key: &str) -> Result<Fetched> {
        match &self.store {
            ResourceStore::Redirect(store) => store.get_or_redirect(key).await,
            ResourceStore::Stream(store) => store.get(key).await.map(Fetched::Body),
        }
    }

    pub async fn put(&self, key: &str, content: Bytes) -> Result<()> {
        match &self.store {
            ResourceStore::Redirect(store) => store.put(key, content).await,
            ResourceStore::Stream(store) => store.put(key, content).await,
        }
    }

    /// Copy within the resource.
    ///
    /// Streaming stores have no copy, so the blob is read and written back.
    #[instrument(skip(self), fields(resource = self.name))]
    pub async fn copy(&self, src: &str, dest: &str) -> Result<()> {
        match &self.store {
            ResourceStore::Redirect(store) => store.copy(src, dest).await,
            ResourceStore::Stream(store) => {
                let content = store.get(src).await?;
                store.put(dest, content).await
            }
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        match &self.store {
            ResourceStore::Redirect(store) => store.delete(key).await,
            ResourceStore::Stream(store) => store.delete(key).await,
        }
    }

    pub async fn delete_dir(&self, prefix: &str) -> Result<()> {
        match &self.store {
            ResourceStore::Redirect(store) => store.delete_dir(prefix).await,
            ResourceStore::Stream(store) => store.delete_dir(prefix).await,
        }
    }

    /// Sign `key` without checking it exists. `None` for streaming resources.
    pub async fn sign(&self, method: SignMethod, key: &str) -> Option<Result<RedirectLocation>> {
        let signer = self.signer.as_ref()?;
        if let Err(e) = bits_blobstore::validate_key(key) {
            return Some(Err(e));
        }
        Some(signer.sign_url(method, key, self.expires_in).await)
    }

    /// Read straight from the backend, for verified secure links
    pub async fn read_raw(&self, key: &str) -> Result<Bytes> {
        bits_blobstore::validate_key(key)?;
        self.backend.get(key).await
    }

    /// Write straight to the backend, for verified secure links
    pub async fn write_raw(&self, key: &str, content: Bytes) -> Result<()> {
        bits_blobstore::validate_key(key)?;
        self.backend.put(key, content).await
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub config: ServerConfig,
    pub packages: Resource,
    pub droplets: Resource,
    pub buildpacks: Resource,
    pub buildpack_cache: Resource,
    pub manifests: BlobManifestStore<StreamingBlobstore<FlexibleBackend>>,
}

impl AppState {
    /// Create new application state
    pub async fn new(config: ServerConfig) -> anyhow::Result<Self> {
        let endpoint = config.public_endpoint();
        let secret = config.signing_secret.as_str();

        let packages = Resource::from_config("packages", &config.packages, &endpoint, secret).await?;
        let droplets = Resource::from_config("droplets", &config.droplets, &endpoint, secret).await?;
        let buildpacks =
            Resource::from_config("buildpacks", &config.buildpacks, &endpoint, secret).await?;
        let buildpack_cache =
            Resource::from_config("buildpack_cache", &config.buildpack_cache, &endpoint, secret)
                .await?;

        let manifests = BlobManifestStore::new(
            FlexibleBackend::from_config(&config.manifests)
                .await?
                .into_streaming(&config.manifests),
        );

        Ok(Self {
            config,
            packages,
            droplets,
            buildpacks,
            buildpack_cache,
            manifests,
        })
    }

    /// Look up a resource by its route name
    pub fn resource(&self, name: &str) -> Option<&Resource> {
        match name {
            "packages" => Some(&self.packages),
            "droplets" => Some(&self.droplets),
            "buildpacks" => Some(&self.buildpacks),
            "buildpack_cache" => Some(&self.buildpack_cache),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            signing_secret: "secret".to_string(),
            public_endpoint: Some("http://bits.test".to_string()),
            buildpacks: ResourceConfig {
                mode: AccessMode::Stream,
                ..ResourceConfig::default()
            },
            ..ServerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_state_builds_every_resource() {
        let state = AppState::new(config()).await.unwrap();
        for name in ["packages", "droplets", "buildpacks", "buildpack_cache"] {
            assert_eq!(state.resource(name).unwrap().name(), name);
        }
        assert!(state.resource("manifests").is_none());
    }

    #[tokio::test]
    async fn test_redirect_resource_requires_secret() {
        let config = ServerConfig {
            signing_secret: String::new(),
            ..config()
        };
        assert!(AppState::new(config).await.is_err());
    }

    #[tokio::test]
    async fn test_stream_copy_duplicates_through_service() {
        let state = AppState::new(config()).await.unwrap();
        let buildpacks = &state.buildpacks;
        assert!(matches!(buildpacks.store(), ResourceStore::Stream(_)));

        buildpacks.put("src", Bytes::from_static(b"zip")).await.unwrap();
        buildpacks.copy("src", "dest").await.unwrap();
        assert_eq!(buildpacks.read_raw("dest").await.unwrap(), Bytes::from_static(b"zip"));
        assert!(buildpacks.copy("missing", "dest2").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_sign_only_for_redirect_resources() {
        let state = AppState::new(config()).await.unwrap();
        assert!(state.buildpacks.sign(SignMethod::Get, "guid").await.is_none());

        let location = state.packages.sign(SignMethod::Get, "guid").await.unwrap().unwrap();
        assert!(location.as_str().starts_with("http://bits.test/signed/packages/guid?"));
    }
}
