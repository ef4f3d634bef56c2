//! Server configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! YAML/TOML file, then `BITS__`-prefixed environment variables
//! (`BITS__PACKAGES__BLOBSTORE__PROVIDER=local`).

use bits_blobstore::{BlobstoreConfig, RedirectPolicyConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How a resource hands blobs to clients
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    /// Reads answer with a time-limited location on the backing store
    #[default]
    Redirect,
    /// Every byte passes through the service
    Stream,
}

/// One blob resource (packages, droplets, ...)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(default)]
    pub mode: AccessMode,
    #[serde(default)]
    pub blobstore: BlobstoreConfig,
    #[serde(default)]
    pub redirect: RedirectPolicyConfig,
}

/// Bits server configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Base URL clients reach this server at, used in secure links
    pub public_endpoint: Option<String>,
    /// Secret for secure links on backends without native presigning
    pub signing_secret: String,
    /// Maximum request body size (bytes)
    pub max_body_size: usize,
    pub packages: ResourceConfig,
    pub droplets: ResourceConfig,
    pub buildpacks: ResourceConfig,
    pub buildpack_cache: ResourceConfig,
    /// Always streamed
    pub manifests: BlobstoreConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            public_endpoint: None,
            signing_secret: String::new(),
            max_body_size: 1024 * 1024 * 1024, // 1 GB
            packages: ResourceConfig::default(),
            droplets: ResourceConfig::default(),
            buildpacks: ResourceConfig::default(),
            buildpack_cache: ResourceConfig::default(),
            manifests: BlobstoreConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Load defaults, then `path` if given, then `BITS__*` environment variables
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder =
            config::Config::builder().add_source(config::Config::try_from(&Self::default())?);
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                config::Environment::with_prefix("BITS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Base URL for secure links
    pub fn public_endpoint(&self) -> String {
        match &self.public_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => {
                let host = match self.host.as_str() {
                    "0.0.0.0" | "::" => "localhost",
                    host => host,
                };
                format!("http://{}:{}", host, self.port)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bits_blobstore::ProviderConfig;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr(), "0.0.0.0:8000");
        assert_eq!(config.public_endpoint(), "http://localhost:8000");
        assert_eq!(config.packages.mode, AccessMode::Redirect);
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yml").tempfile().unwrap();
        writeln!(
            file,
            r#"
port: 9090
public_endpoint: "https://bits.example.com/"
signing_secret: "shhh"
packages:
  mode: stream
  blobstore:
    provider: local
    root: /var/bits/packages
droplets:
  redirect:
    verify_existence: false
    expires_in_secs: 600
  blobstore:
    provider: s3
    bucket: droplets
    region: eu-west-1
"#
        )
        .unwrap();

        let config = ServerConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.public_endpoint(), "https://bits.example.com");
        assert_eq!(config.packages.mode, AccessMode::Stream);
        assert!(matches!(config.packages.blobstore.provider, ProviderConfig::Local { .. }));
        assert!(matches!(config.droplets.blobstore.provider, ProviderConfig::S3(ref s3) if s3.region == "eu-west-1"));
        assert!(!config.droplets.redirect.verify_existence);
        assert_eq!(config.droplets.redirect.expires_in_secs, 600);
        assert!(matches!(config.buildpacks.blobstore.provider, ProviderConfig::Memory { .. }));
    }
}
