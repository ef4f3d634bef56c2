//! Serializable blobstore configuration

use crate::prefix::PrefixDeleteOptions;
use crate::redirect::{RedirectPolicy, DEFAULT_EXPIRES_IN};
use crate::s3::S3Config;
use crate::{Result, DEFAULT_DELETE_CONCURRENCY, DEFAULT_PAGE_SIZE};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Which storage technology backs a blobstore
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum ProviderConfig {
    Memory {
        #[serde(default)]
        capacity_bytes: Option<u64>,
    },
    Local {
        root: PathBuf,
    },
    S3(S3Config),
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::Memory {
            capacity_bytes: None,
        }
    }
}

/// Backend plus the knobs shared by every backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobstoreConfig {
    #[serde(flatten)]
    pub provider: ProviderConfig,
    #[serde(default = "default_page_size")]
    pub list_page_size: usize,
    #[serde(default = "default_delete_concurrency")]
    pub delete_concurrency: usize,
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_delete_concurrency() -> usize {
    DEFAULT_DELETE_CONCURRENCY
}

impl Default for BlobstoreConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            list_page_size: DEFAULT_PAGE_SIZE,
            delete_concurrency: DEFAULT_DELETE_CONCURRENCY,
        }
    }
}

impl BlobstoreConfig {
    pub fn memory() -> Self {
        Self::default()
    }

    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            provider: ProviderConfig::Local { root: root.into() },
            ..Self::default()
        }
    }

    pub fn s3(config: S3Config) -> Self {
        Self {
            provider: ProviderConfig::S3(config),
            ..Self::default()
        }
    }

    pub fn delete_options(&self) -> PrefixDeleteOptions {
        PrefixDeleteOptions {
            page_size: self.list_page_size.max(1),
            concurrency: self.delete_concurrency.max(1),
        }
    }
}

/// Serializable form of [`RedirectPolicy`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectPolicyConfig {
    #[serde(default = "default_true")]
    pub verify_existence: bool,
    #[serde(default)]
    pub inline_reads: bool,
    #[serde(default = "default_expires_in_secs")]
    pub expires_in_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_expires_in_secs() -> u64 {
    DEFAULT_EXPIRES_IN.as_secs()
}

impl Default for RedirectPolicyConfig {
    fn default() -> Self {
        Self {
            verify_existence: true,
            inline_reads: false,
            expires_in_secs: default_expires_in_secs(),
        }
    }
}

impl RedirectPolicyConfig {
    /// Validate and convert, rejecting expiries outside `(0, 7 days]`
    pub fn to_policy(&self) -> Result<RedirectPolicy> {
        RedirectPolicy {
            verify_existence: self.verify_existence,
            inline_reads: self.inline_reads,
            ..RedirectPolicy::default()
        }
        .with_expires_in(Duration::from_secs(self.expires_in_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_tag() {
        let config: BlobstoreConfig =
            serde_json::from_str(r#"{"provider": "local", "root": "/var/bits"}"#).unwrap();
        assert!(matches!(config.provider, ProviderConfig::Local { ref root } if root == &PathBuf::from("/var/bits")));
        assert_eq!(config.list_page_size, DEFAULT_PAGE_SIZE);

        let config: BlobstoreConfig = serde_json::from_str(
            r#"{"provider": "s3", "bucket": "droplets", "delete_concurrency": 4}"#,
        )
        .unwrap();
        assert!(matches!(config.provider, ProviderConfig::S3(ref s3) if s3.bucket == "droplets"));
        assert_eq!(config.delete_options().concurrency, 4);

        let config: BlobstoreConfig =
            serde_json::from_str(r#"{"provider": "memory", "capacity_bytes": 1024}"#).unwrap();
        assert!(matches!(
            config.provider,
            ProviderConfig::Memory {
                capacity_bytes: Some(1024)
            }
        ));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let result: std::result::Result<BlobstoreConfig, _> =
            serde_json::from_str(r#"{"provider": "webdav"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_redirect_policy_defaults() {
        let policy = RedirectPolicyConfig::default().to_policy().unwrap();
        assert_eq!(policy, RedirectPolicy::default());

        let config = RedirectPolicyConfig {
            expires_in_secs: 0,
            ..RedirectPolicyConfig::default()
        };
        assert!(config.to_policy().is_err());
    }
}
