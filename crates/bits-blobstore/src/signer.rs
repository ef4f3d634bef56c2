//! Time-limited URL signing
//!
//! Backends with native presigning (S3) implement [`UrlSigner`] themselves.
//! Backends without one are paired with a [`SecureLinkSigner`], whose links
//! point back at the service's own `/signed/...` routes and are checked there
//! with [`SecureLinkSigner::verify`].

use crate::{BlobstoreError, RedirectLocation, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use md5::{Digest, Md5};
use std::fmt;
use std::time::Duration;
use url::Url;

/// HTTP method a signed location is valid for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignMethod {
    Get,
    Put,
}

impl SignMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Put => "PUT",
        }
    }
}

impl fmt::Display for SignMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Produces time-limited locations for keys
#[async_trait]
pub trait UrlSigner: Send + Sync {
    async fn sign_url(
        &self,
        method: SignMethod,
        key: &str,
        expires_in: Duration,
    ) -> Result<RedirectLocation>;
}

/// Minimum secret length accepted by [`SecureLinkSigner`]
pub const MIN_SECRET_LEN: usize = 3;

/// Secure-link style signer.
///
/// The signature is the unpadded URL-safe base64 MD5 digest of
/// `"{expires}{METHOD} {path} {secret}"`, where `path` is
/// `/signed/{resource}/{key}`.
#[derive(Clone)]
pub struct SecureLinkSigner {
    public_endpoint: Url,
    resource: String,
    secret: String,
}

impl fmt::Debug for SecureLinkSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecureLinkSigner")
            .field("public_endpoint", &self.public_endpoint.as_str())
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl SecureLinkSigner {
    pub fn new(
        public_endpoint: &str,
        resource: impl Into<String>,
        secret: impl Into<String>,
    ) -> Result<Self> {
        let secret = secret.into();
        if secret.len() < MIN_SECRET_LEN {
            return Err(BlobstoreError::Configuration(format!(
                "signing secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        let public_endpoint = Url::parse(public_endpoint)?;
        if public_endpoint.cannot_be_a_base() {
            return Err(BlobstoreError::Configuration(format!(
                "public endpoint {} is not a base url",
                public_endpoint
            )));
        }
        Ok(Self {
            public_endpoint,
            resource: resource.into(),
            secret,
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Sign `key` for `method`, valid until the unix timestamp `expires`
    pub fn sign_until(&self, method: SignMethod, key: &str, expires: i64) -> Result<RedirectLocation> {
        let path = self.signed_path(key);
        let signature = self.signature(method, &path, expires);

        let mut url = self.public_endpoint.clone();
        url.set_query(None);
        url.set_fragment(None);
        {
            // Each key segment is percent-encoded, so `?` and `#` stay in the path
            let mut segments = url.path_segments_mut().map_err(|_| {
                BlobstoreError::Configuration(format!(
                    "public endpoint {} is not a base url",
                    self.public_endpoint
                ))
            })?;
            segments
                .pop_if_empty()
                .extend(["signed", self.resource.as_str()])
                .extend(key.split('/'));
        }
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("md5", &signature);
            query.append_pair("expires", &expires.to_string());
            if method == SignMethod::Put {
                query.append_pair("method", "put");
            }
        }
        RedirectLocation::from_url(url)
    }

    /// Check a signature presented at `/signed/{resource}/{key}`
    pub fn verify(&self, method: SignMethod, key: &str, signature: &str, expires: i64) -> Result<()> {
        self.verify_at(method, key, signature, expires, Utc::now().timestamp())
    }

    pub fn verify_at(
        &self,
        method: SignMethod,
        key: &str,
        signature: &str,
        expires: i64,
        now: i64,
    ) -> Result<()> {
        let expected = self.signature(method, &self.signed_path(key), expires);
        if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
            return Err(BlobstoreError::Signing("signature mismatch".to_string()));
        }
        if expires < now {
            return Err(BlobstoreError::Signing("link expired".to_string()));
        }
        Ok(())
    }

    fn signed_path(&self, key: &str) -> String {
        format!("/signed/{}/{}", self.resource, key)
    }

    fn signature(&self, method: SignMethod, path: &str, expires: i64) -> String {
        let digest = Md5::digest(format!("{}{} {} {}", expires, method, path, self.secret));
        URL_SAFE_NO_PAD.encode(digest)
    }
}

#[async_trait]
impl UrlSigner for SecureLinkSigner {
    async fn sign_url(
        &self,
        method: SignMethod,
        key: &str,
        expires_in: Duration,
    ) -> Result<RedirectLocation> {
        let expires = Utc::now().timestamp() + expires_in.as_secs() as i64;
        self.sign_until(method, key, expires)
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer() -> SecureLinkSigner {
        SecureLinkSigner::new("http://bits.example.com:8080", "packages", "s3cr3t").unwrap()
    }

    fn query(location: &RedirectLocation, name: &str) -> Option<String> {
        location
            .url()
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = SecureLinkSigner::new("http://localhost", "packages", "ab").unwrap_err();
        assert!(matches!(err, BlobstoreError::Configuration(_)));
    }

    #[test]
    fn test_signed_location_shape() {
        let location = signer().sign_until(SignMethod::Get, "abc/def", 1_700_000_000).unwrap();
        assert_eq!(location.url().path(), "/signed/packages/abc/def");
        assert_eq!(query(&location, "expires").as_deref(), Some("1700000000"));
        assert!(query(&location, "method").is_none());

        let md5 = query(&location, "md5").unwrap();
        assert!(!md5.contains('='));
        assert!(!md5.contains('+'));
        assert!(!md5.contains('/'));
    }

    #[test]
    fn test_reserved_characters_stay_in_path() {
        let signer = signer();
        for key in ["a?b", "dir/a#b", "100%/done", "with space"] {
            let location = signer.sign_until(SignMethod::Get, key, 5_000).unwrap();
            assert!(location.url().fragment().is_none());
            assert_eq!(query(&location, "expires").as_deref(), Some("5000"));

            let decoded = location
                .url()
                .path_segments()
                .unwrap()
                .skip(2)
                .map(|segment| urlencoding::decode(segment).unwrap().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            assert_eq!(decoded, key);

            let md5 = query(&location, "md5").unwrap();
            assert!(signer.verify_at(SignMethod::Get, key, &md5, 5_000, 0).is_ok());
        }
    }

    #[test]
    fn test_endpoint_base_path_is_kept() {
        let signer = SecureLinkSigner::new("https://bits.example.com/blobs/", "droplets", "s3cr3t").unwrap();
        let location = signer.sign_until(SignMethod::Get, "app/hash", 10).unwrap();
        assert_eq!(location.url().path(), "/blobs/signed/droplets/app/hash");
    }

    #[test]
    fn test_verify_round_trip() {
        let signer = signer();
        let location = signer.sign_until(SignMethod::Put, "guid", 2_000).unwrap();
        let md5 = query(&location, "md5").unwrap();
        assert_eq!(query(&location, "method").as_deref(), Some("put"));

        assert!(signer.verify_at(SignMethod::Put, "guid", &md5, 2_000, 1_000).is_ok());
        // Method is part of the signature
        assert!(signer.verify_at(SignMethod::Get, "guid", &md5, 2_000, 1_000).is_err());
        assert!(signer.verify_at(SignMethod::Put, "other", &md5, 2_000, 1_000).is_err());
        assert!(signer.verify_at(SignMethod::Put, "guid", &md5, 2_001, 1_000).is_err());
    }

    #[test]
    fn test_expired_link_rejected() {
        let signer = signer();
        let location = signer.sign_until(SignMethod::Get, "guid", 100).unwrap();
        let md5 = query(&location, "md5").unwrap();
        let err = signer.verify_at(SignMethod::Get, "guid", &md5, 100, 101).unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[test]
    fn test_other_resource_signature_differs() {
        let packages = signer();
        let droplets = SecureLinkSigner::new("http://bits.example.com:8080", "droplets", "s3cr3t").unwrap();
        let location = packages.sign_until(SignMethod::Get, "guid", 5_000).unwrap();
        let md5 = query(&location, "md5").unwrap();
        assert!(droplets.verify_at(SignMethod::Get, "guid", &md5, 5_000, 0).is_err());
    }

    #[tokio::test]
    async fn test_sign_url_expires_in_future() {
        let location = signer()
            .sign_url(SignMethod::Get, "guid", Duration::from_secs(60))
            .await
            .unwrap();
        let expires: i64 = query(&location, "expires").unwrap().parse().unwrap();
        assert!(expires > Utc::now().timestamp());
    }
}
