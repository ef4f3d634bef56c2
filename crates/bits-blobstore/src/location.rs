//! Redirect locations and redirect-capable read results

use crate::{BlobstoreError, Result};
use bytes::Bytes;
use std::fmt;
use url::Url;

/// An absolute, time-limited URL a client can use against the backing store.
///
/// Only constructible from a non-empty absolute `http`/`https` URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RedirectLocation(Url);

impl RedirectLocation {
    /// Parse and validate a location string
    pub fn parse(location: &str) -> Result<Self> {
        if location.trim().is_empty() {
            return Err(BlobstoreError::InvalidRedirect {
                location: location.to_string(),
                reason: "location is empty".to_string(),
            });
        }
        let url = Url::parse(location).map_err(|e| BlobstoreError::InvalidRedirect {
            location: location.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_url(url)
    }

    /// Validate an already parsed URL
    pub fn from_url(url: Url) -> Result<Self> {
        match url.scheme() {
            "http" | "https" if url.has_host() => Ok(Self(url)),
            scheme => Err(BlobstoreError::InvalidRedirect {
                location: url.to_string(),
                reason: format!("expected an absolute http(s) url, got scheme {scheme:?}"),
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    pub fn url(&self) -> &Url {
        &self.0
    }

    pub fn into_url(self) -> Url {
        self.0
    }
}

impl fmt::Display for RedirectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

/// Result of a redirect-capable read: the body inline, or where to fetch it.
#[derive(Clone, Debug)]
pub enum Fetched {
    Body(Bytes),
    Redirect(RedirectLocation),
}

impl Fetched {
    pub fn body(&self) -> Option<&Bytes> {
        match self {
            Self::Body(body) => Some(body),
            Self::Redirect(_) => None,
        }
    }

    pub fn redirect(&self) -> Option<&RedirectLocation> {
        match self {
            Self::Body(_) => None,
            Self::Redirect(location) => Some(location),
        }
    }

    pub fn is_redirect(&self) -> bool {
        matches!(self, Self::Redirect(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_absolute_url() {
        let location = RedirectLocation::parse("https://bucket.s3.amazonaws.com/packages/abc?X-Amz-Signature=1").unwrap();
        assert_eq!(location.url().host_str(), Some("bucket.s3.amazonaws.com"));
        assert!(location.to_string().starts_with("https://"));
    }

    #[test]
    fn test_rejects_empty_and_relative() {
        assert!(matches!(
            RedirectLocation::parse(""),
            Err(BlobstoreError::InvalidRedirect { .. })
        ));
        assert!(RedirectLocation::parse("/signed/packages/abc").is_err());
        assert!(RedirectLocation::parse("file:///tmp/abc").is_err());
    }

    #[test]
    fn test_fetched_exposes_exactly_one_side() {
        let body = Fetched::Body(Bytes::from_static(b"content"));
        assert!(body.body().is_some());
        assert!(body.redirect().is_none());

        let redirect = Fetched::Redirect(RedirectLocation::parse("http://localhost/x").unwrap());
        assert!(redirect.is_redirect());
        assert!(redirect.body().is_none());
    }
}
