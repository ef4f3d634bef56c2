//! Error types for the bits-blobstore crate

use thiserror::Error;

/// Result type alias using `BlobstoreError`
pub type Result<T> = std::result::Result<T, BlobstoreError>;

/// Errors that can occur during blobstore operations.
///
/// `NotFound` and `NoSpaceLeft` are the named failures every backend must
/// report distinctly. Every other variant is opaque to callers and should be
/// branched on through [`BlobstoreError::kind`] rather than matched directly.
#[derive(Error, Debug)]
pub enum BlobstoreError {
    /// No blob is stored under the key
    #[error("not found: {key}")]
    NotFound { key: String },

    /// The backend ran out of capacity while writing
    #[error("no space left on device")]
    NoSpaceLeft,

    /// Key rejected before reaching the backend
    #[error("invalid key {key:?}: {reason}")]
    InvalidKey { key: String, reason: &'static str },

    /// A backend produced a location that is not an absolute URL
    #[error("invalid redirect location {location:?}: {reason}")]
    InvalidRedirect { location: String, reason: String },

    /// URL signing failed
    #[error("signing error: {0}")]
    Signing(String),

    /// IO error
    #[error("io error: {0}")]
    Io(std::io::Error),

    /// Object store API error
    #[error("object store error: {0}")]
    ObjectStore(object_store::Error),

    /// Any other backend failure
    #[error("backend error: {0}")]
    Backend(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Coarse classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    NoSpaceLeft,
    Other,
}

impl BlobstoreError {
    /// Create a not found error
    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound { key: key.into() }
    }

    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NoSpaceLeft => ErrorKind::NoSpaceLeft,
            _ => ErrorKind::Other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }

    pub fn is_no_space_left(&self) -> bool {
        self.kind() == ErrorKind::NoSpaceLeft
    }

    /// Map an IO error raised while operating on `key`.
    ///
    /// IO errors must go through here (there is no `From` impl) so a missing
    /// file surfaces as `NotFound` with its key.
    pub fn from_io(err: std::io::Error, key: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory => {
                Self::not_found(key)
            }
            std::io::ErrorKind::StorageFull => Self::NoSpaceLeft,
            _ if err.raw_os_error() == Some(ENOSPC) => Self::NoSpaceLeft,
            _ => Self::Io(err),
        }
    }

    /// Map an object store error raised while operating on `key`
    pub fn from_object_store(err: object_store::Error, key: &str) -> Self {
        match err {
            object_store::Error::NotFound { .. } => Self::not_found(key),
            other => Self::ObjectStore(other),
        }
    }
}

const ENOSPC: i32 = 28;

impl From<reqwest::Error> for BlobstoreError {
    fn from(err: reqwest::Error) -> Self {
        BlobstoreError::Backend(err.to_string())
    }
}

impl From<url::ParseError> for BlobstoreError {
    fn from(err: url::ParseError) -> Self {
        BlobstoreError::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_not_found_keeps_key() {
        let err = BlobstoreError::from_io(io::Error::from(io::ErrorKind::NotFound), "packages/abc");
        assert!(matches!(err, BlobstoreError::NotFound { ref key } if key == "packages/abc"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_io_storage_full_is_no_space_left() {
        let err = BlobstoreError::from_io(io::Error::from(io::ErrorKind::StorageFull), "k");
        assert!(err.is_no_space_left());

        let err = BlobstoreError::from_io(io::Error::from_raw_os_error(ENOSPC), "k");
        assert!(err.is_no_space_left());
    }

    #[test]
    fn test_other_io_errors_stay_opaque() {
        let err = BlobstoreError::from_io(io::Error::from(io::ErrorKind::PermissionDenied), "k");
        assert_eq!(err.kind(), ErrorKind::Other);
    }

    #[test]
    fn test_object_store_not_found() {
        let source = object_store::Error::NotFound {
            path: "dir/one".to_string(),
            source: "missing".into(),
        };
        let err = BlobstoreError::from_object_store(source, "dir/one");
        assert!(err.is_not_found());
    }
}
