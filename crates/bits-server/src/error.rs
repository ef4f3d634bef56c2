//! API error type and its HTTP rendering

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use bits_blobstore::{BlobstoreError, ErrorKind};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Blobstore(#[from] BlobstoreError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Blobstore(e) => match e.kind() {
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::NoSpaceLeft => StatusCode::INSUFFICIENT_STORAGE,
                ErrorKind::Other if matches!(e, BlobstoreError::InvalidKey { .. }) => {
                    StatusCode::BAD_REQUEST
                }
                ErrorKind::Other => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Get the error code string
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "BadRequest",
            Self::Forbidden(_) => "Forbidden",
            Self::NotFound(_) => "NotFound",
            Self::Internal(_) => "InternalError",
            Self::Blobstore(e) => match e.kind() {
                ErrorKind::NotFound => "NotFound",
                ErrorKind::NoSpaceLeft => "NoSpaceLeft",
                ErrorKind::Other if matches!(e, BlobstoreError::InvalidKey { .. }) => "InvalidKey",
                ErrorKind::Other => "InternalError",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let description = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed");
            "An unknown error occurred".to_string()
        } else {
            self.to_string()
        };

        (
            status,
            Json(json!({
                "code": self.code(),
                "description": description,
            })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BlobstoreError::not_found("guid"), StatusCode::NOT_FOUND, "NotFound")]
    #[case(BlobstoreError::NoSpaceLeft, StatusCode::INSUFFICIENT_STORAGE, "NoSpaceLeft")]
    #[case(
        BlobstoreError::InvalidKey { key: "..".into(), reason: "key contains a relative segment" },
        StatusCode::BAD_REQUEST,
        "InvalidKey"
    )]
    #[case(BlobstoreError::Backend("boom".into()), StatusCode::INTERNAL_SERVER_ERROR, "InternalError")]
    fn test_blobstore_mapping(
        #[case] error: BlobstoreError,
        #[case] status: StatusCode,
        #[case] code: &str,
    ) {
        let error = ApiError::from(error);
        assert_eq!(error.status_code(), status);
        assert_eq!(error.code(), code);
    }

    #[test]
    fn test_internal_details_hidden() {
        let response = ApiError::Blobstore(BlobstoreError::Backend("secret detail".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
