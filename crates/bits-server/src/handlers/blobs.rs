//! Package, droplet, buildpack and buildpack cache handlers

use crate::middleware::RequestLogger;
use crate::state::Resource;
use crate::{ApiError, AppState};
use axum::{
    body::Body,
    extract::{FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use bits_blobstore::Fetched;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn, Instrument};

/// JSON body asking to duplicate an existing blob
#[derive(Debug, Deserialize)]
pub struct CopyRequest {
    pub source_guid: String,
}

/// Body of a successful upload
#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub guid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha1: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Why a `Digest` request header was refused
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
enum DigestHeaderError {
    #[error("Digest header is missing")]
    ValueMissing,
    #[error("Digest header must look like sha256=<hex>")]
    UnknownFormat,
    #[error("Digest header names no algorithm")]
    AlgorithmMissing,
    #[error("Digest algorithm {0} is not supported, use sha256")]
    UnsupportedAlgorithm(String),
    #[error("Digest header carries no digest")]
    DigestMissing,
}

impl From<DigestHeaderError> for ApiError {
    fn from(err: DigestHeaderError) -> Self {
        ApiError::bad_request(err.to_string())
    }
}

/// Parse `sha256=<hex>`, returning the lowercased hex digest
fn parse_digest_header(value: Option<&str>) -> Result<String, DigestHeaderError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(DigestHeaderError::ValueMissing)?;
    let (algorithm, digest) = value.split_once('=').unwrap_or((value, ""));
    let (algorithm, digest) = (algorithm.trim(), digest.trim());

    match (algorithm.is_empty(), digest.is_empty()) {
        (true, true) => return Err(DigestHeaderError::UnknownFormat),
        (true, false) => return Err(DigestHeaderError::AlgorithmMissing),
        _ => {}
    }
    if !algorithm.eq_ignore_ascii_case("sha256") {
        return Err(DigestHeaderError::UnsupportedAlgorithm(algorithm.to_string()));
    }
    if digest.is_empty() {
        return Err(DigestHeaderError::DigestMissing);
    }
    Ok(digest.to_ascii_lowercase())
}

/// What a PUT asked for
enum Upload {
    Bits(Bytes),
    CopyFrom(String),
}

/// Rules for one resource's PUT bodies
struct UploadRules {
    /// Accepted multipart field names
    fields: &'static [&'static str],
    allow_copy: bool,
}

const PACKAGE_UPLOAD: UploadRules = UploadRules {
    fields: &["package", "bits"],
    allow_copy: true,
};

const DROPLET_UPLOAD: UploadRules = UploadRules {
    fields: &["droplet"],
    allow_copy: true,
};

/// `PUT /droplets/{guid}` with a `Digest` header
const DIGEST_DROPLET_UPLOAD: UploadRules = UploadRules {
    fields: &["droplet"],
    allow_copy: false,
};

const BUILDPACK_UPLOAD: UploadRules = UploadRules {
    fields: &["buildpack"],
    allow_copy: false,
};

const BUILDPACK_CACHE_UPLOAD: UploadRules = UploadRules {
    fields: &["buildpack_cache"],
    allow_copy: false,
};

async fn read_upload(request: Request, rules: &UploadRules) -> Result<Upload, ApiError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?
        {
            let is_bits = field.name().is_some_and(|name| rules.fields.contains(&name));
            if is_bits {
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::bad_request(e.body_text()))?;
                return Ok(Upload::Bits(bytes));
            }
        }
        return Err(ApiError::bad_request(format!(
            "multipart body has no {} field",
            rules.fields.join(" or ")
        )));
    }

    if rules.allow_copy && content_type.starts_with("application/json") {
        let Json(copy) = Json::<CopyRequest>::from_request(request, &())
            .await
            .map_err(|e| ApiError::bad_request(e.body_text()))?;
        return Ok(Upload::CopyFrom(copy.source_guid));
    }

    Err(ApiError::bad_request(if rules.allow_copy {
        "expected a multipart upload or a JSON body with source_guid"
    } else {
        "expected a multipart upload"
    }))
}

async fn put_blob(
    resource: &Resource,
    logger: &RequestLogger,
    key: String,
    request: Request,
    rules: &UploadRules,
) -> Result<Response, ApiError> {
    let guid = key.clone();
    let (sha1, sha256) = match read_upload(request, rules).await? {
        Upload::Bits(bytes) => {
            let sha1 = hex::encode(Sha1::digest(&bytes));
            let sha256 = hex::encode(Sha256::digest(&bytes));
            debug!(resource = resource.name(), key = %key, size = bytes.len(), "Storing upload");
            resource
                .put(&key, bytes)
                .instrument(logger.span())
                .await?;
            (Some(sha1), Some(sha256))
        }
        Upload::CopyFrom(source) => {
            debug!(resource = resource.name(), from = %source, to = %key, "Copying blob");
            resource
                .copy(&source, &key)
                .instrument(logger.span())
                .await?;
            (None, None)
        }
    };

    Ok((StatusCode::CREATED, Json(UploadResponse { guid, sha1, sha256 })).into_response())
}

/// Store a droplet under `{guid}/{digest}`, the digest taken from the `Digest` header
async fn put_droplet_with_digest(
    resource: &Resource,
    logger: &RequestLogger,
    guid: String,
    request: Request,
) -> Result<Response, ApiError> {
    let digest = digest_from_headers(request.headers())?;
    let Upload::Bits(bytes) = read_upload(request, &DIGEST_DROPLET_UPLOAD).await? else {
        return Err(ApiError::bad_request("expected a multipart upload"));
    };

    let actual = hex::encode(Sha256::digest(&bytes));
    if actual != digest {
        warn!(guid = %guid, expected = %digest, actual = %actual, "Droplet digest mismatch");
        return Err(ApiError::bad_request("Digest header does not match the uploaded droplet"));
    }

    let key = format!("{}/{}", guid, digest);
    debug!(resource = resource.name(), key = %key, size = bytes.len(), "Storing droplet");
    resource
        .put(&key, bytes)
        .instrument(logger.span())
        .await?;

    let response = UploadResponse {
        guid: key,
        sha1: None,
        sha256: Some(digest),
    };
    Ok((StatusCode::CREATED, Json(response)).into_response())
}

fn digest_from_headers(headers: &HeaderMap) -> Result<String, DigestHeaderError> {
    parse_digest_header(headers.get("digest").and_then(|v| v.to_str().ok()))
}

async fn get_blob(resource: &Resource, logger: &RequestLogger, key: &str) -> Result<Response, ApiError> {
    let fetched = resource.get(key).instrument(logger.span()).await?;
    Ok(match fetched {
        Fetched::Body(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/octet-stream")],
            Body::from(body),
        )
            .into_response(),
        Fetched::Redirect(location) => {
            (StatusCode::FOUND, [(header::LOCATION, location.as_str())]).into_response()
        }
    })
}

async fn delete_blob(resource: &Resource, logger: &RequestLogger, key: &str) -> Result<Response, ApiError> {
    resource.delete(key).instrument(logger.span()).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// PUT /packages/{guid}
pub async fn put_package(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path(guid): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    put_blob(&state.packages, &logger, guid, request, &PACKAGE_UPLOAD).await
}

/// GET /packages/{guid}
pub async fn get_package(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path(guid): Path<String>,
) -> Result<Response, ApiError> {
    get_blob(&state.packages, &logger, &guid).await
}

/// DELETE /packages/{guid}
pub async fn delete_package(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path(guid): Path<String>,
) -> Result<Response, ApiError> {
    delete_blob(&state.packages, &logger, &guid).await
}

/// PUT /droplets/{*path}
///
/// A bare guid needs a `Digest: sha256=<hex>` header and lands at
/// `{guid}/{hex}`. Longer paths are stored as given.
pub async fn put_droplet(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path(path): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    if path.contains('/') {
        put_blob(&state.droplets, &logger, path, request, &DROPLET_UPLOAD).await
    } else {
        put_droplet_with_digest(&state.droplets, &logger, path, request).await
    }
}

/// GET /droplets/{*path}
pub async fn get_droplet(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    get_blob(&state.droplets, &logger, &path).await
}

/// DELETE /droplets/{*path}
pub async fn delete_droplet(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    delete_blob(&state.droplets, &logger, &path).await
}

/// PUT /buildpacks/{guid}
pub async fn put_buildpack(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path(guid): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    put_blob(&state.buildpacks, &logger, guid, request, &BUILDPACK_UPLOAD).await
}

/// GET /buildpacks/{guid}
pub async fn get_buildpack(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path(guid): Path<String>,
) -> Result<Response, ApiError> {
    get_blob(&state.buildpacks, &logger, &guid).await
}

/// DELETE /buildpacks/{guid}
pub async fn delete_buildpack(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path(guid): Path<String>,
) -> Result<Response, ApiError> {
    delete_blob(&state.buildpacks, &logger, &guid).await
}

/// PUT /buildpack_cache/entries/{app_guid}/{stack}
pub async fn put_buildpack_cache_entry(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path((app_guid, stack)): Path<(String, String)>,
    request: Request,
) -> Result<Response, ApiError> {
    let key = format!("{}/{}", app_guid, stack);
    put_blob(&state.buildpack_cache, &logger, key, request, &BUILDPACK_CACHE_UPLOAD).await
}

/// GET /buildpack_cache/entries/{app_guid}/{stack}
pub async fn get_buildpack_cache_entry(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path((app_guid, stack)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    get_blob(&state.buildpack_cache, &logger, &format!("{}/{}", app_guid, stack)).await
}

/// DELETE /buildpack_cache/entries/{app_guid}/{stack}
pub async fn delete_buildpack_cache_entry(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path((app_guid, stack)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    delete_blob(&state.buildpack_cache, &logger, &format!("{}/{}", app_guid, stack)).await
}

/// DELETE /buildpack_cache/entries/{app_guid} - every stack of one app
pub async fn delete_buildpack_cache_app(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path(app_guid): Path<String>,
) -> Result<Response, ApiError> {
    state
        .buildpack_cache
        .delete_dir(&app_guid)
        .instrument(logger.span())
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

/// DELETE /buildpack_cache/entries - the whole cache
pub async fn delete_buildpack_cache(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
) -> Result<Response, ApiError> {
    state
        .buildpack_cache
        .delete_dir("")
        .instrument(logger.span())
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
