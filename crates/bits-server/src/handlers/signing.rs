//! URL signing and secure link resolution

use crate::middleware::RequestLogger;
use crate::state::Resource;
use crate::{ApiError, AppState};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use bits_blobstore::SignMethod;
use bytes::Bytes;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{warn, Instrument};

#[derive(Debug, Deserialize)]
pub struct SignParams {
    /// `put` for an upload location, anything else signs a GET
    pub verb: Option<String>,
}

/// Query string of a secure link
#[derive(Debug, Deserialize)]
pub struct SignedParams {
    pub md5: Option<String>,
    /// Unix seconds, parsed during verification
    pub expires: Option<String>,
    pub method: Option<String>,
}

fn lookup<'a>(state: &'a AppState, name: &str) -> Result<&'a Resource, ApiError> {
    state
        .resource(name)
        .ok_or_else(|| ApiError::NotFound(format!("unknown resource {}", name)))
}

/// GET /sign/{resource}/{*key} - a signed location as plain text
pub async fn sign_url(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path((resource, key)): Path<(String, String)>,
    Query(params): Query<SignParams>,
) -> Result<Response, ApiError> {
    let resource = lookup(&state, &resource)?;
    let method = match params.verb.as_deref() {
        Some(verb) if verb.eq_ignore_ascii_case("put") => SignMethod::Put,
        _ => SignMethod::Get,
    };

    let location = resource
        .sign(method, &key)
        .instrument(logger.span())
        .await
        .ok_or_else(|| {
            ApiError::bad_request(format!("resource {} is not in redirect mode", resource.name()))
        })??;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain")],
        location.to_string(),
    )
        .into_response())
}

/// Check a secure link, answering 403 for anything not signed by us
fn verify(
    resource: &Resource,
    method: SignMethod,
    key: &str,
    params: &SignedParams,
) -> Result<(), ApiError> {
    let forbidden = || ApiError::Forbidden("invalid or expired signature".to_string());
    let signer = resource.secure_link().ok_or_else(forbidden)?;
    let (Some(md5), Some(expires)) = (params.md5.as_deref(), params.expires.as_deref()) else {
        return Err(forbidden());
    };
    let expires: i64 = expires.parse().map_err(|_| forbidden())?;
    let method_matches = match method {
        SignMethod::Put => params.method.as_deref() == Some("put"),
        SignMethod::Get => params.method.is_none(),
    };
    if !method_matches {
        return Err(forbidden());
    }

    signer.verify(method, key, md5, expires).map_err(|e| {
        warn!(resource = resource.name(), key = %key, error = %e, "Rejected secure link");
        forbidden()
    })
}

/// GET /signed/{resource}/{*key}
pub async fn get_signed(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path((resource, key)): Path<(String, String)>,
    Query(params): Query<SignedParams>,
) -> Result<Response, ApiError> {
    let resource = lookup(&state, &resource)?;
    verify(resource, SignMethod::Get, &key, &params)?;

    let body = resource.read_raw(&key).instrument(logger.span()).await?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/octet-stream")],
        body,
    )
        .into_response())
}

/// PUT /signed/{resource}/{*key}
pub async fn put_signed(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path((resource, key)): Path<(String, String)>,
    Query(params): Query<SignedParams>,
    body: Bytes,
) -> Result<Response, ApiError> {
    let resource = lookup(&state, &resource)?;
    verify(resource, SignMethod::Put, &key, &params)?;

    resource
        .write_raw(&key, body)
        .instrument(logger.span())
        .await?;
    Ok(StatusCode::OK.into_response())
}
