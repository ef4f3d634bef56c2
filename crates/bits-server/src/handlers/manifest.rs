//! OCI registry manifest endpoint

use crate::middleware::RequestLogger;
use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension,
};
use bits_blobstore::{is_valid_repository_name, ManifestStore, MANIFEST_CONTENT_TYPE};
use std::sync::Arc;
use tracing::{error, Instrument};

/// Split `{name}/manifest/{tag}`; the name may itself contain `/`
fn parse_manifest_path(rest: &str) -> Option<(&str, &str)> {
    let (name, tag) = rest.rsplit_once("/manifest/")?;
    if tag.is_empty() || tag.contains('/') || !is_valid_repository_name(name) {
        return None;
    }
    Some((name, tag))
}

/// GET /v2/{name}/manifest/{tag}
pub async fn get_manifest(
    State(state): State<Arc<AppState>>,
    Extension(logger): Extension<RequestLogger>,
    Path(rest): Path<String>,
) -> Response {
    let Some((name, tag)) = parse_manifest_path(&rest) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    match state
        .manifests
        .get_manifest(name, tag)
        .instrument(logger.span())
        .await
    {
        Ok(manifest) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, MANIFEST_CONTENT_TYPE)],
            manifest,
        )
            .into_response(),
        Err(e) => {
            error!(parent: &logger.span(), name = %name, tag = %tag, error = %e, "Could not read manifest");
            (StatusCode::INTERNAL_SERVER_ERROR, "could not receive manifest").into_response()
        }
    }
}
