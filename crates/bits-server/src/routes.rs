//! HTTP route definitions

use crate::{handlers, middleware, AppState};
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_middleware,
    routing::{delete, get},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    let max_body_size = state.config.max_body_size;

    Router::new()
        // Packages
        .route(
            "/packages/{guid}",
            get(handlers::get_package)
                .put(handlers::put_package)
                .delete(handlers::delete_package),
        )
        // Droplets
        .route(
            "/droplets/{*path}",
            get(handlers::get_droplet)
                .put(handlers::put_droplet)
                .delete(handlers::delete_droplet),
        )
        // Buildpacks
        .route(
            "/buildpacks/{guid}",
            get(handlers::get_buildpack)
                .put(handlers::put_buildpack)
                .delete(handlers::delete_buildpack),
        )
        // Buildpack cache
        .route(
            "/buildpack_cache/entries",
            delete(handlers::delete_buildpack_cache),
        )
        .route(
            "/buildpack_cache/entries/{app_guid}",
            delete(handlers::delete_buildpack_cache_app),
        )
        .route(
            "/buildpack_cache/entries/{app_guid}/{stack}",
            get(handlers::get_buildpack_cache_entry)
                .put(handlers::put_buildpack_cache_entry)
                .delete(handlers::delete_buildpack_cache_entry),
        )
        // Signing
        .route("/sign/{resource}/{*key}", get(handlers::sign_url))
        .route(
            "/signed/{resource}/{*key}",
            get(handlers::get_signed).put(handlers::put_signed),
        )
        // OCI registry
        .route("/v2/{*rest}", get(handlers::get_manifest))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(middleware::logging_middleware))
                .layer(DefaultBodyLimit::max(max_body_size)),
        )
        .with_state(state)
}
