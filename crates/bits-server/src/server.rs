//! Server startup and lifecycle

use crate::{routes, AppState, ServerConfig};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Run the bits server until it fails
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    run_server_with_shutdown(config, std::future::pending()).await
}

/// Run server with graceful shutdown
pub async fn run_server_with_shutdown(
    config: ServerConfig,
    shutdown_signal: impl std::future::Future<Output = ()> + Send + 'static,
) -> anyhow::Result<()> {
    let addr = config.bind_addr();
    let state = Arc::new(AppState::new(config).await?);
    let app = routes::create_router(state);

    let listener = TcpListener::bind(&addr).await?;
    info!("Bits service listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Bits service shutdown complete");

    Ok(())
}
