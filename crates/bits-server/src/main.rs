//! Bits service - blob storage for the platform

use bits_server::{run_server_with_shutdown, ServerConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "bits-service")]
#[command(about = "Blob storage for packages, droplets, buildpacks and OCI manifests")]
#[command(version)]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(short, long, env = "BITS_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind to, overrides the configuration file
    #[arg(short = 'H', long, env = "BITS_HOST")]
    host: Option<String>,

    /// Port to listen on, overrides the configuration file
    #[arg(short, long, env = "BITS_PORT")]
    port: Option<u16>,

    /// Enable debug logging
    #[arg(short, long, env = "BITS_DEBUG")]
    debug: bool,

    /// Emit logs as JSON lines
    #[arg(long, env = "BITS_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Setup logging
    let log_level = if args.debug { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "bits_server={level},bits_blobstore={level},tower_http=info",
            level = log_level
        )
        .into()
    });
    let registry = tracing_subscriber::registry().with(filter);
    if args.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    let mut config = ServerConfig::load(args.config.as_deref())?;
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    tracing::info!(
        "Starting bits service on {} (public endpoint {})",
        config.bind_addr(),
        config.public_endpoint()
    );

    run_server_with_shutdown(config, async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received shutdown signal");
        }
    })
    .await
}
