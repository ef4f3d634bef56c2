//! # Bits Server
//!
//! HTTP front end of the bits service.
//!
//! This crate provides:
//! - **Blob resources**: packages, droplets, buildpacks and the buildpack
//!   cache, each in redirect or stream mode over its own blobstore
//! - **Secure links**: signing and resolving `/signed/...` locations for
//!   backends without native presigning
//! - **OCI registry**: image manifests under `/v2/{name}/manifest/{tag}`
//! - **Request logging**: per-request correlation ids and completion records
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │            Cloud Controller / Diego / docker        │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//! ┌─────────────────────────▼───────────────────────────┐
//! │                    Bits Server                      │
//! ├─────────────────────────────────────────────────────┤
//! │       Logging Middleware │ Trace │ Body Limit       │
//! ├─────────────────────────────────────────────────────┤
//! │   Resource Handlers │ Signing │ Manifest Endpoint   │
//! ├─────────────────────────────────────────────────────┤
//! │                  bits-blobstore                     │
//! │        (memory, local filesystem, S3)               │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{AccessMode, ResourceConfig, ServerConfig};
pub use error::ApiError;
pub use middleware::RequestLogger;
pub use server::{run_server, run_server_with_shutdown};
pub use state::AppState;
