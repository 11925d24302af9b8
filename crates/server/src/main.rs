// crates/server/src/main.rs
//! Jobwatch server binary.
//!
//! Connects to the control plane described by `JOBWATCH_*` variables and
//! serves the SSE viewer endpoint until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use jobwatch_core::{HttpControlPlane, MonitorConfig, PlaneConfig};
use jobwatch_server::{create_app, AppState};
use tracing_subscriber::EnvFilter;

/// Default port for the server.
const DEFAULT_PORT: u16 = 47900;

/// Get the server port from environment or use default.
fn get_port() -> u16 {
    std::env::var("JOBWATCH_PORT")
        .ok()
        .or_else(|| std::env::var("PORT").ok())
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,jobwatch_core=info,jobwatch_server=info".into()),
        )
        .compact()
        .with_writer(std::io::stderr)
        .init();

    let plane_config = PlaneConfig::from_env();
    let monitor = MonitorConfig::from_env().context("reading monitor settings")?;
    let api_url = plane_config.api_url.clone();
    let plane = HttpControlPlane::new(plane_config).context("building control-plane client")?;

    let state = AppState::new(Arc::new(plane), monitor);
    let shutdown = state.shutdown.clone();
    let app = create_app(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], get_port()));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, control_plane = %api_url, "jobwatch server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            tracing::info!("shutting down, closing open monitors");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
