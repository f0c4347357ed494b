//! Prometheus export of client metrics.

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Install the Prometheus recorder and serve it on `port`.
///
/// The exporter runs its own HTTP listener thread.
///
/// # Errors
///
/// Returns an error if the recorder cannot be installed or the port cannot
/// be bound.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to start metrics exporter")?;

    natter_core::metrics::describe_metrics();
    info!(%addr, "Metrics server listening");
    Ok(())
}
