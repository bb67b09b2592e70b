//! Prometheus metrics exporter.
//!
//! Installs the global recorder and starts its own HTTP listener on
//! `metrics_port`, separate from the device-channel router: metrics
//! scraping shouldn't share a port (or a `TraceLayer`) with device
//! traffic.

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

pub fn install(port: u16) -> anyhow::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!(%addr, "metrics exporter listening");
    Ok(())
}
