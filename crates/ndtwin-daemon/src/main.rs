//! NDT control-plane daemon entry point.

use std::sync::Arc;

use ndtwin_daemon::{NdtConfig, NdtDaemon, TracingRuleSender};
use ndtwin_device::SimulatedAdapter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("ndtwind v{}", env!("CARGO_PKG_VERSION"));

    let config_path =
        std::env::var("NDTWIN_CONFIG").unwrap_or_else(|_| "/etc/ndtwin/ndtwin.json".into());
    let config = NdtConfig::load(&config_path).unwrap_or_else(|_| {
        tracing::warn!(path = %config_path, "config not found, using defaults");
        NdtConfig::default()
    });

    // The simulated adapter stands in for SNMP/SSH/smart-plug transports;
    // testbed deployments inject their own DeviceAdapter here.
    let mut daemon = NdtDaemon::build(
        config,
        Arc::new(SimulatedAdapter::new()),
        Arc::new(TracingRuleSender),
    )?;
    daemon.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    daemon.shutdown().await;

    Ok(())
}
