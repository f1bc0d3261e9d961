use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

const ADDR: &str = "0.0.0.0:8080";
const METRICS_ADDR: &str = "0.0.0.0:8002";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("mock_service=info,tower_http=info")),
        )
        .init();

    let metrics_addr: SocketAddr = METRICS_ADDR.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to install Prometheus exporter")?;

    let addr: SocketAddr = ADDR.parse()?;
    tracing::info!("Mock service listening on {addr}");
    mock_service::run(addr)
        .await
        .with_context(|| format!("mock service on {addr} failed"))
}
