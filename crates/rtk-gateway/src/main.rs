//! RTK gateway binary: bidirectional MQTT translation between vendor
//! device topics and the canonical RTK hierarchy.

use tracing_subscriber::EnvFilter;

use rtk_gateway::config::GatewayConfig;
use rtk_gateway::supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "rtk-gateway starting");

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "/etc/rtk/gateway.toml".to_string());

    let config = GatewayConfig::from_file(&config_path)?;
    tracing::info!(
        gateway_id = %config.gateway_id,
        tenant = %config.default_tenant,
        site = %config.default_site,
        broker = %config.mqtt.broker_host,
        "config loaded"
    );

    supervisor::run(config).await
}
