// Publisher service binary.
// Run: cargo run --bin outpost-publisher

use outpost_publisher::PublisherConfig;
use outpost_publisher::service;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = PublisherConfig::from_env();
    info!("Starting outpost publisher");

    service::run(config).await
}
