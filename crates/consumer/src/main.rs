// Consumer service binary.
// Run: cargo run --bin outpost-consumer

use outpost_consumer::ConsumerConfig;
use outpost_consumer::service;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = ConsumerConfig::from_env();
    info!("Starting outpost consumer");

    service::run(config).await
}
