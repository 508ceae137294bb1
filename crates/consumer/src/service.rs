//! Consumer service wiring.

use sqlx::postgres::PgPool;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::config::ConsumerConfig;
use crate::handler::DocumentEventHandler;
use crate::hydrator::HydrationPoller;
use outpost_domain::broker::MessageHandler;
use outpost_domain::document::SnapshotStore;
use outpost_domain::inbox::InboxStore;
use outpost_infrastructure::http::fetcher::HttpDocumentFetcher;
use outpost_infrastructure::messaging::nats::NatsEventListener;
use outpost_infrastructure::persistence::memory::{InMemoryInboxStore, InMemorySnapshotStore};
use outpost_infrastructure::persistence::postgres::{PostgresInboxStore, PostgresSnapshotStore};

/// Run the consumer until interrupted.
///
/// Spawns the broker listener (which feeds the event handler) and the
/// hydration poller, then waits for ctrl-c.
pub async fn run(config: ConsumerConfig) -> anyhow::Result<()> {
    let (shutdown_tx, _) = broadcast::channel(1);

    let (inbox, snapshots): (Arc<dyn InboxStore>, Arc<dyn SnapshotStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = PgPool::connect(url).await?;
                let inbox = Arc::new(PostgresInboxStore::new(pool.clone()));
                inbox.run_migrations().await?;
                let snapshots = Arc::new(PostgresSnapshotStore::new(pool));
                snapshots.run_migrations().await?;
                info!("Using PostgreSQL stores");
                (
                    inbox as Arc<dyn InboxStore>,
                    snapshots as Arc<dyn SnapshotStore>,
                )
            }
            None => {
                info!("No DATABASE_URL set, using in-memory stores");
                (
                    Arc::new(InMemoryInboxStore::new()) as Arc<dyn InboxStore>,
                    Arc::new(InMemorySnapshotStore::new()) as Arc<dyn SnapshotStore>,
                )
            }
        };

    let listener = NatsEventListener::connect(&config.broker).await?;
    let handler = Arc::new(DocumentEventHandler::new(inbox.clone())) as Arc<dyn MessageHandler>;
    let listener_shutdown = shutdown_tx.subscribe();
    let listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.run(handler, listener_shutdown).await {
            error!(error = %e, "Broker listener failed");
        }
    });

    let fetcher = Arc::new(HttpDocumentFetcher::with_timeout(config.fetch_timeout));
    let poller = HydrationPoller::new(inbox, snapshots, fetcher, config.hydration.clone());
    let poller_handle = tokio::spawn(poller.run(shutdown_tx.subscribe()));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    let _ = shutdown_tx.send(());

    let _ = listener_handle.await;
    let _ = poller_handle.await;

    Ok(())
}
