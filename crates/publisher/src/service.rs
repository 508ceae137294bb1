//! Publisher service wiring.

use sqlx::postgres::PgPool;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};

use crate::api::{self, ApiState};
use crate::config::PublisherConfig;
use crate::confirm::ConfirmTracker;
use crate::relay::OutboxRelay;
use outpost_domain::document::DocumentStore;
use outpost_domain::outbox::OutboxStore;
use outpost_infrastructure::messaging::nats::NatsEventBroker;
use outpost_infrastructure::persistence::memory::InMemoryPublisherStore;
use outpost_infrastructure::persistence::postgres::PostgresPublisherStore;

/// Run the publisher until interrupted.
///
/// Spawns the relay, the confirm tracker and the document API, then waits
/// for ctrl-c. The tracker stopping on its own means a broken invariant
/// between the outbox and the broker, and takes the whole service down.
pub async fn run(config: PublisherConfig) -> anyhow::Result<()> {
    let (confirm_tx, confirm_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, _) = broadcast::channel(1);

    let (documents, outbox): (Arc<dyn DocumentStore>, Arc<dyn OutboxStore>) =
        match &config.database_url {
            Some(url) => {
                let pool = PgPool::connect(url).await?;
                let store = Arc::new(PostgresPublisherStore::new(pool));
                store.run_migrations().await?;
                info!("Using PostgreSQL stores");
                (
                    store.clone() as Arc<dyn DocumentStore>,
                    store as Arc<dyn OutboxStore>,
                )
            }
            None => {
                let store = Arc::new(InMemoryPublisherStore::new());
                info!("No DATABASE_URL set, using in-memory stores");
                (
                    store.clone() as Arc<dyn DocumentStore>,
                    store as Arc<dyn OutboxStore>,
                )
            }
        };

    let broker = Arc::new(NatsEventBroker::connect(config.broker.clone(), confirm_tx).await?);

    let relay = OutboxRelay::new(
        outbox.clone(),
        broker,
        config.base_url.clone(),
        config.relay.clone(),
    );
    let relay_handle = tokio::spawn(relay.run(shutdown_tx.subscribe()));

    let tracker = ConfirmTracker::new(outbox);
    let mut tracker_handle = tokio::spawn(tracker.run(confirm_rx, shutdown_tx.subscribe()));

    let app = api::router(ApiState { documents });
    let listener = tokio::net::TcpListener::bind(config.http_bind).await?;
    info!(addr = %config.http_bind, "Document API listening");
    let mut api_shutdown = shutdown_tx.subscribe();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.recv().await;
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            let _ = shutdown_tx.send(());
            let _ = tracker_handle.await;
        }
        result = &mut tracker_handle => {
            match result {
                Ok(Ok(())) => info!("Confirm tracker stopped"),
                Ok(Err(e)) => error!(error = %e, "Confirm tracker failed, shutting down"),
                Err(e) => error!(error = %e, "Confirm tracker panicked, shutting down"),
            }
            let _ = shutdown_tx.send(());
        }
    }

    let _ = relay_handle.await;
    let _ = server_handle.await;

    Ok(())
}
