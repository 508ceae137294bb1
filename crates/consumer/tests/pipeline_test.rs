//! End-to-end test for the full relay pipeline:
//! document create -> outbox row -> relay tick -> broker -> confirm
//! tracker -> inbound handler -> inbox row -> hydration tick -> snapshot.
//!
//! Runs entirely against in-memory infrastructure, so no broker, database
//! or HTTP server is needed.

use std::sync::Arc;
use std::time::Duration;

use outpost_consumer::handler::DocumentEventHandler;
use outpost_consumer::hydrator::{HydrationPoller, HydrationPollerConfig};
use outpost_domain::broker::{Disposition, MessageHandler, PublishConfirm};
use outpost_domain::document::{DocumentStore, SnapshotStore};
use outpost_domain::inbox::InboxStore;
use outpost_domain::outbox::OutboxStore;
use outpost_infrastructure::http::fetcher::InMemoryDocumentFetcher;
use outpost_infrastructure::messaging::memory::{ConfirmBehavior, InMemoryBroker};
use outpost_infrastructure::persistence::memory::{
    InMemoryInboxStore, InMemoryPublisherStore, InMemorySnapshotStore,
};
use outpost_publisher::confirm::ConfirmTracker;
use outpost_publisher::relay::{OutboxRelay, OutboxRelayConfig};
use tokio::sync::mpsc;

const BASE_URL: &str = "http://localhost:8080";

struct Pipeline {
    publisher_store: Arc<InMemoryPublisherStore>,
    broker: Arc<InMemoryBroker>,
    relay: OutboxRelay,
    tracker: ConfirmTracker,
    confirms: mpsc::UnboundedReceiver<PublishConfirm>,
    inbox: Arc<InMemoryInboxStore>,
    snapshots: Arc<InMemorySnapshotStore>,
    fetcher: Arc<InMemoryDocumentFetcher>,
    handler: DocumentEventHandler,
    hydrator: HydrationPoller,
}

fn pipeline() -> Pipeline {
    let (confirm_tx, confirms) = mpsc::unbounded_channel();

    // Publisher side
    let publisher_store = Arc::new(InMemoryPublisherStore::new());
    let broker = Arc::new(InMemoryBroker::new(confirm_tx));
    let relay = OutboxRelay::new(
        publisher_store.clone(),
        broker.clone(),
        BASE_URL,
        OutboxRelayConfig::default(),
    );
    let tracker = ConfirmTracker::new(publisher_store.clone());

    // Consumer side
    let inbox = Arc::new(InMemoryInboxStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let fetcher = Arc::new(InMemoryDocumentFetcher::new());
    let handler = DocumentEventHandler::new(inbox.clone());
    let hydrator = HydrationPoller::new(
        inbox.clone(),
        snapshots.clone(),
        fetcher.clone(),
        HydrationPollerConfig::default(),
    );

    Pipeline {
        publisher_store,
        broker,
        relay,
        tracker,
        confirms,
        inbox,
        snapshots,
        fetcher,
        handler,
        hydrator,
    }
}

impl Pipeline {
    /// Route the publish confirms to the tracker, as the broker adapter
    /// would out-of-band.
    async fn process_confirms(&mut self) {
        while let Ok(confirm) = self.confirms.try_recv() {
            self.tracker.handle_confirm(confirm).await.unwrap();
        }
    }

    /// Deliver every published message to the consumer's handler, as the
    /// broker would.
    async fn deliver_all(&self) {
        for payload in self.broker.deliveries() {
            assert_eq!(
                self.handler.handle(&payload).await,
                Disposition::Acknowledge
            );
        }
    }

    /// Expose a created document at the URI the relay advertises for it.
    async fn serve_document(&self, document_id: uuid::Uuid) {
        let document = DocumentStore::find_by_id(self.publisher_store.as_ref(), document_id)
            .await
            .unwrap()
            .expect("document exists");
        self.fetcher
            .insert(format!("{BASE_URL}/documents/{document_id}"), document);
    }
}

#[tokio::test]
async fn test_document_flows_from_create_to_snapshot() {
    let mut p = pipeline();

    // Create a document; its event waits in the outbox.
    let (document, event) = p
        .publisher_store
        .create("some-content".to_string())
        .await
        .unwrap();
    p.serve_document(document.id).await;
    assert_eq!(p.publisher_store.find_unpublished(10).await.unwrap().len(), 1);

    // One relay cycle publishes and, after the confirm, marks the row.
    p.relay.tick().await.unwrap();
    p.process_confirms().await;
    assert!(p.publisher_store.find_unpublished(10).await.unwrap().is_empty());
    let published = OutboxStore::find_by_id(p.publisher_store.as_ref(), event.id)
        .await
        .unwrap()
        .unwrap();
    assert!(published.published_at.unwrap() >= published.created_at);

    // The broker delivers; the handler records the event.
    p.deliver_all().await;
    let recorded = p.inbox.find_unconsumed(10).await.unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(
        recorded[0].document_uri,
        format!("{BASE_URL}/documents/{}", document.id)
    );
    // The publisher's creation timestamp crossed the wire intact.
    assert_eq!(recorded[0].created_at, event.created_at);

    // One hydration cycle caches the document and consumes the event.
    p.hydrator.tick().await.unwrap();
    let snapshot = p.snapshots.find_by_id(document.id).await.unwrap().unwrap();
    assert_eq!(snapshot.content, "some-content");
    assert!(p.inbox.find_unconsumed(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_duplicate_delivery_yields_two_rows_one_snapshot() {
    let mut p = pipeline();

    let (document, _) = p
        .publisher_store
        .create("some-content".to_string())
        .await
        .unwrap();
    p.serve_document(document.id).await;

    p.relay.tick().await.unwrap();
    p.process_confirms().await;

    // The broker redelivers the same payload twice.
    p.deliver_all().await;
    p.deliver_all().await;
    assert_eq!(p.inbox.count().await, 2);

    // A single hydration tick resolves both rows into one shared snapshot.
    p.hydrator.tick().await.unwrap();
    assert_eq!(p.snapshots.count().await.unwrap(), 1);
    assert!(p.inbox.find_unconsumed(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_broker_outage_heals_end_to_end() {
    let mut p = pipeline();
    let (document, event) = p
        .publisher_store
        .create("some-content".to_string())
        .await
        .unwrap();
    p.serve_document(document.id).await;

    // First cycle: broker down. The event survives unpublished. A zero
    // retry delay keeps it eligible for the very next tick.
    let relay = OutboxRelay::new(
        p.publisher_store.clone(),
        p.broker.clone(),
        BASE_URL,
        OutboxRelayConfig::default().with_retry_delay(Duration::ZERO),
    );
    p.broker.set_fail_publishes(true);
    relay.tick().await.unwrap();
    p.process_confirms().await;
    assert_eq!(p.publisher_store.find_unpublished(10).await.unwrap().len(), 1);

    // Broker recovers; the pipeline completes untouched by the outage.
    p.broker.set_fail_publishes(false);
    relay.tick().await.unwrap();
    p.process_confirms().await;
    let published = OutboxStore::find_by_id(p.publisher_store.as_ref(), event.id)
        .await
        .unwrap()
        .unwrap();
    assert!(published.published_at.is_some());

    p.deliver_all().await;
    p.hydrator.tick().await.unwrap();
    assert_eq!(p.snapshots.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_rejected_publish_is_redelivered_until_accepted() {
    let mut p = pipeline();
    let (document, event) = p
        .publisher_store
        .create("some-content".to_string())
        .await
        .unwrap();
    p.serve_document(document.id).await;

    // The broker takes the message but refuses to confirm it.
    p.broker.set_behavior(ConfirmBehavior::Reject);
    p.relay.tick().await.unwrap();
    p.process_confirms().await;
    assert_eq!(p.publisher_store.find_unpublished(10).await.unwrap().len(), 1);

    p.broker.set_behavior(ConfirmBehavior::Accept);
    p.relay.tick().await.unwrap();
    p.process_confirms().await;
    let published = OutboxStore::find_by_id(p.publisher_store.as_ref(), event.id)
        .await
        .unwrap()
        .unwrap();
    assert!(published.published_at.is_some());

    // At-least-once: the reject cycle produced an extra delivery, and the
    // consumer keeps a row for each without collapsing them.
    p.deliver_all().await;
    assert_eq!(p.inbox.count().await, 2);

    p.hydrator.tick().await.unwrap();
    assert_eq!(p.snapshots.count().await.unwrap(), 1);
}
