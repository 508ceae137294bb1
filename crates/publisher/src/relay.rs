//! Outbox Relay
//!
//! Background task that scans the outbox for unpublished events and hands
//! them to the broker, attaching the event id as the correlation token.
//! The relay never marks a row published itself; broker acceptance arrives
//! asynchronously and is recorded by the confirm tracker. A publish failure
//! only schedules the row for a later attempt; one bad row never aborts the
//! tick.

use std::cmp;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use outpost_domain::broker::EventPublisher;
use outpost_domain::message::DocumentEventMessage;
use outpost_domain::outbox::{OutboxError, OutboxEvent, OutboxStore};

/// Configuration for the outbox relay.
#[derive(Debug, Clone)]
pub struct OutboxRelayConfig {
    /// How often to scan for unpublished events
    pub poll_interval: Duration,
    /// Maximum number of events to process in a single tick
    pub batch_size: usize,
    /// How long a claim on a row is honored before another worker may take
    /// it over; doubles as the retry deadline for confirms that never come
    pub claim_ttl: Duration,
    /// Initial delay before retrying a failed publish
    pub retry_delay: Duration,
    /// Upper bound for the exponential backoff
    pub max_retry_delay: Duration,
}

impl Default for OutboxRelayConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            batch_size: 100,
            claim_ttl: Duration::from_secs(30),
            retry_delay: Duration::from_millis(1000),
            max_retry_delay: Duration::from_secs(30),
        }
    }
}

impl OutboxRelayConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_claim_ttl(mut self, ttl: Duration) -> Self {
        self.claim_ttl = ttl;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_max_retry_delay(mut self, delay: Duration) -> Self {
        self.max_retry_delay = delay;
        self
    }
}

/// Outbox relay service.
pub struct OutboxRelay {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn EventPublisher>,
    base_url: String,
    config: OutboxRelayConfig,
}

impl OutboxRelay {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn EventPublisher>,
        base_url: impl Into<String>,
        config: OutboxRelayConfig,
    ) -> Self {
        Self {
            store,
            broker,
            base_url: base_url.into(),
            config,
        }
    }

    /// Run the relay until the shutdown signal fires.
    ///
    /// A tick that overruns the interval delays the next tick instead of
    /// skipping it.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval = ?self.config.poll_interval, "Starting outbox relay");

        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Outbox relay shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Relay tick failed");
                    }
                }
            }
        }
    }

    /// Process one relay cycle: scan for unpublished events, oldest first,
    /// and hand each to the broker.
    pub async fn tick(&self) -> Result<(), OutboxError> {
        let events = self.store.find_unpublished(self.config.batch_size).await?;
        if events.is_empty() {
            return Ok(());
        }

        debug!(count = events.len(), "Relaying unpublished events");
        for event in events {
            self.relay_event(event).await;
        }
        Ok(())
    }

    async fn relay_event(&self, event: OutboxEvent) {
        match self.store.claim(event.id, self.config.claim_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(event_id = %event.id, "Row is owned by another worker, skipping");
                return;
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "Failed to claim row, skipping");
                return;
            }
        }

        let message =
            DocumentEventMessage::new(&self.base_url, event.document_id, event.created_at);
        let correlation = event.id.to_string();

        match self.broker.publish(&message, &correlation).await {
            Ok(()) => {
                debug!(
                    event_id = %event.id,
                    document_id = %event.document_id,
                    "Event handed to broker, awaiting confirm"
                );
            }
            Err(e) => {
                let delay = self.backoff(event.attempts);
                warn!(
                    event_id = %event.id,
                    attempts = event.attempts + 1,
                    retry_in = ?delay,
                    error = %e,
                    "Publish failed, scheduling retry"
                );
                if let Err(release_err) = self
                    .store
                    .release(event.id, &e.to_string(), delay)
                    .await
                {
                    error!(event_id = %event.id, error = %release_err, "Failed to release claim");
                }
            }
        }
    }

    fn backoff(&self, attempts: i32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.clamp(0, 16) as u32);
        cmp::min(
            self.config.retry_delay.saturating_mul(factor),
            self.config.max_retry_delay,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confirm::ConfirmTracker;
    use outpost_domain::document::DocumentStore;
    use outpost_infrastructure::messaging::memory::{ConfirmBehavior, InMemoryBroker};
    use outpost_infrastructure::persistence::memory::InMemoryPublisherStore;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    struct Harness {
        store: Arc<InMemoryPublisherStore>,
        broker: Arc<InMemoryBroker>,
        relay: OutboxRelay,
        tracker: ConfirmTracker,
        confirms: mpsc::UnboundedReceiver<outpost_domain::broker::PublishConfirm>,
    }

    fn harness(config: OutboxRelayConfig) -> Harness {
        let (confirm_tx, confirms) = mpsc::unbounded_channel();
        let store = Arc::new(InMemoryPublisherStore::new());
        let broker = Arc::new(InMemoryBroker::new(confirm_tx));
        let relay = OutboxRelay::new(
            store.clone(),
            broker.clone(),
            "http://localhost:8080",
            config,
        );
        let tracker = ConfirmTracker::new(store.clone());
        Harness {
            store,
            broker,
            relay,
            tracker,
            confirms,
        }
    }

    async fn drain_confirms(h: &mut Harness) {
        while let Ok(confirm) = h.confirms.try_recv() {
            h.tracker.handle_confirm(confirm).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_created_document_awaits_relay() {
        let h = harness(OutboxRelayConfig::default());

        let (document, _) = h.store.create("some-content".to_string()).await.unwrap();

        let pending = h.store.find_unpublished(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].document_id, document.id);
        assert!(pending[0].published_at.is_none());
    }

    #[tokio::test]
    async fn test_tick_with_confirming_broker_publishes_event() {
        let mut h = harness(OutboxRelayConfig::default());
        let (_, event) = h.store.create("some-content".to_string()).await.unwrap();

        h.relay.tick().await.unwrap();
        drain_confirms(&mut h).await;

        assert!(h.store.find_unpublished(10).await.unwrap().is_empty());
        let stored = OutboxStore::find_by_id(h.store.as_ref(), event.id)
            .await
            .unwrap()
            .unwrap();
        let published_at = stored.published_at.expect("event confirmed");
        assert!(published_at >= stored.created_at);

        // Correlation token carries the event id.
        let published = h.broker.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].0, event.id.to_string());
        assert_eq!(
            published[0].1.document_uri,
            format!("http://localhost:8080/documents/{}", event.document_id)
        );
    }

    #[tokio::test]
    async fn test_tick_with_unavailable_broker_leaves_event_pending() {
        let mut h = harness(OutboxRelayConfig::default().with_retry_delay(Duration::ZERO));
        let (_, event) = h.store.create("some-content".to_string()).await.unwrap();
        h.broker.set_fail_publishes(true);

        h.relay.tick().await.unwrap();
        drain_confirms(&mut h).await;

        // Still unpublished and back in the scan for the next tick.
        let pending = h.store.find_unpublished(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, event.id);
        assert!(pending[0].published_at.is_none());
        assert_eq!(pending[0].attempts, 1);
        assert!(h.broker.published().is_empty());
    }

    #[tokio::test]
    async fn test_recovered_broker_retries_failed_event() {
        let mut h = harness(OutboxRelayConfig::default().with_retry_delay(Duration::ZERO));
        let (_, event) = h.store.create("some-content".to_string()).await.unwrap();

        h.broker.set_fail_publishes(true);
        h.relay.tick().await.unwrap();

        h.broker.set_fail_publishes(false);
        h.relay.tick().await.unwrap();
        drain_confirms(&mut h).await;

        let stored = OutboxStore::find_by_id(h.store.as_ref(), event.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.published_at.is_some());
    }

    #[tokio::test]
    async fn test_tick_processes_events_oldest_first() {
        let mut h = harness(OutboxRelayConfig::default());
        let first = OutboxStore::insert(h.store.as_ref(), Uuid::new_v4())
            .await
            .unwrap();
        let second = OutboxStore::insert(h.store.as_ref(), Uuid::new_v4())
            .await
            .unwrap();
        assert!(first.created_at <= second.created_at);

        h.relay.tick().await.unwrap();
        drain_confirms(&mut h).await;

        let published = h.broker.published();
        assert_eq!(published.len(), 2);
        assert_eq!(published[0].0, first.id.to_string());
        assert_eq!(published[1].0, second.id.to_string());
    }

    #[tokio::test]
    async fn test_unconfirmed_event_stays_claimed_until_ttl() {
        let mut h = harness(OutboxRelayConfig::default());
        h.broker.set_behavior(ConfirmBehavior::Silent);
        h.store.create("some-content".to_string()).await.unwrap();

        h.relay.tick().await.unwrap();
        // No confirm arrived; the claim is still held, so the next tick
        // must not publish the event a second time.
        h.relay.tick().await.unwrap();
        drain_confirms(&mut h).await;

        assert_eq!(h.broker.published().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_claim_is_retried() {
        let mut h = harness(OutboxRelayConfig::default().with_claim_ttl(Duration::ZERO));
        h.broker.set_behavior(ConfirmBehavior::Silent);
        h.store.create("some-content".to_string()).await.unwrap();

        h.relay.tick().await.unwrap();
        h.relay.tick().await.unwrap();
        drain_confirms(&mut h).await;

        // With an expired claim the event is redelivered; at-least-once
        // semantics make this legal.
        assert_eq!(h.broker.published().len(), 2);
    }

    #[tokio::test]
    async fn test_tick_processes_every_row() {
        let mut h = harness(OutboxRelayConfig::default());
        h.store.create("a".to_string()).await.unwrap();
        h.store.create("b".to_string()).await.unwrap();

        h.relay.tick().await.unwrap();
        drain_confirms(&mut h).await;

        assert_eq!(h.broker.published().len(), 2);
        assert!(h.store.find_unpublished(10).await.unwrap().is_empty());
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let relay = {
            let (tx, _rx) = mpsc::unbounded_channel();
            OutboxRelay::new(
                Arc::new(InMemoryPublisherStore::new()),
                Arc::new(InMemoryBroker::new(tx)),
                "http://localhost:8080",
                OutboxRelayConfig::default()
                    .with_retry_delay(Duration::from_secs(1))
                    .with_max_retry_delay(Duration::from_secs(30)),
            )
        };

        assert_eq!(relay.backoff(0), Duration::from_secs(1));
        assert_eq!(relay.backoff(1), Duration::from_secs(2));
        assert_eq!(relay.backoff(4), Duration::from_secs(16));
        assert_eq!(relay.backoff(5), Duration::from_secs(30));
        assert_eq!(relay.backoff(100), Duration::from_secs(30));
    }
}
