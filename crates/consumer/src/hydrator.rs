//! Hydration Poller
//!
//! Background task that resolves recorded events into cached document
//! snapshots: fetch the referenced document, upsert it keyed by its remote
//! id, stamp `consumed_at`. Each row's fetch/persist/mark sequence is
//! independent: one unreachable document never stalls the rest of the
//! tick, and a failed row simply stays unconsumed for a later attempt.

use chrono::Utc;
use std::cmp;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use outpost_domain::document::{DocumentFetcher, DocumentSnapshot, SnapshotStore};
use outpost_domain::inbox::{InboxError, InboxEvent, InboxStore};

/// Configuration for the hydration poller.
#[derive(Debug, Clone)]
pub struct HydrationPollerConfig {
    /// How often to scan for unconsumed events
    pub poll_interval: Duration,
    /// Maximum number of events to process in a single tick
    pub batch_size: usize,
    /// How long a claim on a row is honored before another worker may take
    /// it over
    pub claim_ttl: Duration,
    /// Initial delay before retrying a failed fetch
    pub retry_delay: Duration,
    /// Upper bound for the exponential backoff
    pub max_retry_delay: Duration,
}

impl Default for HydrationPollerConfig {
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

impl HydrationPollerConfig {
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
}

/// Hydration poller service.
pub struct HydrationPoller {
    inbox: Arc<dyn InboxStore>,
    snapshots: Arc<dyn SnapshotStore>,
    fetcher: Arc<dyn DocumentFetcher>,
    config: HydrationPollerConfig,
}

impl HydrationPoller {
    pub fn new(
        inbox: Arc<dyn InboxStore>,
        snapshots: Arc<dyn SnapshotStore>,
        fetcher: Arc<dyn DocumentFetcher>,
        config: HydrationPollerConfig,
    ) -> Self {
        Self {
            inbox,
            snapshots,
            fetcher,
            config,
        }
    }

    /// Run the poller until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(interval = ?self.config.poll_interval, "Starting hydration poller");

        let mut interval = time::interval(self.config.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Hydration poller shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        warn!(error = %e, "Hydration tick failed");
                    }
                }
            }
        }
    }

    /// Process one hydration cycle: scan for unconsumed events, oldest
    /// first, and resolve each into a snapshot.
    pub async fn tick(&self) -> Result<(), InboxError> {
        let events = self.inbox.find_unconsumed(self.config.batch_size).await?;
        if events.is_empty() {
            return Ok(());
        }

        debug!(count = events.len(), "Hydrating unconsumed events");
        for event in events {
            self.hydrate_event(event).await;
        }
        Ok(())
    }

    async fn hydrate_event(&self, event: InboxEvent) {
        match self.inbox.claim(event.id, self.config.claim_ttl).await {
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

        if let Err(e) = self.fetch_and_store(&event).await {
            let delay = self.backoff(event.attempts);
            warn!(
                event_id = %event.id,
                document_uri = %event.document_uri,
                attempts = event.attempts + 1,
                retry_in = ?delay,
                error = %e,
                "Hydration failed, scheduling retry"
            );
            if let Err(release_err) = self.inbox.release(event.id, &e, delay).await {
                error!(event_id = %event.id, error = %release_err, "Failed to release claim");
            }
        }
    }

    async fn fetch_and_store(&self, event: &InboxEvent) -> Result<(), String> {
        let document = self
            .fetcher
            .fetch(&event.document_uri)
            .await
            .map_err(|e| e.to_string())?;

        let document_id = document.id;
        self.snapshots
            .upsert(DocumentSnapshot::new(document, Utc::now()))
            .await
            .map_err(|e| e.to_string())?;

        self.inbox
            .mark_consumed(event.id, Utc::now())
            .await
            .map_err(|e| e.to_string())?;

        debug!(
            event_id = %event.id,
            document_id = %document_id,
            "Event hydrated"
        );
        Ok(())
    }

    fn backoff(&self, attempts: i32) -> Duration {
        let factor = 2u32.saturating_pow(attempts.clamp(0, 16) as u32);
        cmp::min(
            self.config.retry_delay.saturating_mul(factor),
            self.config.max_retry_delay,
        )
    }
}
