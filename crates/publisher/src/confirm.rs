//! Confirm Tracker
//!
//! Correlates asynchronous broker delivery confirms back to outbox rows.
//! An accepted confirm stamps `published_at`; a rejected one leaves the row
//! unpublished for the relay to retry. A confirm without a usable
//! correlation token, or one referencing a row that no longer exists,
//! breaks the invariant between the outbox and the broker and terminates
//! the tracker instead of being absorbed.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use uuid::Uuid;

use outpost_domain::broker::PublishConfirm;
use outpost_domain::outbox::{OutboxError, OutboxStore};

/// Error type for confirm handling.
///
/// Every variant except `Store` is a protocol violation and fatal to the
/// tracker; `Store` covers transient persistence faults and is only logged.
#[derive(Debug, thiserror::Error)]
pub enum ConfirmError {
    #[error("Delivery confirm carried no correlation token")]
    MissingCorrelation,

    #[error("Correlation token is not an event id: {0}")]
    MalformedCorrelation(String),

    #[error("Confirmed event no longer exists: {0}")]
    UnknownEvent(Uuid),

    #[error(transparent)]
    Store(#[from] OutboxError),
}

impl ConfirmError {
    fn is_fatal(&self) -> bool {
        !matches!(self, ConfirmError::Store(_))
    }
}

/// Records broker delivery outcomes against the outbox.
pub struct ConfirmTracker {
    store: Arc<dyn OutboxStore>,
}

impl ConfirmTracker {
    pub fn new(store: Arc<dyn OutboxStore>) -> Self {
        Self { store }
    }

    /// Consume confirms until the channel closes, the shutdown signal
    /// fires, or a protocol violation surfaces.
    pub async fn run(
        self,
        mut confirms: mpsc::UnboundedReceiver<PublishConfirm>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ConfirmError> {
        info!("Starting confirm tracker");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Confirm tracker shutting down");
                    return Ok(());
                }
                confirm = confirms.recv() => {
                    let Some(confirm) = confirm else {
                        info!("Confirm channel closed");
                        return Ok(());
                    };
                    match self.handle_confirm(confirm).await {
                        Ok(()) => {}
                        Err(e) if e.is_fatal() => {
                            error!(error = %e, "Protocol violation in delivery confirm");
                            return Err(e);
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to record delivery confirm");
                        }
                    }
                }
            }
        }
    }

    /// Process a single delivery confirm.
    pub async fn handle_confirm(&self, confirm: PublishConfirm) -> Result<(), ConfirmError> {
        let correlation = confirm
            .correlation
            .ok_or(ConfirmError::MissingCorrelation)?;
        let event_id = correlation
            .parse::<Uuid>()
            .map_err(|_| ConfirmError::MalformedCorrelation(correlation.clone()))?;

        self.store
            .find_by_id(event_id)
            .await?
            .ok_or(ConfirmError::UnknownEvent(event_id))?;

        if !confirm.accepted {
            let cause = confirm.cause.as_deref().unwrap_or("no cause reported");
            warn!(event_id = %event_id, cause = %cause, "Broker rejected event, leaving it unpublished");
            // Clear the relay's claim so the row goes straight back into
            // the scan; the poll interval paces the retry.
            self.store
                .release(event_id, cause, Duration::ZERO)
                .await?;
            return Ok(());
        }

        match self.store.mark_published(event_id, Utc::now()).await {
            Ok(()) => {
                info!(event_id = %event_id, "Event confirmed as published");
                Ok(())
            }
            Err(OutboxError::NotFound(id)) => Err(ConfirmError::UnknownEvent(id)),
            Err(e) => Err(ConfirmError::Store(e)),
        }
    }
}
