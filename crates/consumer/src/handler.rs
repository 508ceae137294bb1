//! Inbound event handler.
//!
//! Invoked once per delivered message. A successful handling path always
//! inserts a fresh inbox row; there is no deduplication here, so a
//! redelivered event becomes a second row and the snapshot upsert further
//! down absorbs the duplicate. The returned [`Disposition`] is the only
//! acknowledgment that ever happens; nothing is acked implicitly.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{error, info};

use outpost_domain::broker::{Disposition, MessageHandler};
use outpost_domain::inbox::InboxStore;
use outpost_domain::message::DocumentEventMessage;

pub struct DocumentEventHandler {
    inbox: Arc<dyn InboxStore>,
}

impl DocumentEventHandler {
    pub fn new(inbox: Arc<dyn InboxStore>) -> Self {
        Self { inbox }
    }
}

#[async_trait]
impl MessageHandler for DocumentEventHandler {
    async fn handle(&self, payload: &[u8]) -> Disposition {
        let message = match DocumentEventMessage::from_bytes(payload) {
            Ok(message) => message,
            Err(e) => {
                // A payload that does not parse will never parse; requeueing
                // it would loop forever.
                error!(error = %e, "Rejecting malformed event payload");
                return Disposition::Reject { requeue: false };
            }
        };

        match self
            .inbox
            .insert(&message.document_uri, message.created_at)
            .await
        {
            Ok(event) => {
                info!(
                    event_id = %event.id,
                    document_uri = %event.document_uri,
                    "Recorded inbound event"
                );
                Disposition::Acknowledge
            }
            Err(e) => {
                error!(error = %e, "Failed to record inbound event, rejecting");
                Disposition::Reject { requeue: false }
            }
        }
    }
}
