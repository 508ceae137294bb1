//! Wire payload exchanged between publisher and consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The event notification carried over the broker.
///
/// `document_uri` is resolved once on the publisher side and carried
/// verbatim; the consumer never regenerates it. `created_at` is the outbox
/// row's creation time and must survive the round trip without losing
/// precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentEventMessage {
    pub document_uri: String,
    pub created_at: DateTime<Utc>,
}

impl DocumentEventMessage {
    /// Build the message for an outbox event, resolving the document URI
    /// against the publisher's base URL.
    pub fn new(base_url: &str, document_id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            document_uri: format!(
                "{}/documents/{}",
                base_url.trim_end_matches('/'),
                document_id
            ),
            created_at,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
