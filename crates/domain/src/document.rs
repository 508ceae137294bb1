//! Documents, their cached snapshots, and the fetch boundary.
//!
//! The publisher owns documents; the consumer keeps locally cached copies
//! (snapshots) fetched over HTTP, keyed by the remote document's own id so
//! that hydrating the same document twice stays idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::outbox::{OutboxError, OutboxEvent};

/// Error types for document operations
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Document not found: {0}")]
    NotFound(Uuid),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    #[error("Storage error: {message}")]
    Storage { message: String },
}

/// Error types for snapshot operations
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage error: {message}")]
    Storage { message: String },
}

/// Errors from the external document fetch.
///
/// Every variant is a retryable fault: the affected inbox row is left
/// unconsumed and retried on a later poller tick.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Transport error fetching {uri}: {message}")]
    Transport { uri: String, message: String },

    #[error("Unexpected status {status} fetching {uri}")]
    Status { uri: String, status: u16 },

    #[error("Malformed document body from {uri}: {message}")]
    Decode { uri: String, message: String },
}

/// The business entity relayed between the two services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub content: String,
}

/// A locally cached copy of a remote document, keyed by the remote
/// document's own id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSnapshot {
    pub document_id: Uuid,
    pub content: String,
    pub fetched_at: DateTime<Utc>,
}

impl DocumentSnapshot {
    pub fn new(document: Document, fetched_at: DateTime<Utc>) -> Self {
        Self {
            document_id: document.id,
            content: document.content,
            fetched_at,
        }
    }
}

/// Publisher-side document store.
#[async_trait::async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a new document and its outbox event in one local
    /// transaction.
    ///
    /// Exactly one outbox event is recorded per created document; either
    /// both rows exist afterwards or neither does.
    async fn create(&self, content: String) -> Result<(Document, OutboxEvent), DocumentError>;

    /// Find a document by its id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, DocumentError>;

    /// List all documents
    async fn list(&self) -> Result<Vec<Document>, DocumentError>;
}

/// Consumer-side snapshot store.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or replace the snapshot for the given remote document id.
    async fn upsert(&self, snapshot: DocumentSnapshot) -> Result<(), SnapshotError>;

    /// Find a snapshot by the remote document id
    async fn find_by_id(&self, document_id: Uuid) -> Result<Option<DocumentSnapshot>, SnapshotError>;

    /// Count stored snapshots
    async fn count(&self) -> Result<usize, SnapshotError>;
}

/// Boundary for reading a document from its external locator.
#[async_trait::async_trait]
pub trait DocumentFetcher: Send + Sync {
    async fn fetch(&self, uri: &str) -> Result<Document, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_keyed_by_remote_id() {
        let id = Uuid::new_v4();
        let fetched_at = Utc::now();
        let snapshot = DocumentSnapshot::new(
            Document {
                id,
                content: "some-content".to_string(),
            },
            fetched_at,
        );

        assert_eq!(snapshot.document_id, id);
        assert_eq!(snapshot.content, "some-content");
        assert_eq!(snapshot.fetched_at, fetched_at);
    }

    #[test]
    fn test_document_serde_round_trip() {
        let document = Document {
            id: Uuid::new_v4(),
            content: "body".to_string(),
        };

        let json = serde_json::to_string(&document).unwrap();
        let back: Document = serde_json::from_str(&json).unwrap();
        assert_eq!(back, document);
    }
}
