//! Consumer-side inbox events.
//!
//! The inbound message handler records one inbox event per delivery,
//! duplicates included, since the publisher's at-least-once publish/confirm
//! cycle can emit two deliveries for one logical event. The hydration
//! poller later resolves each row's `document_uri` and stamps `consumed_at`.

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Error types for inbox operations
#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Inbox event not found: {0}")]
    NotFound(Uuid),

    #[error("Storage error: {message}")]
    Storage { message: String },
}

/// A consumer-side inbox event row.
///
/// `created_at` is the publisher's creation time carried in the wire
/// message, not the consumer's receipt time. The only legal mutation of
/// `consumed_at` is the None -> Some transition performed by the hydration
/// poller.
#[derive(Debug, Clone, PartialEq)]
pub struct InboxEvent {
    pub id: Uuid,
    pub document_uri: String,
    pub created_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl InboxEvent {
    /// Check if the referenced document still needs to be fetched
    pub fn is_pending(&self) -> bool {
        self.consumed_at.is_none()
    }

    /// Check if the event is eligible for hydration at `now`
    pub fn is_hydratable(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.next_attempt_at.is_none_or(|at| at <= now)
    }
}

/// Store for consumer-side inbox events.
///
/// Rows are inserted by the message handler only, and mutated only by the
/// hydration poller's claim/release/mark cycle.
#[async_trait::async_trait]
pub trait InboxStore: Send + Sync {
    /// Insert a new inbox event carrying the wire message's fields.
    ///
    /// Always creates a new row; the pipeline performs no deduplication of
    /// inbound events.
    async fn insert(
        &self,
        document_uri: &str,
        created_at: DateTime<Utc>,
    ) -> Result<InboxEvent, InboxError>;

    /// Retrieve events whose document has not been fetched yet, oldest
    /// first (`created_at` ascending; equal timestamps in natural scan
    /// order).
    async fn find_unconsumed(&self, limit: usize) -> Result<Vec<InboxEvent>, InboxError>;

    /// Find an event by its id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<InboxEvent>, InboxError>;

    /// Acquire an exclusive, non-blocking claim on a row; `false` means the
    /// row is consumed, gone, or held by another worker, and is skipped.
    async fn claim(&self, id: Uuid, ttl: Duration) -> Result<bool, InboxError>;

    /// Release a claim after a failed fetch, scheduling the next attempt
    /// `retry_after` from now.
    async fn release(&self, id: Uuid, error: &str, retry_after: Duration)
    -> Result<(), InboxError>;

    /// Stamp `consumed_at` on a row.
    ///
    /// Fails with [`InboxError::NotFound`] if the id no longer exists; a
    /// no-op when the row is already consumed.
    async fn mark_consumed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), InboxError>;
}
