//! Publisher-side outbox events.
//!
//! An outbox event is recorded in the same local transaction as the document
//! it refers to, and is later relayed to the broker by a background task.
//! `published_at` is stamped by the confirm tracker once the broker accepts
//! the event; until then the row stays eligible for relay retries.

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

/// Error types for outbox operations
#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Outbox event not found: {0}")]
    NotFound(Uuid),

    #[error("Storage error: {message}")]
    Storage { message: String },
}

/// A publisher-side outbox event row.
///
/// `published_at`, once set, is never cleared or overwritten. `claimed_at`,
/// `attempts` and `next_attempt_at` exist for the relay's claim/retry cycle
/// and are never touched by anything else.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub document_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl OutboxEvent {
    /// Check if the event is still awaiting broker acceptance
    pub fn is_pending(&self) -> bool {
        self.published_at.is_none()
    }

    /// Check if the event has been accepted by the broker
    pub fn is_published(&self) -> bool {
        self.published_at.is_some()
    }

    /// Check if the event is eligible for relay at `now`: unpublished and
    /// past its backoff schedule.
    pub fn is_relayable(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.next_attempt_at.is_none_or(|at| at <= now)
    }

    /// Check whether a claim stamped at `claimed_at` is still held at `now`.
    pub fn is_claimed(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match self.claimed_at {
            Some(claimed_at) => {
                let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
                now.signed_duration_since(claimed_at) < ttl
            }
            None => false,
        }
    }

    /// Get the age of the event
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.created_at)
    }
}

/// Store for publisher-side outbox events.
///
/// Rows are mutated by exactly two writer roles: the relay's claim/release
/// cycle and the confirm tracker's `mark_published`. No other code writes
/// to this table.
#[async_trait::async_trait]
pub trait OutboxStore: Send + Sync {
    /// Insert a new outbox event for a document.
    ///
    /// The store assigns `id` and `created_at`. Callers that need atomicity
    /// with the document insert go through
    /// [`DocumentStore::create`](crate::document::DocumentStore::create)
    /// instead.
    async fn insert(&self, document_id: Uuid) -> Result<OutboxEvent, OutboxError>;

    /// Retrieve events awaiting relay, oldest first.
    ///
    /// Returns rows with `published_at IS NULL` whose backoff schedule has
    /// elapsed, ordered by `created_at` ascending so no event is starved
    /// behind a stream of newer ones. Rows with identical `created_at` come
    /// back in the store's natural scan order. Rows under an active claim
    /// are still returned; [`claim`](OutboxStore::claim) is the gate.
    async fn find_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>, OutboxError>;

    /// Find an event by its id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, OutboxError>;

    /// Find all events recorded for a document
    async fn find_by_document(&self, document_id: Uuid) -> Result<Vec<OutboxEvent>, OutboxError>;

    /// Acquire an exclusive, non-blocking claim on a row.
    ///
    /// Returns `false` when the row is already published, is gone, or is
    /// held by another worker whose claim is younger than `ttl`; in all of
    /// those cases the caller skips the row. A stale claim (older than
    /// `ttl`) is taken over; that is the recovery path for confirms that
    /// never arrive.
    async fn claim(&self, id: Uuid, ttl: Duration) -> Result<bool, OutboxError>;

    /// Release a claim after a failed publish.
    ///
    /// Clears the claim, increments the attempt counter, records the error
    /// and schedules the next attempt `retry_after` from now.
    async fn release(
        &self,
        id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> Result<(), OutboxError>;

    /// Stamp `published_at` on a row.
    ///
    /// Fails with [`OutboxError::NotFound`] if the id no longer exists.
    /// A row that is already published keeps its original timestamp; the
    /// call is then a no-op (duplicate confirms are expected under
    /// at-least-once delivery).
    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(
        published_at: Option<DateTime<Utc>>,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> OutboxEvent {
        OutboxEvent {
            id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            created_at: Utc::now(),
            published_at,
            claimed_at: None,
            attempts: 0,
            next_attempt_at,
            last_error: None,
        }
    }

    #[test]
    fn test_pending_event_is_relayable() {
        let event = event(None, None);
        assert!(event.is_pending());
        assert!(!event.is_published());
        assert!(event.is_relayable(Utc::now()));
    }

    #[test]
    fn test_published_event_is_not_relayable() {
        let event = event(Some(Utc::now()), None);
        assert!(event.is_published());
        assert!(!event.is_relayable(Utc::now()));
    }

    #[test]
    fn test_backoff_gates_relay_eligibility() {
        let now = Utc::now();
        let event = event(None, Some(now + chrono::Duration::seconds(5)));
        assert!(!event.is_relayable(now));
        assert!(event.is_relayable(now + chrono::Duration::seconds(6)));
    }

    #[test]
    fn test_claim_expiry() {
        let now = Utc::now();
        let mut event = event(None, None);
        assert!(!event.is_claimed(now, Duration::from_secs(30)));

        event.claimed_at = Some(now);
        assert!(event.is_claimed(now + chrono::Duration::seconds(10), Duration::from_secs(30)));
        assert!(!event.is_claimed(now + chrono::Duration::seconds(31), Duration::from_secs(30)));
    }
}
