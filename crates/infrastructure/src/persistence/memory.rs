//! In-memory store implementations.
//!
//! Fast, isolated implementations of the store ports, used by the test
//! suites and as a database-free development mode. The publisher store
//! keeps documents and outbox events behind one lock so that
//! `create` stays atomic, mirroring the single-transaction contract of the
//! Postgres implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use outpost_domain::document::{
    Document, DocumentError, DocumentSnapshot, DocumentStore, SnapshotError, SnapshotStore,
};
use outpost_domain::inbox::{InboxError, InboxEvent, InboxStore};
use outpost_domain::outbox::{OutboxError, OutboxEvent, OutboxStore};

fn backoff_deadline(retry_after: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(retry_after).unwrap_or(chrono::Duration::zero())
}

#[derive(Debug, Default)]
struct PublisherState {
    documents: Vec<Document>,
    events: Vec<OutboxEvent>,
}

impl PublisherState {
    fn insert_event(&mut self, document_id: Uuid) -> OutboxEvent {
        let event = OutboxEvent {
            id: Uuid::new_v4(),
            document_id,
            created_at: Utc::now(),
            published_at: None,
            claimed_at: None,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
        };
        self.events.push(event.clone());
        event
    }
}

/// In-memory publisher-side store: documents plus their outbox events.
#[derive(Clone, Default)]
pub struct InMemoryPublisherStore {
    inner: Arc<RwLock<PublisherState>>,
}

impl InMemoryPublisherStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryPublisherStore {
    async fn create(&self, content: String) -> Result<(Document, OutboxEvent), DocumentError> {
        let mut state = self.inner.write().await;
        let document = Document {
            id: Uuid::new_v4(),
            content,
        };
        state.documents.push(document.clone());
        let event = state.insert_event(document.id);
        Ok((document, event))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, DocumentError> {
        let state = self.inner.read().await;
        Ok(state.documents.iter().find(|d| d.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<Document>, DocumentError> {
        let state = self.inner.read().await;
        Ok(state.documents.clone())
    }
}

#[async_trait]
impl OutboxStore for InMemoryPublisherStore {
    async fn insert(&self, document_id: Uuid) -> Result<OutboxEvent, OutboxError> {
        let mut state = self.inner.write().await;
        Ok(state.insert_event(document_id))
    }

    async fn find_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>, OutboxError> {
        let state = self.inner.read().await;
        let now = Utc::now();
        let mut pending: Vec<OutboxEvent> = state
            .events
            .iter()
            .filter(|e| e.is_relayable(now))
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, OutboxError> {
        let state = self.inner.read().await;
        Ok(state.events.iter().find(|e| e.id == id).cloned())
    }

    async fn find_by_document(&self, document_id: Uuid) -> Result<Vec<OutboxEvent>, OutboxError> {
        let state = self.inner.read().await;
        Ok(state
            .events
            .iter()
            .filter(|e| e.document_id == document_id)
            .cloned()
            .collect())
    }

    async fn claim(&self, id: Uuid, ttl: Duration) -> Result<bool, OutboxError> {
        let mut state = self.inner.write().await;
        let now = Utc::now();
        let Some(event) = state.events.iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };
        if event.is_published() || event.is_claimed(now, ttl) {
            return Ok(false);
        }
        event.claimed_at = Some(now);
        Ok(true)
    }

    async fn release(
        &self,
        id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> Result<(), OutboxError> {
        let mut state = self.inner.write().await;
        if let Some(event) = state.events.iter_mut().find(|e| e.id == id) {
            event.claimed_at = None;
            event.attempts += 1;
            event.last_error = Some(error.to_string());
            event.next_attempt_at = Some(backoff_deadline(retry_after));
        }
        Ok(())
    }

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError> {
        let mut state = self.inner.write().await;
        let event = state
            .events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(OutboxError::NotFound(id))?;
        if event.published_at.is_none() {
            event.published_at = Some(at);
        }
        event.claimed_at = None;
        Ok(())
    }
}

/// In-memory consumer-side inbox store.
#[derive(Clone, Default)]
pub struct InMemoryInboxStore {
    inner: Arc<RwLock<Vec<InboxEvent>>>,
}

impl InMemoryInboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored events, consumed or not.
    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }
}

#[async_trait]
impl InboxStore for InMemoryInboxStore {
    async fn insert(
        &self,
        document_uri: &str,
        created_at: DateTime<Utc>,
    ) -> Result<InboxEvent, InboxError> {
        let mut events = self.inner.write().await;
        let event = InboxEvent {
            id: Uuid::new_v4(),
            document_uri: document_uri.to_string(),
            created_at,
            consumed_at: None,
            claimed_at: None,
            attempts: 0,
            next_attempt_at: None,
            last_error: None,
        };
        events.push(event.clone());
        Ok(event)
    }

    async fn find_unconsumed(&self, limit: usize) -> Result<Vec<InboxEvent>, InboxError> {
        let events = self.inner.read().await;
        let now = Utc::now();
        let mut pending: Vec<InboxEvent> = events
            .iter()
            .filter(|e| e.is_hydratable(now))
            .cloned()
            .collect();
        pending.sort_by_key(|e| e.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<InboxEvent>, InboxError> {
        let events = self.inner.read().await;
        Ok(events.iter().find(|e| e.id == id).cloned())
    }

    async fn claim(&self, id: Uuid, ttl: Duration) -> Result<bool, InboxError> {
        let mut events = self.inner.write().await;
        let now = Utc::now();
        let Some(event) = events.iter_mut().find(|e| e.id == id) else {
            return Ok(false);
        };
        if event.consumed_at.is_some() {
            return Ok(false);
        }
        let claimed = match event.claimed_at {
            Some(claimed_at) => {
                let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
                now.signed_duration_since(claimed_at) < ttl
            }
            None => false,
        };
        if claimed {
            return Ok(false);
        }
        event.claimed_at = Some(now);
        Ok(true)
    }

    async fn release(
        &self,
        id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> Result<(), InboxError> {
        let mut events = self.inner.write().await;
        if let Some(event) = events.iter_mut().find(|e| e.id == id) {
            event.claimed_at = None;
            event.attempts += 1;
            event.last_error = Some(error.to_string());
            event.next_attempt_at = Some(backoff_deadline(retry_after));
        }
        Ok(())
    }

    async fn mark_consumed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), InboxError> {
        let mut events = self.inner.write().await;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(InboxError::NotFound(id))?;
        if event.consumed_at.is_none() {
            event.consumed_at = Some(at);
        }
        event.claimed_at = None;
        Ok(())
    }
}

/// In-memory snapshot store, keyed by the remote document id.
#[derive(Clone, Default)]
pub struct InMemorySnapshotStore {
    inner: Arc<RwLock<HashMap<Uuid, DocumentSnapshot>>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn upsert(&self, snapshot: DocumentSnapshot) -> Result<(), SnapshotError> {
        let mut snapshots = self.inner.write().await;
        snapshots.insert(snapshot.document_id, snapshot);
        Ok(())
    }

    async fn find_by_id(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentSnapshot>, SnapshotError> {
        let snapshots = self.inner.read().await;
        Ok(snapshots.get(&document_id).cloned())
    }

    async fn count(&self) -> Result<usize, SnapshotError> {
        let snapshots = self.inner.read().await;
        Ok(snapshots.len())
    }
}
