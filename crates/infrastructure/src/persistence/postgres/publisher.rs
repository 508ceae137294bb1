//! PostgreSQL publisher-side store: documents plus outbox events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::postgres::PgPool;
use std::time::Duration;
use uuid::Uuid;

use outpost_domain::document::{Document, DocumentError, DocumentStore};
use outpost_domain::outbox::{OutboxError, OutboxEvent, OutboxStore};

#[derive(FromRow)]
struct DocumentRow {
    id: Uuid,
    content: String,
}

impl From<DocumentRow> for Document {
    fn from(row: DocumentRow) -> Self {
        Document {
            id: row.id,
            content: row.content,
        }
    }
}

#[derive(FromRow)]
struct OutboxEventRow {
    id: Uuid,
    document_id: Uuid,
    created_at: DateTime<Utc>,
    published_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
    attempts: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl From<OutboxEventRow> for OutboxEvent {
    fn from(row: OutboxEventRow) -> Self {
        OutboxEvent {
            id: row.id,
            document_id: row.document_id,
            created_at: row.created_at,
            published_at: row.published_at,
            claimed_at: row.claimed_at,
            attempts: row.attempts,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
        }
    }
}

const SELECT_EVENT_COLUMNS: &str = "id, document_id, created_at, published_at, claimed_at, \
                                    attempts, next_attempt_at, last_error";

/// PostgreSQL implementation of [`DocumentStore`] and [`OutboxStore`].
///
/// `create` inserts the document and its outbox event in one transaction,
/// which is the whole point of the outbox pattern: either both rows commit
/// or neither does.
pub struct PostgresPublisherStore {
    pool: PgPool,
}

impl PostgresPublisherStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the documents and outbox tables if they do not exist yet.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id UUID PRIMARY KEY,
                content TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS outbox_events (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                document_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                published_at TIMESTAMPTZ,
                claimed_at TIMESTAMPTZ,
                attempts INTEGER NOT NULL DEFAULT 0,
                next_attempt_at TIMESTAMPTZ,
                last_error TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_outbox_pending
            ON outbox_events(created_at)
            WHERE published_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DocumentStore for PostgresPublisherStore {
    async fn create(&self, content: String) -> Result<(Document, OutboxEvent), DocumentError> {
        let mut tx = self.pool.begin().await?;

        let document = Document {
            id: Uuid::new_v4(),
            content,
        };
        sqlx::query("INSERT INTO documents (id, content) VALUES ($1, $2)")
            .bind(document.id)
            .bind(&document.content)
            .execute(&mut *tx)
            .await?;

        let event: OutboxEventRow = sqlx::query_as(&format!(
            "INSERT INTO outbox_events (document_id) VALUES ($1) RETURNING {SELECT_EVENT_COLUMNS}"
        ))
        .bind(document.id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((document, event.into()))
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>, DocumentError> {
        let row: Option<DocumentRow> =
            sqlx::query_as("SELECT id, content FROM documents WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(Document::from))
    }

    async fn list(&self) -> Result<Vec<Document>, DocumentError> {
        let rows: Vec<DocumentRow> = sqlx::query_as("SELECT id, content FROM documents")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(Document::from).collect())
    }
}

#[async_trait]
impl OutboxStore for PostgresPublisherStore {
    async fn insert(&self, document_id: Uuid) -> Result<OutboxEvent, OutboxError> {
        let row: OutboxEventRow = sqlx::query_as(&format!(
            "INSERT INTO outbox_events (document_id) VALUES ($1) RETURNING {SELECT_EVENT_COLUMNS}"
        ))
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn find_unpublished(&self, limit: usize) -> Result<Vec<OutboxEvent>, OutboxError> {
        let rows: Vec<OutboxEventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_EVENT_COLUMNS}
            FROM outbox_events
            WHERE published_at IS NULL
              AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
            ORDER BY created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<OutboxEvent>, OutboxError> {
        let row: Option<OutboxEventRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_EVENT_COLUMNS} FROM outbox_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(OutboxEvent::from))
    }

    async fn find_by_document(&self, document_id: Uuid) -> Result<Vec<OutboxEvent>, OutboxError> {
        let rows: Vec<OutboxEventRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_EVENT_COLUMNS} FROM outbox_events WHERE document_id = $1"
        ))
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(OutboxEvent::from).collect())
    }

    async fn claim(&self, id: Uuid, ttl: Duration) -> Result<bool, OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET claimed_at = NOW()
            WHERE id = $1
              AND published_at IS NULL
              AND (claimed_at IS NULL OR claimed_at < NOW() - ($2 * INTERVAL '1 second'))
            "#,
        )
        .bind(id)
        .bind(ttl.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release(
        &self,
        id: Uuid,
        error: &str,
        retry_after: Duration,
    ) -> Result<(), OutboxError> {
        sqlx::query(
            r#"
            UPDATE outbox_events
            SET claimed_at = NULL,
                attempts = attempts + 1,
                last_error = $2,
                next_attempt_at = NOW() + ($3 * INTERVAL '1 second')
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(error)
        .bind(retry_after.as_secs_f64())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_published(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), OutboxError> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET published_at = COALESCE(published_at, $2),
                claimed_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn pool() -> PgPool {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PgPool::connect(&url).await.expect("connect to postgres")
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_create_and_relay_cycle() {
        let store = PostgresPublisherStore::new(pool().await);
        store.run_migrations().await.unwrap();

        let (document, event) = store.create("pg-content".to_string()).await.unwrap();
        assert_eq!(event.document_id, document.id);
        assert!(event.published_at.is_none());

        assert!(store.claim(event.id, Duration::from_secs(30)).await.unwrap());
        assert!(!store.claim(event.id, Duration::from_secs(30)).await.unwrap());

        store.mark_published(event.id, Utc::now()).await.unwrap();
        let stored = OutboxStore::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.published_at.is_some());
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_release_schedules_retry() {
        let store = PostgresPublisherStore::new(pool().await);
        store.run_migrations().await.unwrap();

        let event = OutboxStore::insert(&store, Uuid::new_v4()).await.unwrap();
        assert!(store.claim(event.id, Duration::from_secs(30)).await.unwrap());
        store
            .release(event.id, "broker down", Duration::from_secs(3600))
            .await
            .unwrap();

        let stored = OutboxStore::find_by_id(&store, event.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.attempts, 1);
        assert!(stored.next_attempt_at.is_some());
    }
}
