//! PostgreSQL consumer-side inbox store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::postgres::PgPool;
use std::time::Duration;
use uuid::Uuid;

use outpost_domain::inbox::{InboxError, InboxEvent, InboxStore};

#[derive(FromRow)]
struct InboxEventRow {
    id: Uuid,
    document_uri: String,
    created_at: DateTime<Utc>,
    consumed_at: Option<DateTime<Utc>>,
    claimed_at: Option<DateTime<Utc>>,
    attempts: i32,
    next_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl From<InboxEventRow> for InboxEvent {
    fn from(row: InboxEventRow) -> Self {
        InboxEvent {
            id: row.id,
            document_uri: row.document_uri,
            created_at: row.created_at,
            consumed_at: row.consumed_at,
            claimed_at: row.claimed_at,
            attempts: row.attempts,
            next_attempt_at: row.next_attempt_at,
            last_error: row.last_error,
        }
    }
}

const SELECT_EVENT_COLUMNS: &str = "id, document_uri, created_at, consumed_at, claimed_at, \
                                    attempts, next_attempt_at, last_error";

/// PostgreSQL implementation of [`InboxStore`].
pub struct PostgresInboxStore {
    pool: PgPool,
}

impl PostgresInboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the inbox table if it does not exist yet.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS inbox_events (
                id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
                document_uri TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                consumed_at TIMESTAMPTZ,
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
            CREATE INDEX IF NOT EXISTS idx_inbox_pending
            ON inbox_events(created_at)
            WHERE consumed_at IS NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl InboxStore for PostgresInboxStore {
    async fn insert(
        &self,
        document_uri: &str,
        created_at: DateTime<Utc>,
    ) -> Result<InboxEvent, InboxError> {
        let row: InboxEventRow = sqlx::query_as(&format!(
            "INSERT INTO inbox_events (document_uri, created_at) VALUES ($1, $2) \
             RETURNING {SELECT_EVENT_COLUMNS}"
        ))
        .bind(document_uri)
        .bind(created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into())
    }

    async fn find_unconsumed(&self, limit: usize) -> Result<Vec<InboxEvent>, InboxError> {
        let rows: Vec<InboxEventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {SELECT_EVENT_COLUMNS}
            FROM inbox_events
            WHERE consumed_at IS NULL
              AND (next_attempt_at IS NULL OR next_attempt_at <= NOW())
            ORDER BY created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(InboxEvent::from).collect())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<InboxEvent>, InboxError> {
        let row: Option<InboxEventRow> = sqlx::query_as(&format!(
            "SELECT {SELECT_EVENT_COLUMNS} FROM inbox_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(InboxEvent::from))
    }

    async fn claim(&self, id: Uuid, ttl: Duration) -> Result<bool, InboxError> {
        let result = sqlx::query(
            r#"
            UPDATE inbox_events
            SET claimed_at = NOW()
            WHERE id = $1
              AND consumed_at IS NULL
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
    ) -> Result<(), InboxError> {
        sqlx::query(
            r#"
            UPDATE inbox_events
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

    async fn mark_consumed(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), InboxError> {
        let result = sqlx::query(
            r#"
            UPDATE inbox_events
            SET consumed_at = COALESCE(consumed_at, $2),
                claimed_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InboxError::NotFound(id));
        }
        Ok(())
    }
}
