//! PostgreSQL snapshot store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::postgres::PgPool;
use uuid::Uuid;

use outpost_domain::document::{DocumentSnapshot, SnapshotError, SnapshotStore};

#[derive(FromRow)]
struct SnapshotRow {
    document_id: Uuid,
    content: String,
    fetched_at: DateTime<Utc>,
}

impl From<SnapshotRow> for DocumentSnapshot {
    fn from(row: SnapshotRow) -> Self {
        DocumentSnapshot {
            document_id: row.document_id,
            content: row.content,
            fetched_at: row.fetched_at,
        }
    }
}

/// PostgreSQL implementation of [`SnapshotStore`].
///
/// The primary key is the remote document's id, so repeated hydrations of
/// the same document collapse into one row via `ON CONFLICT`.
pub struct PostgresSnapshotStore {
    pool: PgPool,
}

impl PostgresSnapshotStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the snapshots table if it does not exist yet.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS document_snapshots (
                document_id UUID PRIMARY KEY,
                content TEXT NOT NULL,
                fetched_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for PostgresSnapshotStore {
    async fn upsert(&self, snapshot: DocumentSnapshot) -> Result<(), SnapshotError> {
        sqlx::query(
            r#"
            INSERT INTO document_snapshots (document_id, content, fetched_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (document_id)
            DO UPDATE SET content = EXCLUDED.content, fetched_at = EXCLUDED.fetched_at
            "#,
        )
        .bind(snapshot.document_id)
        .bind(&snapshot.content)
        .bind(snapshot.fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_by_id(
        &self,
        document_id: Uuid,
    ) -> Result<Option<DocumentSnapshot>, SnapshotError> {
        let row: Option<SnapshotRow> = sqlx::query_as(
            "SELECT document_id, content, fetched_at FROM document_snapshots WHERE document_id = $1",
        )
        .bind(document_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(DocumentSnapshot::from))
    }

    async fn count(&self) -> Result<usize, SnapshotError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM document_snapshots")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_upsert_collapses_by_document_id() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PostgresSnapshotStore::new(PgPool::connect(&url).await.unwrap());
        store.run_migrations().await.unwrap();

        let id = Uuid::new_v4();
        for content in ["v1", "v2"] {
            store
                .upsert(DocumentSnapshot {
                    document_id: id,
                    content: content.to_string(),
                    fetched_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let stored = store.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.content, "v2");
    }
}
