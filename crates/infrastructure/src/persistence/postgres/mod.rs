//! PostgreSQL store implementations (sqlx).
//!
//! Runtime-checked queries only, so the workspace builds without a live
//! database. Each repository carries its own `run_migrations` helper.

mod inbox;
mod publisher;
mod snapshots;

pub use inbox::PostgresInboxStore;
pub use publisher::PostgresPublisherStore;
pub use snapshots::PostgresSnapshotStore;
