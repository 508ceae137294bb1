pub mod memory;
pub mod postgres;

pub use memory::{InMemoryInboxStore, InMemoryPublisherStore, InMemorySnapshotStore};
pub use postgres::{PostgresInboxStore, PostgresPublisherStore, PostgresSnapshotStore};
