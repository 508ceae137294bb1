// Outpost - Domain Layer
// Models and ports for the event relay pipeline:
// - outbox: publisher-side event records and their store
// - inbox: consumer-side event records and their store
// - document: the business entity, its cached snapshot and the fetch boundary
// - broker: publish/confirm/handle boundary towards the message broker
// - message: the wire payload exchanged between the two services

pub mod broker;
pub mod document;
pub mod inbox;
pub mod message;
pub mod outbox;

pub use broker::{BrokerError, Disposition, EventPublisher, MessageHandler, PublishConfirm};
pub use document::{
    Document, DocumentError, DocumentFetcher, DocumentSnapshot, DocumentStore, FetchError,
    SnapshotError, SnapshotStore,
};
pub use inbox::{InboxError, InboxEvent, InboxStore};
pub use message::DocumentEventMessage;
pub use outbox::{OutboxError, OutboxEvent, OutboxStore};
