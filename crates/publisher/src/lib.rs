// Outpost - Publisher Service
// Persists documents together with their outbox events, relays unpublished
// events to the broker on a schedule, and records broker acceptance from
// asynchronous delivery confirms.

pub mod api;
pub mod config;
pub mod confirm;
pub mod relay;
pub mod service;

pub use config::PublisherConfig;
pub use confirm::{ConfirmError, ConfirmTracker};
pub use relay::{OutboxRelay, OutboxRelayConfig};
