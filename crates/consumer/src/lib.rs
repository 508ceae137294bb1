// Outpost - Consumer Service
// Records inbound event notifications durably, one row per delivery, and
// hydrates each recorded event later by fetching the referenced document
// and caching it locally.

pub mod config;
pub mod handler;
pub mod hydrator;
pub mod service;

pub use config::ConsumerConfig;
pub use handler::DocumentEventHandler;
pub use hydrator::{HydrationPoller, HydrationPollerConfig};
