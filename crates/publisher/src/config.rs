//! Publisher service configuration.
//!
//! Loaded once at startup and handed to the service wiring; every value has
//! a development-friendly default and an environment override.

use std::net::SocketAddr;
use std::time::Duration;

use crate::relay::OutboxRelayConfig;
use outpost_infrastructure::messaging::nats::NatsBrokerConfig;

/// Configuration for the publisher service.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Bind address for the document API
    pub http_bind: SocketAddr,
    /// Base URL the consumer uses to fetch documents back from this
    /// service; carried inside every relayed event
    pub base_url: String,
    /// PostgreSQL connection string; in-memory stores are used when unset
    pub database_url: Option<String>,
    /// Broker connection and topology
    pub broker: NatsBrokerConfig,
    /// Outbox relay tuning
    pub relay: OutboxRelayConfig,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            http_bind: "127.0.0.1:8080".parse().expect("valid bind address"),
            base_url: "http://localhost:8080".to_string(),
            database_url: None,
            broker: NatsBrokerConfig::default(),
            relay: OutboxRelayConfig::default(),
        }
    }
}

impl PublisherConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("OUTPOST_HTTP_BIND") {
            if let Ok(addr) = value.parse() {
                config.http_bind = addr;
            }
        }
        if let Ok(value) = std::env::var("OUTPOST_BASE_URL") {
            config.base_url = value;
        }
        config.database_url = std::env::var("DATABASE_URL").ok();
        if let Ok(value) = std::env::var("OUTPOST_NATS_URL") {
            config.broker.url = value;
        }
        if let Ok(value) = std::env::var("OUTPOST_POLL_INTERVAL_MS") {
            if let Ok(millis) = value.parse() {
                config.relay.poll_interval = Duration::from_millis(millis);
            }
        }

        config
    }
}
