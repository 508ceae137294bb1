//! Consumer service configuration.

use std::time::Duration;

use crate::hydrator::HydrationPollerConfig;
use outpost_infrastructure::messaging::nats::NatsBrokerConfig;

/// Configuration for the consumer service.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// PostgreSQL connection string; in-memory stores are used when unset
    pub database_url: Option<String>,
    /// Broker connection and topology
    pub broker: NatsBrokerConfig,
    /// Hydration poller tuning
    pub hydration: HydrationPollerConfig,
    /// Timeout for each document fetch
    pub fetch_timeout: Duration,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            broker: NatsBrokerConfig::default(),
            hydration: HydrationPollerConfig::default(),
            fetch_timeout: Duration::from_secs(10),
        }
    }
}

impl ConsumerConfig {
    /// Load configuration from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        config.database_url = std::env::var("DATABASE_URL").ok();
        if let Ok(value) = std::env::var("OUTPOST_NATS_URL") {
            config.broker.url = value;
        }
        if let Ok(value) = std::env::var("OUTPOST_POLL_INTERVAL_MS") {
            if let Ok(millis) = value.parse() {
                config.hydration.poll_interval = Duration::from_millis(millis);
            }
        }
        if let Ok(value) = std::env::var("OUTPOST_FETCH_TIMEOUT_SECS") {
            if let Ok(secs) = value.parse() {
                config.fetch_timeout = Duration::from_secs(secs);
            }
        }

        config
    }
}
