pub mod memory;
pub mod nats;

pub use memory::{ConfirmBehavior, InMemoryBroker};
pub use nats::{NatsBrokerConfig, NatsEventBroker, NatsEventListener};
