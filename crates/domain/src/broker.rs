//! Ports towards the message broker.
//!
//! Publishing and confirmation are decoupled: `publish` only hands the
//! message to the broker, and the broker's accept/reject signal arrives
//! later as a [`PublishConfirm`], correlated back to the outbox row through
//! an opaque token. Inbound handling returns a [`Disposition`] which the
//! broker integration layer translates into the wire-level ack or nack.

use crate::message::DocumentEventMessage;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection error: {0}")]
    Connection(String),
}

/// Asynchronous delivery outcome reported by the broker.
///
/// `correlation` echoes the token passed to `publish`; a confirm without
/// one is a protocol violation, not a transient fault. No distinction is
/// made between "rejected" and "timed out without confirmation"; both
/// leave the outbox row eligible for redelivery.
#[derive(Debug, Clone)]
pub struct PublishConfirm {
    pub correlation: Option<String>,
    pub accepted: bool,
    pub cause: Option<String>,
}

impl PublishConfirm {
    pub fn accepted(correlation: impl Into<String>) -> Self {
        Self {
            correlation: Some(correlation.into()),
            accepted: true,
            cause: None,
        }
    }

    pub fn rejected(correlation: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            correlation: Some(correlation.into()),
            accepted: false,
            cause: Some(cause.into()),
        }
    }
}

/// Outcome of handling one inbound message.
///
/// Acknowledgment is always explicit; the broker layer maps `Acknowledge`
/// to an ack and `Reject` to a nack, requeueing only when asked to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acknowledge,
    Reject { requeue: bool },
}

/// Publish side of the broker boundary.
///
/// A returned error means the publish call itself failed (for example a
/// connection failure) and the caller should retry later; `Ok` only means
/// the broker took the message in, with the real accept/reject decision
/// delivered out-of-band as a [`PublishConfirm`].
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        message: &DocumentEventMessage,
        correlation: &str,
    ) -> Result<(), BrokerError>;
}

/// Consume side of the broker boundary: one call per inbound message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, payload: &[u8]) -> Disposition;
}
