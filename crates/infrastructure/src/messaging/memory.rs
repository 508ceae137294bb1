//! In-memory broker fake.
//!
//! Test double for the broker boundary: records every published message and
//! reports a scriptable delivery outcome on the confirm channel, so relay
//! and confirm-tracker behavior can be exercised without a broker process.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

use outpost_domain::broker::{BrokerError, EventPublisher, PublishConfirm};
use outpost_domain::message::DocumentEventMessage;

/// What the fake broker reports after accepting a publish call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmBehavior {
    /// Confirm every publish as accepted
    Accept,
    /// Confirm every publish as rejected
    Reject,
    /// Never send a confirm (simulates a lost confirmation)
    Silent,
}

/// In-memory [`EventPublisher`] with scriptable behavior.
pub struct InMemoryBroker {
    confirm_tx: mpsc::UnboundedSender<PublishConfirm>,
    behavior: Mutex<ConfirmBehavior>,
    fail_publishes: AtomicBool,
    omit_correlation: AtomicBool,
    published: Mutex<Vec<(String, DocumentEventMessage)>>,
}

impl InMemoryBroker {
    pub fn new(confirm_tx: mpsc::UnboundedSender<PublishConfirm>) -> Self {
        Self {
            confirm_tx,
            behavior: Mutex::new(ConfirmBehavior::Accept),
            fail_publishes: AtomicBool::new(false),
            omit_correlation: AtomicBool::new(false),
            published: Mutex::new(Vec::new()),
        }
    }

    pub fn set_behavior(&self, behavior: ConfirmBehavior) {
        *self.behavior.lock().unwrap() = behavior;
    }

    /// Make every publish call fail synchronously, as a broker connection
    /// failure would.
    pub fn set_fail_publishes(&self, fail: bool) {
        self.fail_publishes.store(fail, Ordering::SeqCst);
    }

    /// Strip the correlation token from confirms, to exercise the fatal
    /// protocol-violation path of the confirm tracker.
    pub fn set_omit_correlation(&self, omit: bool) {
        self.omit_correlation.store(omit, Ordering::SeqCst);
    }

    /// Messages the broker has accepted, in publish order.
    pub fn published(&self) -> Vec<(String, DocumentEventMessage)> {
        self.published.lock().unwrap().clone()
    }

    /// Serialized payloads in publish order, as a consumer would see them
    /// delivered.
    pub fn deliveries(&self) -> Vec<Vec<u8>> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.to_bytes().expect("message serializes"))
            .collect()
    }
}

#[async_trait::async_trait]
impl EventPublisher for InMemoryBroker {
    async fn publish(
        &self,
        message: &DocumentEventMessage,
        correlation: &str,
    ) -> Result<(), BrokerError> {
        if self.fail_publishes.load(Ordering::SeqCst) {
            return Err(BrokerError::Unavailable("connection refused".to_string()));
        }

        self.published
            .lock()
            .unwrap()
            .push((correlation.to_string(), message.clone()));

        let confirm = match *self.behavior.lock().unwrap() {
            ConfirmBehavior::Accept => PublishConfirm::accepted(correlation),
            ConfirmBehavior::Reject => PublishConfirm::rejected(correlation, "rejected by broker"),
            ConfirmBehavior::Silent => return Ok(()),
        };

        let confirm = if self.omit_correlation.load(Ordering::SeqCst) {
            PublishConfirm {
                correlation: None,
                ..confirm
            }
        } else {
            confirm
        };

        // The channel outliving the test is the caller's concern.
        let _ = self.confirm_tx.send(confirm);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn message() -> DocumentEventMessage {
        DocumentEventMessage::new("http://localhost:8080", Uuid::new_v4(), Utc::now())
    }

    #[tokio::test]
    async fn test_accept_behavior_sends_confirm() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = InMemoryBroker::new(tx);

        broker.publish(&message(), "corr-1").await.unwrap();

        let confirm = rx.try_recv().unwrap();
        assert_eq!(confirm.correlation.as_deref(), Some("corr-1"));
        assert!(confirm.accepted);
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn test_silent_behavior_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = InMemoryBroker::new(tx);
        broker.set_behavior(ConfirmBehavior::Silent);

        broker.publish(&message(), "corr-1").await.unwrap();

        assert!(rx.try_recv().is_err());
        assert_eq!(broker.published().len(), 1);
    }

    #[tokio::test]
    async fn test_failing_broker_records_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let broker = InMemoryBroker::new(tx);
        broker.set_fail_publishes(true);

        let result = broker.publish(&message(), "corr-1").await;
        assert!(matches!(result, Err(BrokerError::Unavailable(_))));
        assert!(broker.published().is_empty());
        assert!(rx.try_recv().is_err());
    }
}
