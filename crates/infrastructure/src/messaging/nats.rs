//! NATS JetStream broker adapter.
//!
//! The publish side hands messages to JetStream and awaits the server ack
//! in a detached task, surfacing the outcome as a [`PublishConfirm`] on the
//! confirm channel; the publish call itself only fails when the message
//! could not be handed over at all. The consume side runs a durable pull
//! consumer and translates each handler [`Disposition`] into the wire-level
//! ack: `Term` for a reject without requeue, `Nak` for a requeue.

use async_nats::jetstream::consumer::PullConsumer;
use async_nats::jetstream::stream::Config as StreamConfig;
use async_nats::jetstream::{AckKind, Context as JetStreamContext};
use async_nats::ConnectOptions;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use outpost_domain::broker::{
    BrokerError, Disposition, EventPublisher, MessageHandler, PublishConfirm,
};
use outpost_domain::message::DocumentEventMessage;

/// NATS connection and topology configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatsBrokerConfig {
    /// NATS server URL
    #[serde(default = "default_url")]
    pub url: String,
    /// JetStream stream name
    #[serde(default = "default_stream")]
    pub stream: String,
    /// Subject the event notifications are published to
    #[serde(default = "default_subject")]
    pub subject: String,
    /// Durable consumer name (consumer side)
    #[serde(default = "default_consumer")]
    pub consumer_name: String,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connection_timeout_secs: u64,
    /// Client connection name
    #[serde(default)]
    pub name: Option<String>,
}

impl Default for NatsBrokerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            stream: default_stream(),
            subject: default_subject(),
            consumer_name: default_consumer(),
            connection_timeout_secs: default_connect_timeout(),
            name: None,
        }
    }
}

fn default_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_stream() -> String {
    "OUTPOST".to_string()
}

fn default_subject() -> String {
    "outpost.documents.events".to_string()
}

fn default_consumer() -> String {
    "outpost-consumer".to_string()
}

const fn default_connect_timeout() -> u64 {
    5
}

async fn connect(config: &NatsBrokerConfig) -> Result<JetStreamContext, BrokerError> {
    let mut connect_options = ConnectOptions::default()
        .connection_timeout(Duration::from_secs(config.connection_timeout_secs));

    if let Some(name) = &config.name {
        connect_options = connect_options.name(name);
    }

    let client = async_nats::connect_with_options(config.url.as_str(), connect_options)
        .await
        .map_err(|e| BrokerError::Connection(e.to_string()))?;

    Ok(async_nats::jetstream::new(client))
}

async fn ensure_stream(
    jetstream: &JetStreamContext,
    config: &NatsBrokerConfig,
) -> Result<async_nats::jetstream::stream::Stream, BrokerError> {
    jetstream
        .get_or_create_stream(StreamConfig {
            name: config.stream.clone(),
            subjects: vec![config.subject.clone()],
            ..Default::default()
        })
        .await
        .map_err(|e| BrokerError::Connection(e.to_string()))
}

/// JetStream-backed [`EventPublisher`].
pub struct NatsEventBroker {
    jetstream: JetStreamContext,
    config: NatsBrokerConfig,
    confirm_tx: mpsc::UnboundedSender<PublishConfirm>,
}

impl NatsEventBroker {
    /// Connect to NATS and make sure the stream exists.
    ///
    /// Delivery outcomes are reported on `confirm_tx`, correlated through
    /// the token each publish was given.
    pub async fn connect(
        config: NatsBrokerConfig,
        confirm_tx: mpsc::UnboundedSender<PublishConfirm>,
    ) -> Result<Self, BrokerError> {
        let jetstream = connect(&config).await?;
        ensure_stream(&jetstream, &config).await?;
        info!(stream = %config.stream, subject = %config.subject, "Connected to NATS");
        Ok(Self {
            jetstream,
            config,
            confirm_tx,
        })
    }
}

#[async_trait::async_trait]
impl EventPublisher for NatsEventBroker {
    async fn publish(
        &self,
        message: &DocumentEventMessage,
        correlation: &str,
    ) -> Result<(), BrokerError> {
        let payload = serde_json::to_vec(message)?;

        // Handing the message to the server can fail synchronously; the
        // stored-ack arrives later and is reported on the confirm channel.
        let ack_future = self
            .jetstream
            .publish(self.config.subject.clone(), payload.into())
            .await
            .map_err(|e| BrokerError::Unavailable(e.to_string()))?;

        let correlation = correlation.to_string();
        let confirm_tx = self.confirm_tx.clone();
        tokio::spawn(async move {
            let confirm = match ack_future.await {
                Ok(ack) => {
                    debug!(
                        correlation = %correlation,
                        sequence = ack.sequence,
                        "Broker accepted event"
                    );
                    PublishConfirm::accepted(correlation)
                }
                Err(e) => PublishConfirm::rejected(correlation, e.to_string()),
            };
            if confirm_tx.send(confirm).is_err() {
                warn!("Confirm channel closed, dropping publish confirm");
            }
        });

        Ok(())
    }
}

/// Durable pull-consumer loop feeding inbound messages to a handler.
pub struct NatsEventListener {
    consumer: PullConsumer,
}

impl NatsEventListener {
    /// Connect to NATS and create (or re-attach to) the durable consumer.
    pub async fn connect(config: &NatsBrokerConfig) -> Result<Self, BrokerError> {
        let jetstream = connect(config).await?;
        let stream = ensure_stream(&jetstream, config).await?;

        let consumer = stream
            .get_or_create_consumer(
                &config.consumer_name,
                async_nats::jetstream::consumer::pull::Config {
                    durable_name: Some(config.consumer_name.clone()),
                    filter_subject: config.subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        info!(consumer = %config.consumer_name, "NATS listener attached");
        Ok(Self { consumer })
    }

    /// Run the listener until the shutdown signal fires.
    ///
    /// Acknowledgment is always manual: the handler's [`Disposition`]
    /// decides between ack, terminal nack (no redelivery) and requeue.
    pub async fn run(
        self,
        handler: Arc<dyn MessageHandler>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), BrokerError> {
        let mut messages = self
            .consumer
            .messages()
            .await
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("NATS listener shutting down");
                    return Ok(());
                }
                next = messages.next() => {
                    let Some(result) = next else {
                        warn!("NATS message stream ended");
                        return Ok(());
                    };
                    match result {
                        Ok(message) => {
                            let ack = match handler.handle(&message.payload).await {
                                Disposition::Acknowledge => message.ack().await,
                                Disposition::Reject { requeue: false } => {
                                    message.ack_with(AckKind::Term).await
                                }
                                Disposition::Reject { requeue: true } => {
                                    message.ack_with(AckKind::Nak(None)).await
                                }
                            };
                            if let Err(ack_err) = ack {
                                warn!("Failed to settle message: {}", ack_err);
                            }
                        }
                        Err(e) => {
                            error!("Error receiving message: {}", e);
                        }
                    }
                }
            }
        }
    }
}
