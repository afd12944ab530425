//! NATS JetStream event bus.
//!
//! Every event is published on a subject equal to its topic. `flow.>`
//! subjects land in a work-queue stream drained by the worker's durable pull
//! consumer; `notification.>` subjects land in a limits stream kept for
//! observers.

use crate::bus::EventBus;
use crate::handler::EventHandler;
use crate::store::FlowStore;
use async_nats::jetstream;
use async_nats::jetstream::AckKind;
use async_trait::async_trait;
use flowline_core::{EngineError, Result};
use flowline_flow::Envelope;
use futures::StreamExt;
use std::sync::Arc;

/// Subjects of engine work items.
const WORK_SUBJECTS: &str = "flow.>";

/// Subjects of observer notifications.
const NOTIFICATION_SUBJECTS: &str = "notification.>";

const WORK_STREAM_NAME: &str = "FLOW_WORK";

const NOTIFICATION_STREAM_NAME: &str = "FLOW_NOTIFICATIONS";

const CONSUMER_NAME: &str = "flowline-worker";

/// Configuration for the NATS event bus.
#[derive(Debug, Clone)]
pub struct NatsConfig {
    /// NATS server URL.
    pub url: String,
    /// Work-queue stream name (defaults to FLOW_WORK).
    pub work_stream_name: Option<String>,
    /// Notification stream name (defaults to FLOW_NOTIFICATIONS).
    pub notification_stream_name: Option<String>,
    /// Durable consumer name (defaults to flowline-worker).
    pub consumer_name: Option<String>,
}

impl NatsConfig {
    /// Creates a new config with the given NATS URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            work_stream_name: None,
            notification_stream_name: None,
            consumer_name: None,
        }
    }

    fn work_stream(&self) -> &str {
        self.work_stream_name.as_deref().unwrap_or(WORK_STREAM_NAME)
    }

    fn notification_stream(&self) -> &str {
        self.notification_stream_name
            .as_deref()
            .unwrap_or(NOTIFICATION_STREAM_NAME)
    }

    fn consumer(&self) -> &str {
        self.consumer_name.as_deref().unwrap_or(CONSUMER_NAME)
    }
}

fn transient(context: &str, e: impl std::fmt::Display) -> EngineError {
    EngineError::transient(format!("{context}: {e}"))
}

/// JetStream-backed [`EventBus`].
pub struct NatsEventBus {
    jetstream: Arc<jetstream::Context>,
    config: NatsConfig,
}

impl NatsEventBus {
    /// Connects and makes sure both streams exist.
    ///
    /// # Errors
    ///
    /// Returns `Transient` if the connection or stream setup fails.
    pub async fn connect(config: NatsConfig) -> Result<Self> {
        let client = async_nats::connect(&config.url)
            .await
            .map_err(|e| transient("failed to connect to NATS", e))?;
        let jetstream = jetstream::new(client);
        Self::ensure_streams(&jetstream, &config).await?;
        Ok(Self {
            jetstream: Arc::new(jetstream),
            config,
        })
    }

    async fn ensure_streams(jetstream: &jetstream::Context, config: &NatsConfig) -> Result<()> {
        let work = jetstream::stream::Config {
            name: config.work_stream().to_string(),
            subjects: vec![WORK_SUBJECTS.to_string()],
            storage: jetstream::stream::StorageType::File,
            retention: jetstream::stream::RetentionPolicy::WorkQueue,
            ..Default::default()
        };
        jetstream
            .get_or_create_stream(work)
            .await
            .map_err(|e| transient("failed to create work stream", e))?;

        let notifications = jetstream::stream::Config {
            name: config.notification_stream().to_string(),
            subjects: vec![NOTIFICATION_SUBJECTS.to_string()],
            storage: jetstream::stream::StorageType::File,
            retention: jetstream::stream::RetentionPolicy::Limits,
            ..Default::default()
        };
        jetstream
            .get_or_create_stream(notifications)
            .await
            .map_err(|e| transient("failed to create notification stream", e))?;
        Ok(())
    }

    /// Drains the work stream until the subscription ends, handing each
    /// envelope to `handler`.
    ///
    /// Handled and rejected messages are acked. Retryable failures are
    /// nacked for redelivery; other failures are terminated.
    ///
    /// # Errors
    ///
    /// Returns `Transient` if the consumer cannot be created or the message
    /// stream fails.
    pub async fn consume<S: FlowStore>(&self, handler: EventHandler<S>) -> Result<()> {
        let stream = self
            .jetstream
            .get_stream(self.config.work_stream())
            .await
            .map_err(|e| transient("failed to get work stream", e))?;
        let consumer = stream
            .get_or_create_consumer(
                self.config.consumer(),
                jetstream::consumer::pull::Config {
                    durable_name: Some(self.config.consumer().to_string()),
                    filter_subject: WORK_SUBJECTS.to_string(),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| transient("failed to create consumer", e))?;
        let mut messages = consumer
            .messages()
            .await
            .map_err(|e| transient("failed to get messages", e))?;

        tracing::info!(consumer = self.config.consumer(), "consuming flow events");
        while let Some(message) = messages.next().await {
            let message = message.map_err(|e| transient("failed to receive message", e))?;
            let ack = match Envelope::from_json_bytes(&message.payload) {
                Err(e) => {
                    tracing::warn!(error = %e, subject = %message.subject, "dropping malformed envelope");
                    AckKind::Term
                }
                Ok(envelope) => match handler.handle(&envelope).await {
                    Ok(_) => AckKind::Ack,
                    Err(e) if e.current_context().is_retryable() => {
                        tracing::warn!(error = %e, subject = %message.subject, "event failed, redelivering");
                        AckKind::Nak(None)
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, subject = %message.subject, "event failed permanently");
                        AckKind::Term
                    }
                },
            };
            if let Err(e) = message.ack_with(ack).await {
                tracing::warn!(error = %e, "failed to acknowledge message");
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EventBus for NatsEventBus {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        let bytes = envelope
            .to_json_bytes()
            .map_err(|e| transient("failed to serialize event", e))?;
        self.jetstream
            .publish(envelope.event.event_type.clone(), bytes.into())
            .await
            .map_err(|e| transient("failed to publish event", e))?
            .await
            .map_err(|e| transient("event was not acknowledged", e))?;
        Ok(())
    }
}
