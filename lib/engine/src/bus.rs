//! Event bus abstraction.

use async_trait::async_trait;
use flowline_core::Result;
use flowline_flow::Envelope;

/// Publishes event envelopes.
///
/// The engine publishes only after the transaction that produced the events
/// has committed.
#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish(&self, envelope: &Envelope) -> Result<()>;
}

/// Bus that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEventBus;

#[async_trait]
impl EventBus for NullEventBus {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        tracing::debug!(event_type = %envelope.event.event_type, "dropping event");
        Ok(())
    }
}
