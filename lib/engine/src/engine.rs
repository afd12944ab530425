//! The engine handle shared by every operation.

use crate::bus::EventBus;
use crate::clock::Clock;
use crate::directory::Directory;
use crate::notify::Notifier;
use crate::store::FlowStore;
use chrono::{DateTime, Utc};
use flowline_core::{EngineError, OperationContext, Result};
use flowline_flow::{Envelope, FlowEvent};
use flowline_scheduler::SlotAllocator;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Deadline applied to every operation.
    pub operation_timeout: Duration,
    /// `appSource` stamped on published envelopes.
    pub app_source: String,
    /// Maximum executions processed per tenant per sweep.
    pub sweep_batch_size: usize,
    /// Notification workflow used for goal-achieved notices.
    pub goal_notification_workflow: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operation_timeout: Duration::from_secs(30 * 60),
            app_source: "flowline-worker".to_string(),
            sweep_batch_size: 100,
            goal_notification_workflow: "flow-goal-achieved".to_string(),
        }
    }
}

/// The flow execution engine.
///
/// Operations are spread over several modules as `impl` blocks on this type:
/// flow lifecycle, requirements, scheduling, processing, goals, periodic
/// workers and event handling.
pub struct Engine<S: FlowStore> {
    pub(crate) store: S,
    pub(crate) directory: Arc<dyn Directory>,
    pub(crate) bus: Arc<dyn EventBus>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) slots: SlotAllocator,
    pub(crate) config: EngineConfig,
}

impl<S: FlowStore> Engine<S> {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        store: S,
        directory: Arc<dyn Directory>,
        bus: Arc<dyn EventBus>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        slots: SlotAllocator,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            directory,
            bus,
            notifier,
            clock,
            slots,
            config,
        }
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub(crate) fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Runs `operation` under the configured deadline.
    ///
    /// A timed-out operation is dropped, which rolls back its open
    /// transaction, and is reported as `Transient`.
    pub(crate) async fn with_deadline<T>(
        &self,
        name: &'static str,
        operation: impl Future<Output = Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.config.operation_timeout, operation).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::transient(format!(
                "{name} exceeded its deadline of {:?}",
                self.config.operation_timeout
            ))
            .into()),
        }
    }

    /// Publishes events produced by a committed transaction.
    ///
    /// Publication failures are logged and do not fail the operation.
    pub(crate) async fn publish_all(&self, ctx: &OperationContext, events: Vec<FlowEvent>) {
        for event in events {
            let envelope = match Envelope::wrap(ctx, &event, &self.config.app_source, self.now()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(error = %e, topic = event.topic(), "failed to encode event");
                    continue;
                }
            };
            if let Err(e) = self.bus.publish(&envelope).await {
                tracing::warn!(
                    error = %e,
                    topic = event.topic(),
                    tenant = %ctx.tenant,
                    "failed to publish event"
                );
            }
        }
    }
}
