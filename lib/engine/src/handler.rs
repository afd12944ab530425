//! Dispatch of bus events to engine operations.

use crate::engine::Engine;
use crate::store::FlowStore;
use flowline_core::Result;
use flowline_flow::{Envelope, FlowEvent};
use std::sync::Arc;
use tracing::instrument;

/// What the handler did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handled {
    Dispatched,
    /// Observer-only events the engine does not act on.
    Ignored,
    /// Undecodable or unknown-version envelopes, acknowledged and dropped.
    Rejected,
}

/// Routes `flow.*` events to the engine.
pub struct EventHandler<S: FlowStore> {
    engine: Arc<Engine<S>>,
}

impl<S: FlowStore> Clone for EventHandler<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
        }
    }
}

impl<S: FlowStore> EventHandler<S> {
    #[must_use]
    pub fn new(engine: Arc<Engine<S>>) -> Self {
        Self { engine }
    }

    /// Handles one envelope within the trace it carries.
    ///
    /// # Errors
    ///
    /// Returns the engine error of the dispatched operation; the caller
    /// decides whether to redeliver based on `is_retryable`.
    #[instrument(skip(self, envelope), fields(event_type = %envelope.event.event_type, event_id = %envelope.event.id))]
    pub async fn handle(&self, envelope: &Envelope) -> Result<Handled> {
        if !envelope.is_current_version() {
            tracing::warn!(version = envelope.version, "dropping envelope with unknown version");
            return Ok(Handled::Rejected);
        }
        let event = match envelope.decode() {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(error = %e, "dropping undecodable event");
                return Ok(Handled::Rejected);
            }
        };
        let ctx = envelope.context();

        match event {
            FlowEvent::ComputeParticipantRequirements { flow_id } => {
                self.engine
                    .recompute_participant_requirements(&ctx, flow_id)
                    .await?;
            }
            FlowEvent::ScheduleFlow { flow_id } => {
                self.engine.schedule_flow(&ctx, flow_id).await?;
            }
            FlowEvent::ScheduleParticipant { participant_id } => {
                self.engine.schedule_participant(&ctx, participant_id).await?;
            }
            FlowEvent::GoalAchieved { flow_id, entity } => {
                self.engine.goal_achieved(&ctx, flow_id, &entity).await?;
            }
            FlowEvent::EventCompleted { .. } => return Ok(Handled::Ignored),
        }
        Ok(Handled::Dispatched)
    }
}
