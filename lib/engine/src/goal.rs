//! The goal-achieved signal.

use crate::engine::Engine;
use crate::notify::Recipient;
use crate::schedule::{load_flow, set_status};
use crate::store::{FlowRepository, FlowStore, Transaction};
use flowline_core::{EngineError, EntityRef, FlowId, OperationContext, Result};
use flowline_flow::{FlowParticipant, ParticipantStatus};
use serde_json::json;
use tracing::instrument;

impl<S: FlowStore> Engine<S> {
    /// Marks a participant GOAL_ACHIEVED and notifies the user whose
    /// mailbox it is bound to.
    ///
    /// Repeating the signal is a no-op. Notification failures are logged.
    ///
    /// # Errors
    ///
    /// Returns `FlowNotFound` or `ParticipantMissing`.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn goal_achieved(
        &self,
        ctx: &OperationContext,
        flow_id: FlowId,
        entity: &EntityRef,
    ) -> Result<FlowParticipant> {
        self.with_deadline("goal_achieved", async {
            let mut tx = self.store.begin(&ctx.tenant).await?;
            let flow = load_flow(&mut tx, flow_id).await?;
            tx.lock_participant(flow_id, entity).await?;
            let mut participant = tx.get_participant(flow_id, entity).await?.ok_or_else(|| {
                EngineError::ParticipantMissing {
                    details: format!("{entity} in flow {flow_id}"),
                }
            })?;
            if participant.status == ParticipantStatus::GoalAchieved {
                return Ok(participant);
            }

            let mut events = Vec::new();
            set_status(
                &mut tx,
                &mut participant,
                ParticipantStatus::GoalAchieved,
                self.now(),
                &mut events,
            )
            .await?;
            let owner = tx
                .get_execution_settings(flow_id, entity)
                .await?
                .and_then(|s| s.user_id);
            tx.commit().await?;
            self.publish_all(ctx, events).await;
            tracing::info!(%flow_id, %entity, "goal achieved");

            let Some(user_id) = owner else {
                tracing::warn!(%flow_id, %entity, "no bound sender to notify of goal");
                return Ok(participant);
            };
            let user = match self.directory.user_profile(&ctx.tenant, user_id).await {
                Ok(Some(user)) => user,
                Ok(None) => {
                    tracing::warn!(%user_id, "goal notification recipient not found");
                    return Ok(participant);
                }
                Err(e) => {
                    tracing::warn!(error = %e, %user_id, "failed to look up goal notification recipient");
                    return Ok(participant);
                }
            };
            let Some(email) = user.emails.first().cloned() else {
                tracing::warn!(%user_id, "goal notification recipient has no email");
                return Ok(participant);
            };

            let recipient = Recipient {
                email,
                first_name: user.first_name.clone().unwrap_or_default(),
                last_name: user.last_name.clone().unwrap_or_default(),
                subscriber_id: user_id.to_string(),
            };
            let subject = format!("Goal achieved in {}", flow.name);
            let data = json!({
                "flowId": flow_id,
                "flowName": flow.name,
                "entityId": entity.entity_id,
                "entityType": entity.entity_type,
                "participantId": participant.id,
            });
            if let Err(e) = self
                .notifier
                .send(&self.config.goal_notification_workflow, &recipient, &subject, &data)
                .await
            {
                tracing::warn!(error = %e, %user_id, "failed to send goal notification");
            }
            Ok(participant)
        })
        .await
    }
}
