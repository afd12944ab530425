//! Requirement recompute across a flow's participants.

use crate::engine::Engine;
use crate::schedule::{load_flow, set_status};
use crate::store::{FlowRepository, FlowStore, Transaction};
use flowline_core::{FlowId, OperationContext, Result};
use flowline_flow::FlowRequirements;
use tracing::instrument;

impl<S: FlowStore> Engine<S> {
    /// Re-evaluates every participant of a flow against its current
    /// requirements, moving them between ON_HOLD and READY.
    ///
    /// Terminal participants are left alone. Returns how many participants
    /// changed status.
    ///
    /// # Errors
    ///
    /// Returns `FlowNotFound` if the flow does not exist, or any directory
    /// or store error.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn recompute_participant_requirements(
        &self,
        ctx: &OperationContext,
        flow_id: FlowId,
    ) -> Result<usize> {
        self.with_deadline("recompute_participant_requirements", async {
            let now = self.now();
            let mut tx = self.store.begin(&ctx.tenant).await?;
            load_flow(&mut tx, flow_id).await?;
            let requirements = FlowRequirements::for_actions(&tx.list_actions(flow_id).await?);

            let mut events = Vec::new();
            let mut changed = 0;
            for mut participant in tx.list_participants(flow_id).await? {
                if participant.status.is_terminal() {
                    continue;
                }
                let profile = self
                    .directory
                    .entity_profile(&ctx.tenant, &participant.entity)
                    .await?;
                let met = requirements.met_by(profile.as_ref().and_then(|p| p.primary_email.as_deref()));
                let status = participant.status.after_requirements(met);
                if status != participant.status {
                    set_status(&mut tx, &mut participant, status, now, &mut events).await?;
                    changed += 1;
                }
            }
            tx.commit().await?;
            self.publish_all(ctx, events).await;
            tracing::info!(%flow_id, changed, "recomputed participant requirements");
            Ok(changed)
        })
        .await
    }
}
