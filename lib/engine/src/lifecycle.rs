//! Flow lifecycle: creation, graph saves, ON/OFF, senders and enrollment.

use crate::engine::Engine;
use crate::schedule::{ScheduleOutcome, load_flow};
use crate::store::{FlowRepository, FlowStore, Transaction};
use flowline_core::{
    EngineError, EntityRef, FlowId, OperationContext, Result, SenderId, UserId,
};
use flowline_flow::{
    AuthorGraph, CompiledFlow, CompletionKind, Flow, FlowEvent, FlowParticipant, FlowRequirements,
    FlowSender, FlowStatus, ParticipantStatus, compile,
};
use tracing::instrument;

impl<S: FlowStore> Engine<S> {
    /// Creates a flow in status OFF.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn create_flow(
        &self,
        ctx: &OperationContext,
        name: &str,
        description: Option<&str>,
    ) -> Result<Flow> {
        self.with_deadline("create_flow", async {
            let mut flow = Flow::new(name, self.now());
            flow.description = description.map(str::to_string);
            let mut tx = self.store.begin(&ctx.tenant).await?;
            tx.merge_flow(&flow).await?;
            tx.commit().await?;
            self.publish_all(ctx, vec![FlowEvent::flow_changed(flow.id, CompletionKind::Create)])
                .await;
            Ok(flow)
        })
        .await
    }

    /// Returns a flow.
    ///
    /// # Errors
    ///
    /// Returns `FlowNotFound` if it does not exist.
    pub async fn get_flow(&self, ctx: &OperationContext, flow_id: FlowId) -> Result<Flow> {
        let mut tx = self.store.begin(&ctx.tenant).await?;
        load_flow(&mut tx, flow_id).await
    }

    /// Compiles and saves an authored graph, replacing the flow's actions.
    ///
    /// On success a requirement recompute is requested for the flow.
    ///
    /// # Errors
    ///
    /// Returns `FlowNotFound`, `FlowActive` if the flow is ON, or
    /// `InvalidGraph` if the graph fails validation. Nothing is persisted on
    /// error.
    #[instrument(skip(self, ctx, graph), fields(tenant = %ctx.tenant))]
    pub async fn save_graph(
        &self,
        ctx: &OperationContext,
        flow_id: FlowId,
        graph: &AuthorGraph,
    ) -> Result<CompiledFlow> {
        self.with_deadline("save_graph", async {
            let now = self.now();
            let mut tx = self.store.begin(&ctx.tenant).await?;
            tx.lock_flow(flow_id).await?;
            let mut flow = load_flow(&mut tx, flow_id).await?;
            if flow.is_on() {
                return Err(EngineError::FlowActive {
                    flow_id: flow_id.to_string(),
                }
                .into());
            }

            let compiled = compile(flow_id, graph, now)?;
            tx.delete_flow_actions(flow_id).await?;
            for action in &compiled.actions {
                tx.merge_flow_action(action).await?;
            }
            for (from, to) in &compiled.links {
                tx.link_next(*from, *to).await?;
            }
            flow.graph = compiled.graph.clone();
            flow.updated_at = now;
            tx.merge_flow(&flow).await?;
            tx.commit().await?;

            tracing::info!(
                %flow_id,
                actions = compiled.actions.len(),
                links = compiled.links.len(),
                "saved flow graph"
            );
            self.publish_all(
                ctx,
                vec![
                    FlowEvent::ComputeParticipantRequirements { flow_id },
                    FlowEvent::flow_changed(flow_id, CompletionKind::Update),
                ],
            )
            .await;
            Ok(compiled)
        })
        .await
    }

    /// Turns a flow ON and requests scheduling of its participants.
    ///
    /// # Errors
    ///
    /// Returns `FlowNotFound` if the flow does not exist.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn turn_on(&self, ctx: &OperationContext, flow_id: FlowId) -> Result<Flow> {
        self.set_flow_status(ctx, flow_id, FlowStatus::On).await
    }

    /// Turns a flow OFF. Pending executions stay SCHEDULED and resume when
    /// the flow is turned back ON.
    ///
    /// # Errors
    ///
    /// Returns `FlowNotFound` if the flow does not exist.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn turn_off(&self, ctx: &OperationContext, flow_id: FlowId) -> Result<Flow> {
        self.set_flow_status(ctx, flow_id, FlowStatus::Off).await
    }

    async fn set_flow_status(
        &self,
        ctx: &OperationContext,
        flow_id: FlowId,
        status: FlowStatus,
    ) -> Result<Flow> {
        self.with_deadline("set_flow_status", async {
            let now = self.now();
            let mut tx = self.store.begin(&ctx.tenant).await?;
            tx.lock_flow(flow_id).await?;
            let mut flow = load_flow(&mut tx, flow_id).await?;
            if flow.status == status {
                return Ok(flow);
            }
            flow.status = status;
            flow.updated_at = now;
            if status == FlowStatus::On {
                flow.first_started_at.get_or_insert(now);
            }
            tx.merge_flow(&flow).await?;
            tx.commit().await?;

            let mut events = vec![FlowEvent::flow_changed(flow_id, CompletionKind::Update)];
            if status == FlowStatus::On {
                events.push(FlowEvent::ScheduleFlow { flow_id });
            }
            self.publish_all(ctx, events).await;
            tracing::info!(%flow_id, status = status.as_str(), "changed flow status");
            Ok(flow)
        })
        .await
    }

    /// Adds a user as a sender of a flow. Adding the same user twice
    /// returns the existing sender.
    ///
    /// # Errors
    ///
    /// Returns `FlowNotFound` or `UserMissing`.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn add_sender(
        &self,
        ctx: &OperationContext,
        flow_id: FlowId,
        user_id: UserId,
    ) -> Result<FlowSender> {
        self.with_deadline("add_sender", async {
            if self.directory.user_profile(&ctx.tenant, user_id).await?.is_none() {
                return Err(EngineError::UserMissing {
                    user_id: user_id.to_string(),
                }
                .into());
            }
            let mut tx = self.store.begin(&ctx.tenant).await?;
            load_flow(&mut tx, flow_id).await?;
            if let Some(existing) = tx
                .list_senders(flow_id)
                .await?
                .into_iter()
                .find(|s| s.user_id == user_id)
            {
                return Ok(existing);
            }
            let sender = FlowSender::new(flow_id, user_id);
            tx.merge_sender(&sender).await?;
            tx.commit().await?;
            self.publish_all(ctx, vec![FlowEvent::flow_changed(flow_id, CompletionKind::Update)])
                .await;
            Ok(sender)
        })
        .await
    }

    /// Removes a sender. Returns false if it did not exist.
    ///
    /// Participants already bound to one of the sender's mailboxes keep
    /// that binding.
    ///
    /// # Errors
    ///
    /// Returns `FlowNotFound` if the flow does not exist.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn remove_sender(
        &self,
        ctx: &OperationContext,
        flow_id: FlowId,
        sender_id: SenderId,
    ) -> Result<bool> {
        self.with_deadline("remove_sender", async {
            let mut tx = self.store.begin(&ctx.tenant).await?;
            load_flow(&mut tx, flow_id).await?;
            let removed = tx.delete_sender(flow_id, sender_id).await?;
            tx.commit().await?;
            if removed {
                self.publish_all(ctx, vec![FlowEvent::flow_changed(flow_id, CompletionKind::Update)])
                    .await;
            }
            Ok(removed)
        })
        .await
    }

    /// Lists the senders of a flow.
    ///
    /// # Errors
    ///
    /// Returns `FlowNotFound` if the flow does not exist.
    pub async fn list_senders(&self, ctx: &OperationContext, flow_id: FlowId) -> Result<Vec<FlowSender>> {
        let mut tx = self.store.begin(&ctx.tenant).await?;
        load_flow(&mut tx, flow_id).await?;
        tx.list_senders(flow_id).await
    }

    /// Enrolls an entity in a flow.
    ///
    /// The participant starts ON_HOLD, is evaluated against the flow's
    /// requirements and, if READY on an ON flow, scheduled right away.
    /// Enrolling an existing participant returns it unchanged.
    ///
    /// # Errors
    ///
    /// Returns `FlowNotFound`, or any scheduling error. A scheduling error
    /// leaves the participant enrolled.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn enroll_participant(
        &self,
        ctx: &OperationContext,
        flow_id: FlowId,
        entity: EntityRef,
    ) -> Result<FlowParticipant> {
        let participant = self
            .with_deadline("enroll_participant", async {
                let now = self.now();
                let mut tx = self.store.begin(&ctx.tenant).await?;
                let flow = load_flow(&mut tx, flow_id).await?;
                tx.lock_participant(flow_id, &entity).await?;
                if let Some(existing) = tx.get_participant(flow_id, &entity).await? {
                    return Ok((flow, existing, false));
                }

                let mut participant = FlowParticipant::new(flow_id, entity.clone(), now);
                let requirements = FlowRequirements::for_actions(&tx.list_actions(flow_id).await?);
                let profile = self.directory.entity_profile(&ctx.tenant, &entity).await?;
                let met = requirements.met_by(
                    profile.as_ref().and_then(|p| p.primary_email.as_deref()),
                );
                participant.status = participant.status.after_requirements(met);
                tx.merge_participant(&participant).await?;
                tx.commit().await?;
                self.publish_all(
                    ctx,
                    vec![FlowEvent::participant_changed(participant.id, CompletionKind::Create)],
                )
                .await;
                Ok((flow, participant, true))
            })
            .await;
        let (flow, participant, created) = participant?;

        if !created || !flow.is_on() || participant.status != ParticipantStatus::Ready {
            return Ok(participant);
        }
        match self.schedule_participant(ctx, participant.id).await? {
            ScheduleOutcome::Scheduled(_) | ScheduleOutcome::Completed => {
                let mut tx = self.store.begin(&ctx.tenant).await?;
                Ok(tx
                    .get_participant_by_id(participant.id)
                    .await?
                    .unwrap_or(participant))
            }
            _ => Ok(participant),
        }
    }
}
