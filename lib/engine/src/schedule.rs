//! Per-participant scheduling: deciding the next actions of a participant
//! and turning email actions into SCHEDULED executions on a bound mailbox.

use crate::engine::Engine;
use crate::store::{FlowRepository, FlowStore, Transaction};
use chrono::{DateTime, Duration, Utc};
use flowline_core::{EngineError, FlowId, OperationContext, ParticipantId, Result, UserId};
use flowline_flow::{
    ActionKind, CompletionKind, ExecutionStatus, Flow, FlowAction, FlowActionExecution, FlowEvent,
    FlowExecutionSettings, FlowParticipant, ParticipantStatus,
};
use flowline_scheduler::{Mailbox, MailboxLedger, MailboxRepository, WorkingScheduleRepository};
use tracing::instrument;

/// Why scheduling did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    FlowOff,
    NotReady,
    Terminal,
}

/// What scheduling a participant did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleOutcome {
    /// New executions were created.
    Scheduled(Vec<FlowActionExecution>),
    /// The participant already has a pending execution.
    AlreadyScheduled,
    /// The participant reached the end of the flow.
    Completed,
    Skipped(SkipReason),
}

impl<S: FlowStore> Engine<S> {
    /// Schedules the next actions of one participant.
    ///
    /// Does nothing if the flow is OFF, the participant is not READY, or it
    /// already has a SCHEDULED or TECH_ERROR execution.
    ///
    /// # Errors
    ///
    /// Returns `ParticipantMissing` or `FlowNotFound` for unknown ids,
    /// `Unsupported` for LinkedIn actions, and any mailbox binding or slot
    /// allocation error.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn schedule_participant(
        &self,
        ctx: &OperationContext,
        participant_id: ParticipantId,
    ) -> Result<ScheduleOutcome> {
        self.with_deadline(
            "schedule_participant",
            self.schedule_participant_inner(ctx, participant_id),
        )
        .await
    }

    async fn schedule_participant_inner(
        &self,
        ctx: &OperationContext,
        participant_id: ParticipantId,
    ) -> Result<ScheduleOutcome> {
        let mut tx = self.store.begin(&ctx.tenant).await?;
        let missing = || EngineError::ParticipantMissing {
            details: format!("participant {participant_id}"),
        };
        let participant = tx
            .get_participant_by_id(participant_id)
            .await?
            .ok_or_else(missing)?;
        tx.lock_participant(participant.flow_id, &participant.entity)
            .await?;
        let mut participant = tx
            .get_participant_by_id(participant_id)
            .await?
            .ok_or_else(missing)?;
        let flow = load_flow(&mut tx, participant.flow_id).await?;

        let mut events = Vec::new();
        let outcome = self
            .schedule_in_tx(&mut tx, ctx, &flow, &mut participant, None, &mut events)
            .await?;
        tx.commit().await?;
        self.publish_all(ctx, events).await;
        Ok(outcome)
    }

    /// Schedules every non-terminal participant of an ON flow.
    ///
    /// Each participant is scheduled in its own transaction. Failures are
    /// logged and left for the next reschedule sweep. Returns the number of
    /// participants that got new executions.
    ///
    /// # Errors
    ///
    /// Returns `FlowNotFound` if the flow does not exist.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn schedule_flow(&self, ctx: &OperationContext, flow_id: FlowId) -> Result<usize> {
        let (flow, participants) = {
            let mut tx = self.store.begin(&ctx.tenant).await?;
            let flow = load_flow(&mut tx, flow_id).await?;
            let participants = tx.list_participants(flow_id).await?;
            (flow, participants)
        };
        if !flow.is_on() {
            return Ok(0);
        }

        let mut scheduled = 0;
        for participant in participants {
            if participant.status.is_terminal() {
                continue;
            }
            match self.schedule_participant(ctx, participant.id).await {
                Ok(ScheduleOutcome::Scheduled(_)) => scheduled += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(
                    error = %e,
                    participant_id = %participant.id,
                    "failed to schedule participant"
                ),
            }
        }
        Ok(scheduled)
    }

    /// Schedules inside an open transaction that already holds the
    /// participant lock.
    ///
    /// With `after`, the successors of that (just processed) execution are
    /// scheduled relative to its `scheduledAt`. Without it, the participant's
    /// newest execution is the anchor, or a virtual START at now.
    pub(crate) async fn schedule_in_tx(
        &self,
        tx: &mut S::Tx,
        ctx: &OperationContext,
        flow: &Flow,
        participant: &mut FlowParticipant,
        after: Option<&FlowActionExecution>,
        events: &mut Vec<FlowEvent>,
    ) -> Result<ScheduleOutcome> {
        let now = self.now();
        if !flow.is_on() {
            return Ok(ScheduleOutcome::Skipped(SkipReason::FlowOff));
        }
        if participant.status.is_terminal() {
            return Ok(ScheduleOutcome::Skipped(SkipReason::Terminal));
        }

        let executions = tx
            .list_executions_for_entity(flow.id, &participant.entity)
            .await?;
        if after.is_none() && executions.iter().any(|e| e.status.is_due_candidate()) {
            if participant.status == ParticipantStatus::Ready {
                set_status(tx, participant, ParticipantStatus::Scheduled, now, events).await?;
            }
            return Ok(ScheduleOutcome::AlreadyScheduled);
        }
        if participant.status != ParticipantStatus::Ready {
            return Ok(ScheduleOutcome::Skipped(SkipReason::NotReady));
        }

        let (anchor_action, anchor_at) = match after.or(executions.last()) {
            Some(newest) if after.is_none() && newest.status == ExecutionStatus::BusinessError => {
                // A business failure is retried once the participant is READY again.
                let action = load_action(tx, newest.action_id).await?;
                return self
                    .schedule_actions(tx, ctx, flow, participant, vec![(action, now)], events)
                    .await;
            }
            Some(anchor) => (anchor.action_id, anchor.scheduled_at),
            None => {
                let start = tx.get_start_action(flow.id).await?.ok_or_else(|| {
                    EngineError::invalid_graph(format!("flow {} has no FLOW_START action", flow.id))
                })?;
                (start.id, now)
            }
        };

        let successors = tx.get_next_actions(anchor_action).await?;
        if successors.is_empty() {
            set_status(tx, participant, ParticipantStatus::Completed, now, events).await?;
            return Ok(ScheduleOutcome::Completed);
        }
        let pending: Vec<_> = successors
            .into_iter()
            .filter(|action| !executions.iter().any(|e| e.action_id == action.id))
            .map(|action| {
                let desired = anchor_at + Duration::minutes(i64::from(action.data.wait_before));
                (action, desired)
            })
            .collect();
        if pending.is_empty() {
            return Ok(ScheduleOutcome::AlreadyScheduled);
        }
        self.schedule_actions(tx, ctx, flow, participant, pending, events)
            .await
    }

    async fn schedule_actions(
        &self,
        tx: &mut S::Tx,
        ctx: &OperationContext,
        flow: &Flow,
        participant: &mut FlowParticipant,
        actions: Vec<(FlowAction, DateTime<Utc>)>,
        events: &mut Vec<FlowEvent>,
    ) -> Result<ScheduleOutcome> {
        let now = self.now();
        let mut created = Vec::new();
        for (action, desired_at) in actions {
            match action.kind() {
                ActionKind::FlowEnd => {
                    set_status(tx, participant, ParticipantStatus::Completed, now, events).await?;
                    return Ok(ScheduleOutcome::Completed);
                }
                ActionKind::EmailNew | ActionKind::EmailReply => {
                    let execution = self
                        .schedule_email(tx, ctx, flow, participant, &action, desired_at)
                        .await?;
                    created.push(execution);
                }
                kind @ (ActionKind::LinkedinConnectionRequest | ActionKind::LinkedinMessage) => {
                    return Err(EngineError::Unsupported {
                        what: format!("scheduling {} actions", kind.as_str()),
                    }
                    .into());
                }
                kind @ (ActionKind::FlowStart | ActionKind::Wait) => {
                    tracing::warn!(action_id = %action.id, kind = kind.as_str(), "skipping unschedulable action");
                }
            }
        }
        if created.is_empty() {
            return Ok(ScheduleOutcome::AlreadyScheduled);
        }
        set_status(tx, participant, ParticipantStatus::Scheduled, now, events).await?;
        Ok(ScheduleOutcome::Scheduled(created))
    }

    /// Creates the SCHEDULED execution of an email action on the
    /// participant's mailbox, binding one first if needed.
    async fn schedule_email(
        &self,
        tx: &mut S::Tx,
        ctx: &OperationContext,
        flow: &Flow,
        participant: &FlowParticipant,
        action: &FlowAction,
        desired_at: DateTime<Utc>,
    ) -> Result<FlowActionExecution> {
        let now = self.now();
        let (mailbox, user_id) = self.bound_mailbox(tx, ctx, flow, participant).await?;
        tx.lock_mailbox(&mailbox.username).await?;

        let schedules = tx.working_schedules_for_user(user_id).await?;
        if schedules.is_empty() {
            return Err(EngineError::NoWorkingSchedule {
                user_id: user_id.to_string(),
            }
            .into());
        }
        let slot = self
            .slots
            .next_legal_slot(tx, &mailbox, desired_at, now, &schedules)
            .await?;

        let execution = FlowActionExecution::scheduled(
            flow.id,
            action.id,
            participant.entity.clone(),
            Some(mailbox.username.clone()),
            slot,
            now,
        );
        tx.merge_execution(&execution).await?;
        tracing::info!(
            execution_id = %execution.id,
            action_id = %action.id,
            mailbox = %mailbox.username,
            scheduled_at = %slot,
            "scheduled email"
        );
        Ok(execution)
    }

    /// Returns the participant's bound mailbox, binding the least recently
    /// used sender mailbox on first use.
    async fn bound_mailbox(
        &self,
        tx: &mut S::Tx,
        ctx: &OperationContext,
        flow: &Flow,
        participant: &FlowParticipant,
    ) -> Result<(Mailbox, UserId)> {
        let settings = tx
            .get_execution_settings(flow.id, &participant.entity)
            .await?;
        if let Some((username, user_id)) = settings.as_ref().and_then(FlowExecutionSettings::binding) {
            let mailbox = tx
                .get_mailbox(username)
                .await?
                .ok_or_else(|| EngineError::MailboxMissing {
                    mailbox: username.to_string(),
                })?;
            return Ok((mailbox, user_id));
        }

        let mut best: Option<(Option<DateTime<Utc>>, Mailbox, UserId)> = None;
        for sender in tx.list_senders(flow.id).await? {
            let Some(user) = self
                .directory
                .user_profile(&ctx.tenant, sender.user_id)
                .await?
            else {
                tracing::warn!(user_id = %sender.user_id, flow_id = %flow.id, "sender user not found");
                continue;
            };
            for address in &user.emails {
                for mailbox in tx.list_mailboxes_by_username(address).await? {
                    if mailbox.ramp_up_current == 0 {
                        continue;
                    }
                    let last = tx.last_execution_for_mailbox(&mailbox.username).await?;
                    let better = best.as_ref().is_none_or(|(best_last, best_mailbox, _)| {
                        (last, &mailbox.username) < (*best_last, &best_mailbox.username)
                    });
                    if better {
                        best = Some((last, mailbox, sender.user_id));
                    }
                }
            }
        }
        let Some((_, mailbox, user_id)) = best else {
            return Err(EngineError::NoMailboxAvailable {
                details: format!("flow {} has no sender mailbox with quota", flow.id),
            }
            .into());
        };

        let settings = match settings {
            Some(mut existing) => {
                existing.mailbox = Some(mailbox.username.clone());
                existing.user_id = Some(user_id);
                existing
            }
            None => FlowExecutionSettings::bound(
                flow.id,
                participant.entity.clone(),
                mailbox.username.clone(),
                user_id,
            ),
        };
        tx.merge_execution_settings(&settings).await?;
        tracing::debug!(mailbox = %mailbox.username, entity = %participant.entity, "bound mailbox");
        Ok((mailbox, user_id))
    }
}

pub(crate) async fn load_flow<T: Transaction>(tx: &mut T, flow_id: FlowId) -> Result<Flow> {
    tx.get_flow(flow_id).await?.ok_or_else(|| {
        EngineError::FlowNotFound {
            flow_id: flow_id.to_string(),
        }
        .into()
    })
}

pub(crate) async fn load_action<T: Transaction>(
    tx: &mut T,
    action_id: flowline_core::FlowActionId,
) -> Result<FlowAction> {
    tx.get_action(action_id).await?.ok_or_else(|| {
        EngineError::ActionMissing {
            action_id: action_id.to_string(),
        }
        .into()
    })
}

/// Moves a participant to `status`, persisting and announcing the change.
pub(crate) async fn set_status<T: Transaction>(
    tx: &mut T,
    participant: &mut FlowParticipant,
    status: ParticipantStatus,
    now: DateTime<Utc>,
    events: &mut Vec<FlowEvent>,
) -> Result<()> {
    if participant.transition(status, now) {
        tx.merge_participant(participant).await?;
        events.push(FlowEvent::participant_changed(
            participant.id,
            CompletionKind::Update,
        ));
    }
    Ok(())
}
