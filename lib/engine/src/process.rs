//! Execution processing: running a due execution, composing its email, and
//! scheduling what comes next.

use crate::directory::EntityProfile;
use crate::engine::Engine;
use crate::schedule::{load_action, load_flow, set_status};
use crate::store::{EmailQueue, FlowRepository, FlowStore, Transaction};
use flowline_core::{
    EngineError, EntityRef, ExecutionId, FlowActionId, FlowId, OperationContext, Result,
};
use flowline_flow::{
    ActionBody, ActionKind, BillableEvent, EmailMessage, ExecutionStatus, Flow, FlowAction,
    FlowActionExecution, FlowParticipant, FlowRequirements, ParticipantStatus,
    PRODUCER_FLOW_ACTION_EXECUTION, TemplateContext, render, template,
};
use flowline_scheduler::MailboxRepository;
use std::collections::HashSet;
use tracing::instrument;

/// What processing an execution did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The action ran and the execution is SUCCESS.
    Succeeded,
    /// Nothing was done: unknown id, already processed, not due, or flow OFF.
    Skipped,
    /// The execution was marked BUSINESS_ERROR.
    BusinessError { reason: String },
    /// The execution was marked TECH_ERROR and will be retried.
    TechError { reason: String },
}

impl<S: FlowStore> Engine<S> {
    /// Processes one execution.
    ///
    /// Retryable failures roll back and leave the execution in TECH_ERROR
    /// for the next sweep. Other failures mark it BUSINESS_ERROR.
    ///
    /// # Errors
    ///
    /// Returns an error only if the failure status itself cannot be
    /// recorded.
    #[instrument(skip(self, ctx), fields(tenant = %ctx.tenant))]
    pub async fn process_execution(
        &self,
        ctx: &OperationContext,
        execution_id: ExecutionId,
    ) -> Result<ProcessOutcome> {
        let result = self
            .with_deadline("process_execution", self.process_inner(ctx, execution_id))
            .await;
        let report = match result {
            Ok(outcome) => return Ok(outcome),
            Err(report) => report,
        };

        let error = report.current_context();
        let (status, reason) = if error.is_retryable() {
            (ExecutionStatus::TechError, error.to_string())
        } else {
            (ExecutionStatus::BusinessError, error.to_string())
        };
        tracing::warn!(
            error = %report,
            kind = error.tag(),
            execution_id = %execution_id,
            status = status.as_str(),
            "execution failed"
        );
        self.mark_execution(ctx, execution_id, status).await?;
        Ok(match status {
            ExecutionStatus::TechError => ProcessOutcome::TechError { reason },
            _ => ProcessOutcome::BusinessError { reason },
        })
    }

    /// Records a failure status in a fresh transaction.
    ///
    /// A BUSINESS_ERROR also re-evaluates the participant, so it leaves
    /// SCHEDULED and the same action is retried once it is READY.
    async fn mark_execution(
        &self,
        ctx: &OperationContext,
        execution_id: ExecutionId,
        status: ExecutionStatus,
    ) -> Result<()> {
        let now = self.now();
        let mut tx = self.store.begin(&ctx.tenant).await?;
        let Some(execution) = tx.get_execution(execution_id).await? else {
            return Ok(());
        };
        tx.lock_participant(execution.flow_id, &execution.entity)
            .await?;
        let Some(mut execution) = tx.get_execution(execution_id).await? else {
            return Ok(());
        };
        if !execution.status.is_due_candidate() {
            return Ok(());
        }
        execution.fail(status, now);
        tx.merge_execution(&execution).await?;

        let mut events = Vec::new();
        if status == ExecutionStatus::BusinessError {
            let participant = tx
                .get_participant(execution.flow_id, &execution.entity)
                .await?;
            if let Some(mut participant) = participant {
                let (met, _) = self
                    .requirements_met(&mut tx, ctx, execution.flow_id, &execution.entity)
                    .await?;
                let next = participant.status.after_requirements(met);
                set_status(&mut tx, &mut participant, next, now, &mut events).await?;
            }
        }
        tx.commit().await?;
        self.publish_all(ctx, events).await;
        Ok(())
    }

    /// Evaluates the flow's requirements against the entity's profile.
    async fn requirements_met(
        &self,
        tx: &mut S::Tx,
        ctx: &OperationContext,
        flow_id: FlowId,
        entity: &EntityRef,
    ) -> Result<(bool, EntityProfile)> {
        let requirements = FlowRequirements::for_actions(&tx.list_actions(flow_id).await?);
        let profile = self
            .directory
            .entity_profile(&ctx.tenant, entity)
            .await?
            .unwrap_or_default();
        Ok((requirements.met_by(profile.primary_email.as_deref()), profile))
    }

    async fn process_inner(
        &self,
        ctx: &OperationContext,
        execution_id: ExecutionId,
    ) -> Result<ProcessOutcome> {
        let now = self.now();
        let mut tx = self.store.begin(&ctx.tenant).await?;
        let Some(execution) = tx.get_execution(execution_id).await? else {
            tracing::debug!(%execution_id, "execution not found");
            return Ok(ProcessOutcome::Skipped);
        };
        if !execution.status.is_due_candidate() || execution.scheduled_at > now {
            return Ok(ProcessOutcome::Skipped);
        }
        let flow = load_flow(&mut tx, execution.flow_id).await?;
        if !flow.is_on() {
            return Ok(ProcessOutcome::Skipped);
        }

        tx.lock_participant(flow.id, &execution.entity).await?;
        // Re-read under the lock; a concurrent run may have finished it.
        let Some(mut execution) = tx.get_execution(execution_id).await? else {
            return Ok(ProcessOutcome::Skipped);
        };
        if !execution.status.is_due_candidate() {
            return Ok(ProcessOutcome::Skipped);
        }
        let mut participant = tx
            .get_participant(flow.id, &execution.entity)
            .await?
            .ok_or_else(|| EngineError::ParticipantMissing {
                details: format!("{} in flow {}", execution.entity, flow.id),
            })?;
        let action = load_action(&mut tx, execution.action_id).await?;

        let mut events = Vec::new();
        let (met, profile) = self
            .requirements_met(&mut tx, ctx, flow.id, &execution.entity)
            .await?;
        let status = participant.status.after_requirements(met);
        set_status(&mut tx, &mut participant, status, now, &mut events).await?;

        if participant.status != ParticipantStatus::Ready {
            execution.fail(ExecutionStatus::BusinessError, now);
            tx.merge_execution(&execution).await?;
            tx.commit().await?;
            self.publish_all(ctx, events).await;
            return Ok(ProcessOutcome::BusinessError {
                reason: format!("participant is {}", participant.status),
            });
        }

        match action.kind() {
            ActionKind::EmailNew | ActionKind::EmailReply => {
                self.send_email(&mut tx, ctx, &flow, &participant, &action, &execution, &profile)
                    .await?;
            }
            other => {
                return Err(EngineError::Unsupported {
                    what: format!("executing {} actions", other.as_str()),
                }
                .into());
            }
        }

        execution.succeed(now);
        tx.merge_execution(&execution).await?;
        tx.record_billable_event(&BillableEvent::for_execution(&execution, action.kind(), now))
            .await?;

        match self
            .schedule_in_tx(&mut tx, ctx, &flow, &mut participant, Some(&execution), &mut events)
            .await
        {
            Ok(outcome) => tracing::debug!(?outcome, "scheduled successors"),
            Err(report) if report.current_context().is_retryable() => return Err(report),
            Err(report) => tracing::warn!(
                error = %report,
                execution_id = %execution.id,
                "failed to schedule successors, leaving for the reschedule sweep"
            ),
        }

        tx.commit().await?;
        self.publish_all(ctx, events).await;
        tracing::info!(%execution_id, action = action.kind().as_str(), "execution succeeded");
        Ok(ProcessOutcome::Succeeded)
    }

    /// Composes and enqueues the email of an email execution. A message
    /// already produced by this execution is left as is.
    #[allow(clippy::too_many_arguments)]
    async fn send_email(
        &self,
        tx: &mut S::Tx,
        ctx: &OperationContext,
        flow: &Flow,
        participant: &FlowParticipant,
        action: &FlowAction,
        execution: &FlowActionExecution,
        profile: &EntityProfile,
    ) -> Result<()> {
        if tx
            .find_email_by_producer(PRODUCER_FLOW_ACTION_EXECUTION, execution.id)
            .await?
            .is_some()
        {
            tracing::debug!(execution_id = %execution.id, "email already enqueued");
            return Ok(());
        }

        let settings = tx
            .get_execution_settings(flow.id, &participant.entity)
            .await?;
        let (bound, user_id) = settings
            .as_ref()
            .and_then(|s| s.binding())
            .map(|(mailbox, user_id)| (mailbox.to_string(), user_id))
            .ok_or_else(|| EngineError::NoMailboxAvailable {
                details: format!("{} has no bound mailbox", participant.entity),
            })?;
        let from = execution.mailbox.clone().unwrap_or(bound);
        if tx.get_mailbox(&from).await?.is_none() {
            return Err(EngineError::MailboxMissing { mailbox: from }.into());
        }

        let to = profile
            .primary_email
            .clone()
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| EngineError::NoPrimaryEmail {
                entity: participant.entity.to_string(),
            })?;
        let sender = self
            .directory
            .user_profile(&ctx.tenant, user_id)
            .await?
            .ok_or_else(|| EngineError::UserMissing {
                user_id: user_id.to_string(),
            })?;

        let context = TemplateContext::new()
            .with(template::CONTACT_FIRST_NAME, profile.first_name.as_deref())
            .with(template::CONTACT_LAST_NAME, profile.last_name.as_deref())
            .with(template::CONTACT_EMAIL, Some(to.as_str()))
            .with(template::ORGANIZATION_NAME, profile.organization_name.as_deref())
            .with(template::SENDER_FIRST_NAME, sender.first_name.as_deref())
            .with(template::SENDER_LAST_NAME, sender.last_name.as_deref());

        let message = match &action.data.body {
            ActionBody::EmailNew {
                subject,
                body_template,
            } => EmailMessage::for_execution(
                execution.id,
                &from,
                sender.display_name(),
                &to,
                render(subject, &context),
                render(body_template, &context),
                self.now(),
            ),
            ActionBody::EmailReply { body_template } => {
                let parent = self.parent_email(tx, participant, action).await?;
                let mut message = EmailMessage::for_execution(
                    execution.id,
                    &from,
                    sender.display_name(),
                    &to,
                    String::new(),
                    render(body_template, &context),
                    self.now(),
                );
                if !message.reply_to(&parent) {
                    return Err(EngineError::transient(format!(
                        "parent email {} has not been sent yet",
                        parent.id
                    ))
                    .into());
                }
                message
            }
            other => {
                return Err(EngineError::Unsupported {
                    what: format!("composing email for {} actions", other.kind().as_str()),
                }
                .into());
            }
        };
        tx.enqueue_email(&message).await?;
        tracing::info!(
            execution_id = %execution.id,
            from = %message.from,
            subject = %message.subject,
            "enqueued email"
        );
        Ok(())
    }

    /// Finds the email a reply action answers: the message produced by the
    /// successful execution of the nearest EMAIL_NEW ancestor.
    async fn parent_email(
        &self,
        tx: &mut S::Tx,
        participant: &FlowParticipant,
        action: &FlowAction,
    ) -> Result<EmailMessage> {
        let no_parent = |details: String| EngineError::NoParentEmail { details };
        let ancestor = nearest_email_new(tx, action.id)
            .await?
            .ok_or_else(|| no_parent(format!("no EMAIL_NEW precedes action {}", action.id)))?;
        let parent_execution = tx
            .list_executions_for_entity(participant.flow_id, &participant.entity)
            .await?
            .into_iter()
            .filter(|e| e.action_id == ancestor && e.status == ExecutionStatus::Success)
            .max_by_key(|e| e.scheduled_at)
            .ok_or_else(|| {
                no_parent(format!(
                    "action {ancestor} never succeeded for {}",
                    participant.entity
                ))
            })?;
        let parent = tx
            .find_email_by_producer(PRODUCER_FLOW_ACTION_EXECUTION, parent_execution.id)
            .await?
            .ok_or_else(|| no_parent(format!("execution {} produced no email", parent_execution.id)))?;
        Ok(parent)
    }
}

/// Walks predecessors depth-first, nearest first, to the closest EMAIL_NEW.
async fn nearest_email_new<T: Transaction>(
    tx: &mut T,
    from: FlowActionId,
) -> Result<Option<FlowActionId>> {
    let mut visited = HashSet::from([from]);
    let mut stack = vec![from];
    while let Some(current) = stack.pop() {
        let predecessors = tx.get_prev_actions(current).await?;
        for predecessor in predecessors.iter().rev() {
            if predecessor.kind() == ActionKind::EmailNew {
                return Ok(Some(predecessor.id));
            }
        }
        for predecessor in predecessors.into_iter().rev() {
            if visited.insert(predecessor.id) {
                stack.push(predecessor.id);
            }
        }
    }
    Ok(None)
}
