//! In-memory adapters for tests and local runs.
//!
//! [`InMemoryStore`] serializes transactions behind one async mutex. A
//! transaction works on a copy of its tenant's data and writes it back on
//! commit, so dropping it rolls back.

use crate::bus::EventBus;
use crate::directory::{Directory, EntityProfile, UserProfile};
use crate::notify::{Notifier, Recipient};
use crate::store::{EmailQueue, FlowRepository, FlowStore, Transaction};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use flowline_core::{
    EntityRef, ExecutionId, FlowActionId, FlowId, ParticipantId, Result, SenderId, Tenant, UserId,
};
use flowline_flow::{
    BillableEvent, EmailMessage, EmailStatus, Envelope, Flow, FlowAction, FlowActionExecution,
    FlowEvent, FlowExecutionSettings, FlowParticipant, FlowSender, ParticipantStatus,
};
use flowline_scheduler::{
    Mailbox, MailboxLedger, MailboxRepository, UserWorkingSchedule, WorkingScheduleRepository,
};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

/// Everything stored for one tenant.
#[derive(Debug, Clone, Default)]
pub struct TenantData {
    pub flows: BTreeMap<FlowId, Flow>,
    pub actions: BTreeMap<FlowActionId, FlowAction>,
    pub links: Vec<(FlowActionId, FlowActionId)>,
    pub participants: BTreeMap<ParticipantId, FlowParticipant>,
    /// In creation order.
    pub executions: Vec<FlowActionExecution>,
    pub settings: Vec<FlowExecutionSettings>,
    pub senders: Vec<FlowSender>,
    pub mailboxes: BTreeMap<String, Mailbox>,
    pub schedules: Vec<UserWorkingSchedule>,
    pub emails: Vec<EmailMessage>,
    pub billable_events: Vec<BillableEvent>,
}

impl TenantData {
    /// Executions of one participant, ordered by `scheduledAt`.
    #[must_use]
    pub fn executions_for(&self, flow_id: FlowId, entity: &EntityRef) -> Vec<FlowActionExecution> {
        let mut executions: Vec<_> = self
            .executions
            .iter()
            .filter(|e| e.flow_id == flow_id && &e.entity == entity)
            .cloned()
            .collect();
        executions.sort_by_key(|e| (e.scheduled_at, e.created_at));
        executions
    }

    /// Marks the email produced by an execution as sent by the provider.
    pub fn mark_email_sent(&mut self, producer_id: ExecutionId, provider_message_id: &str) -> bool {
        let Some(email) = self.emails.iter_mut().find(|e| e.producer_id == producer_id) else {
            return false;
        };
        email.status = EmailStatus::Sent;
        email.provider_message_id = Some(provider_message_id.to_string());
        if email.provider_thread_id.is_none() {
            email.provider_thread_id = Some(format!("thread-{provider_message_id}"));
        }
        true
    }

    fn sorted_actions(&self, ids: impl Iterator<Item = FlowActionId>) -> Vec<FlowAction> {
        let mut actions: Vec<_> = ids.filter_map(|id| self.actions.get(&id).cloned()).collect();
        actions.sort_by_key(|a| a.id);
        actions.dedup_by_key(|a| a.id);
        actions
    }
}

/// A [`FlowStore`] kept in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<tokio::sync::Mutex<HashMap<Tenant, TenantData>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads or edits a tenant's data outside any transaction.
    pub async fn with_tenant<R>(&self, tenant: &Tenant, f: impl FnOnce(&mut TenantData) -> R) -> R {
        let mut state = self.state.lock().await;
        f(state.entry(tenant.clone()).or_default())
    }

    /// Returns a copy of a tenant's data.
    pub async fn snapshot(&self, tenant: &Tenant) -> TenantData {
        self.with_tenant(tenant, |data| data.clone()).await
    }
}

#[async_trait]
impl FlowStore for InMemoryStore {
    type Tx = InMemoryTransaction;

    async fn begin(&self, tenant: &Tenant) -> Result<Self::Tx> {
        let guard = Arc::clone(&self.state).lock_owned().await;
        let working = guard.get(tenant).cloned().unwrap_or_default();
        Ok(InMemoryTransaction {
            guard,
            tenant: tenant.clone(),
            working,
        })
    }

    async fn tenants(&self) -> Result<Vec<Tenant>> {
        let state = self.state.lock().await;
        let mut tenants: Vec<_> = state.keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }
}

/// A transaction on an [`InMemoryStore`].
pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<HashMap<Tenant, TenantData>>,
    tenant: Tenant,
    working: TenantData,
}

#[async_trait]
impl FlowRepository for InMemoryTransaction {
    async fn get_flow(&mut self, flow_id: FlowId) -> Result<Option<Flow>> {
        Ok(self.working.flows.get(&flow_id).cloned())
    }

    async fn list_flows(&mut self) -> Result<Vec<Flow>> {
        Ok(self.working.flows.values().cloned().collect())
    }

    async fn merge_flow(&mut self, flow: &Flow) -> Result<()> {
        self.working.flows.insert(flow.id, flow.clone());
        Ok(())
    }

    async fn delete_flow_actions(&mut self, flow_id: FlowId) -> Result<()> {
        let data = &mut self.working;
        data.actions.retain(|_, a| a.flow_id != flow_id);
        let actions = &data.actions;
        data.links
            .retain(|(from, to)| actions.contains_key(from) && actions.contains_key(to));
        Ok(())
    }

    async fn merge_flow_action(&mut self, action: &FlowAction) -> Result<()> {
        self.working.actions.insert(action.id, action.clone());
        Ok(())
    }

    async fn link_next(&mut self, from: FlowActionId, to: FlowActionId) -> Result<()> {
        if !self.working.links.contains(&(from, to)) {
            self.working.links.push((from, to));
        }
        Ok(())
    }

    async fn get_action(&mut self, action_id: FlowActionId) -> Result<Option<FlowAction>> {
        Ok(self.working.actions.get(&action_id).cloned())
    }

    async fn list_actions(&mut self, flow_id: FlowId) -> Result<Vec<FlowAction>> {
        Ok(self
            .working
            .actions
            .values()
            .filter(|a| a.flow_id == flow_id)
            .cloned()
            .collect())
    }

    async fn get_start_action(&mut self, flow_id: FlowId) -> Result<Option<FlowAction>> {
        Ok(self
            .working
            .actions
            .values()
            .find(|a| a.flow_id == flow_id && a.kind() == flowline_flow::ActionKind::FlowStart)
            .cloned())
    }

    async fn get_next_actions(&mut self, action_id: FlowActionId) -> Result<Vec<FlowAction>> {
        let ids = self
            .working
            .links
            .iter()
            .filter(|(from, _)| *from == action_id)
            .map(|(_, to)| *to);
        Ok(self.working.sorted_actions(ids))
    }

    async fn get_prev_actions(&mut self, action_id: FlowActionId) -> Result<Vec<FlowAction>> {
        let ids = self
            .working
            .links
            .iter()
            .filter(|(_, to)| *to == action_id)
            .map(|(from, _)| *from);
        Ok(self.working.sorted_actions(ids))
    }

    async fn merge_participant(&mut self, participant: &FlowParticipant) -> Result<()> {
        self.working
            .participants
            .insert(participant.id, participant.clone());
        Ok(())
    }

    async fn get_participant(
        &mut self,
        flow_id: FlowId,
        entity: &EntityRef,
    ) -> Result<Option<FlowParticipant>> {
        Ok(self
            .working
            .participants
            .values()
            .find(|p| p.flow_id == flow_id && &p.entity == entity)
            .cloned())
    }

    async fn get_participant_by_id(
        &mut self,
        participant_id: ParticipantId,
    ) -> Result<Option<FlowParticipant>> {
        Ok(self.working.participants.get(&participant_id).cloned())
    }

    async fn list_participants(&mut self, flow_id: FlowId) -> Result<Vec<FlowParticipant>> {
        Ok(self
            .working
            .participants
            .values()
            .filter(|p| p.flow_id == flow_id)
            .cloned()
            .collect())
    }

    async fn count_participants_with_status(
        &mut self,
        flow_id: FlowId,
        status: ParticipantStatus,
    ) -> Result<i64> {
        let count = self
            .working
            .participants
            .values()
            .filter(|p| p.flow_id == flow_id && p.status == status)
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }

    async fn merge_execution(&mut self, execution: &FlowActionExecution) -> Result<()> {
        match self
            .working
            .executions
            .iter_mut()
            .find(|e| e.id == execution.id)
        {
            Some(existing) => *existing = execution.clone(),
            None => self.working.executions.push(execution.clone()),
        }
        Ok(())
    }

    async fn get_execution(&mut self, execution_id: ExecutionId) -> Result<Option<FlowActionExecution>> {
        Ok(self
            .working
            .executions
            .iter()
            .find(|e| e.id == execution_id)
            .cloned())
    }

    async fn list_executions_for_entity(
        &mut self,
        flow_id: FlowId,
        entity: &EntityRef,
    ) -> Result<Vec<FlowActionExecution>> {
        Ok(self.working.executions_for(flow_id, entity))
    }

    async fn get_executions_scheduled_before(
        &mut self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FlowActionExecution>> {
        let mut due: Vec<_> = self
            .working
            .executions
            .iter()
            .filter(|e| e.status.is_due_candidate() && e.scheduled_at < before)
            .cloned()
            .collect();
        due.sort_by_key(|e| e.scheduled_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn merge_execution_settings(&mut self, settings: &FlowExecutionSettings) -> Result<()> {
        let existing = self
            .working
            .settings
            .iter_mut()
            .find(|s| s.flow_id == settings.flow_id && s.entity == settings.entity);
        match existing {
            Some(existing) => *existing = settings.clone(),
            None => self.working.settings.push(settings.clone()),
        }
        Ok(())
    }

    async fn get_execution_settings(
        &mut self,
        flow_id: FlowId,
        entity: &EntityRef,
    ) -> Result<Option<FlowExecutionSettings>> {
        Ok(self
            .working
            .settings
            .iter()
            .find(|s| s.flow_id == flow_id && &s.entity == entity)
            .cloned())
    }

    async fn merge_sender(&mut self, sender: &FlowSender) -> Result<()> {
        match self.working.senders.iter_mut().find(|s| s.id == sender.id) {
            Some(existing) => *existing = sender.clone(),
            None => self.working.senders.push(sender.clone()),
        }
        Ok(())
    }

    async fn list_senders(&mut self, flow_id: FlowId) -> Result<Vec<FlowSender>> {
        Ok(self
            .working
            .senders
            .iter()
            .filter(|s| s.flow_id == flow_id)
            .cloned()
            .collect())
    }

    async fn delete_sender(&mut self, flow_id: FlowId, sender_id: SenderId) -> Result<bool> {
        let before = self.working.senders.len();
        self.working
            .senders
            .retain(|s| !(s.flow_id == flow_id && s.id == sender_id));
        Ok(self.working.senders.len() != before)
    }

    async fn record_billable_event(&mut self, event: &BillableEvent) -> Result<()> {
        self.working.billable_events.push(event.clone());
        Ok(())
    }
}

#[async_trait]
impl EmailQueue for InMemoryTransaction {
    async fn enqueue_email(&mut self, message: &EmailMessage) -> Result<()> {
        self.working.emails.push(message.clone());
        Ok(())
    }

    async fn find_email_by_producer(
        &mut self,
        producer_type: &str,
        producer_id: ExecutionId,
    ) -> Result<Option<EmailMessage>> {
        Ok(self
            .working
            .emails
            .iter()
            .find(|e| e.producer_type == producer_type && e.producer_id == producer_id)
            .cloned())
    }
}

#[async_trait]
impl MailboxRepository for InMemoryTransaction {
    async fn get_mailbox(&mut self, username: &str) -> Result<Option<Mailbox>> {
        Ok(self.working.mailboxes.get(username).cloned())
    }

    async fn list_mailboxes_by_username(&mut self, username: &str) -> Result<Vec<Mailbox>> {
        Ok(self.working.mailboxes.get(username).cloned().into_iter().collect())
    }

    async fn list_mailboxes_for_ramp_up(&mut self) -> Result<Vec<Mailbox>> {
        Ok(self
            .working
            .mailboxes
            .values()
            .filter(|m| m.ramp_up_current < m.ramp_up_max)
            .cloned()
            .collect())
    }

    async fn merge_mailbox(&mut self, mailbox: &Mailbox) -> Result<()> {
        self.working
            .mailboxes
            .insert(mailbox.username.clone(), mailbox.clone());
        Ok(())
    }
}

#[async_trait]
impl WorkingScheduleRepository for InMemoryTransaction {
    async fn working_schedules_for_user(&mut self, user_id: UserId) -> Result<Vec<UserWorkingSchedule>> {
        Ok(self
            .working
            .schedules
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MailboxLedger for InMemoryTransaction {
    async fn last_execution_for_mailbox(&mut self, mailbox: &str) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .working
            .executions
            .iter()
            .filter(|e| e.mailbox.as_deref() == Some(mailbox))
            .map(|e| e.scheduled_at)
            .max())
    }

    async fn count_executions_for_mailbox_in_day(&mut self, mailbox: &str, day: NaiveDate) -> Result<u64> {
        let count = self
            .working
            .executions
            .iter()
            .filter(|e| {
                e.mailbox.as_deref() == Some(mailbox)
                    && e.status.counts_against_quota()
                    && e.scheduled_at.date_naive() == day
            })
            .count();
        Ok(count as u64)
    }
}

#[async_trait]
impl Transaction for InMemoryTransaction {
    async fn lock_flow(&mut self, _flow_id: FlowId) -> Result<()> {
        Ok(())
    }

    async fn lock_participant(&mut self, _flow_id: FlowId, _entity: &EntityRef) -> Result<()> {
        Ok(())
    }

    async fn lock_mailbox(&mut self, _mailbox: &str) -> Result<()> {
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let Self {
            mut guard,
            tenant,
            working,
        } = self;
        guard.insert(tenant, working);
        Ok(())
    }
}

/// A [`Directory`] backed by maps.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    entities: Mutex<HashMap<(Tenant, EntityRef), EntityProfile>>,
    users: Mutex<HashMap<(Tenant, UserId), UserProfile>>,
}

impl InMemoryDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_entity(&self, tenant: &Tenant, entity: EntityRef, profile: EntityProfile) {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((tenant.clone(), entity), profile);
    }

    pub fn put_user(&self, tenant: &Tenant, profile: UserProfile) {
        self.users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((tenant.clone(), profile.id), profile);
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn entity_profile(&self, tenant: &Tenant, entity: &EntityRef) -> Result<Option<EntityProfile>> {
        Ok(self
            .entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(tenant.clone(), entity.clone()))
            .cloned())
    }

    async fn user_profile(&self, tenant: &Tenant, user_id: UserId) -> Result<Option<UserProfile>> {
        Ok(self
            .users
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(tenant.clone(), user_id))
            .cloned())
    }
}

/// An [`EventBus`] that keeps every published envelope.
#[derive(Debug, Default)]
pub struct RecordingEventBus {
    published: Mutex<Vec<Envelope>>,
}

impl RecordingEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn envelopes(&self) -> Vec<Envelope> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Decoded events, in publication order.
    #[must_use]
    pub fn events(&self) -> Vec<FlowEvent> {
        self.envelopes()
            .iter()
            .filter_map(|e| e.decode().ok())
            .collect()
    }

    /// Removes and returns every envelope published so far.
    pub fn drain(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.published.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl EventBus for RecordingEventBus {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope.clone());
        Ok(())
    }
}

/// A notification captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub workflow_id: String,
    pub to: Recipient,
    pub subject: String,
    pub template_data: Value,
}

/// A [`Notifier`] that keeps every notification.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        workflow_id: &str,
        to: &Recipient,
        subject: &str,
        template_data: &Value,
    ) -> Result<()> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(SentNotification {
                workflow_id: workflow_id.to_string(),
                to: to.clone(),
                subject: subject.to_string(),
                template_data: template_data.clone(),
            });
        Ok(())
    }
}
