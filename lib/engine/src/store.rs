//! Storage abstractions for the engine.
//!
//! Every mutating engine operation runs inside one [`Transaction`] obtained
//! from [`FlowStore::begin`]. A transaction is scoped to a tenant and covers
//! the flow store, mailbox store, working-schedule store and outbound email
//! queue. Dropping a transaction without calling [`Transaction::commit`]
//! rolls it back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_core::{
    EntityRef, ExecutionId, FlowActionId, FlowId, ParticipantId, Result, SenderId, Tenant,
};
use flowline_flow::{
    BillableEvent, EmailMessage, Flow, FlowAction, FlowActionExecution, FlowExecutionSettings,
    FlowParticipant, FlowSender, ParticipantStatus,
};
use flowline_scheduler::{MailboxLedger, MailboxRepository, WorkingScheduleRepository};

/// Flow, action, participant, execution, settings and sender persistence.
#[async_trait]
pub trait FlowRepository: Send {
    async fn get_flow(&mut self, flow_id: FlowId) -> Result<Option<Flow>>;
    async fn list_flows(&mut self) -> Result<Vec<Flow>>;
    async fn merge_flow(&mut self, flow: &Flow) -> Result<()>;
    /// Deletes every action and NEXT link of a flow.
    async fn delete_flow_actions(&mut self, flow_id: FlowId) -> Result<()>;

    async fn merge_flow_action(&mut self, action: &FlowAction) -> Result<()>;
    /// Adds a NEXT link from `from` to `to`.
    async fn link_next(&mut self, from: FlowActionId, to: FlowActionId) -> Result<()>;
    async fn get_action(&mut self, action_id: FlowActionId) -> Result<Option<FlowAction>>;
    async fn list_actions(&mut self, flow_id: FlowId) -> Result<Vec<FlowAction>>;
    async fn get_start_action(&mut self, flow_id: FlowId) -> Result<Option<FlowAction>>;
    /// Successors of an action, ordered by id.
    async fn get_next_actions(&mut self, action_id: FlowActionId) -> Result<Vec<FlowAction>>;
    /// Predecessors of an action, ordered by id.
    async fn get_prev_actions(&mut self, action_id: FlowActionId) -> Result<Vec<FlowAction>>;

    async fn merge_participant(&mut self, participant: &FlowParticipant) -> Result<()>;
    async fn get_participant(
        &mut self,
        flow_id: FlowId,
        entity: &EntityRef,
    ) -> Result<Option<FlowParticipant>>;
    async fn get_participant_by_id(
        &mut self,
        participant_id: ParticipantId,
    ) -> Result<Option<FlowParticipant>>;
    async fn list_participants(&mut self, flow_id: FlowId) -> Result<Vec<FlowParticipant>>;
    async fn count_participants_with_status(
        &mut self,
        flow_id: FlowId,
        status: ParticipantStatus,
    ) -> Result<i64>;

    async fn merge_execution(&mut self, execution: &FlowActionExecution) -> Result<()>;
    async fn get_execution(&mut self, execution_id: ExecutionId) -> Result<Option<FlowActionExecution>>;
    /// Executions of one participant, ordered by `scheduledAt` then creation.
    async fn list_executions_for_entity(
        &mut self,
        flow_id: FlowId,
        entity: &EntityRef,
    ) -> Result<Vec<FlowActionExecution>>;
    /// SCHEDULED and TECH_ERROR executions due before `before`, oldest
    /// first, at most `limit`.
    async fn get_executions_scheduled_before(
        &mut self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FlowActionExecution>>;

    async fn merge_execution_settings(&mut self, settings: &FlowExecutionSettings) -> Result<()>;
    async fn get_execution_settings(
        &mut self,
        flow_id: FlowId,
        entity: &EntityRef,
    ) -> Result<Option<FlowExecutionSettings>>;

    async fn merge_sender(&mut self, sender: &FlowSender) -> Result<()>;
    async fn list_senders(&mut self, flow_id: FlowId) -> Result<Vec<FlowSender>>;
    /// Returns false if no such sender existed.
    async fn delete_sender(&mut self, flow_id: FlowId, sender_id: SenderId) -> Result<bool>;

    async fn record_billable_event(&mut self, event: &BillableEvent) -> Result<()>;
}

/// The outbound email queue.
#[async_trait]
pub trait EmailQueue: Send {
    async fn enqueue_email(&mut self, message: &EmailMessage) -> Result<()>;

    /// Looks up the message produced by `(producer_type, producer_id)`.
    async fn find_email_by_producer(
        &mut self,
        producer_type: &str,
        producer_id: ExecutionId,
    ) -> Result<Option<EmailMessage>>;
}

/// A tenant-scoped unit of work.
#[async_trait]
pub trait Transaction:
    FlowRepository
    + EmailQueue
    + MailboxRepository
    + WorkingScheduleRepository
    + MailboxLedger
    + Send
{
    /// Serializes compile and status changes on a flow.
    async fn lock_flow(&mut self, flow_id: FlowId) -> Result<()>;

    /// Single-writer lock on a participant for the rest of the transaction.
    async fn lock_participant(&mut self, flow_id: FlowId, entity: &EntityRef) -> Result<()>;

    /// Serializes slot allocation on a mailbox.
    async fn lock_mailbox(&mut self, mailbox: &str) -> Result<()>;

    /// Commits every change made in this transaction.
    async fn commit(self) -> Result<()>;
}

/// Entry point to the engine's persistent state.
#[async_trait]
pub trait FlowStore: Send + Sync {
    type Tx: Transaction;

    /// Opens a transaction for a tenant.
    async fn begin(&self, tenant: &Tenant) -> Result<Self::Tx>;

    /// Lists the tenants with any flow, for the periodic workers.
    async fn tenants(&self) -> Result<Vec<Tenant>>;
}
