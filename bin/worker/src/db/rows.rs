//! Row types for the flow tables and their conversion into domain records.

use super::parse_column;
use chrono::{DateTime, Utc};
use flowline_core::EntityRef;
use flowline_flow::{
    ActionData, AuthorGraph, Flow, FlowAction, FlowActionExecution, FlowCounters,
    FlowExecutionSettings, FlowParticipant, FlowSender,
};
use sqlx::FromRow;
use sqlx::types::Json;

fn entity(entity_type: &str, entity_id: String) -> Result<EntityRef, sqlx::Error> {
    Ok(EntityRef::new(
        entity_id,
        parse_column("entity type", entity_type)?,
    ))
}

#[derive(FromRow)]
pub(super) struct FlowRow {
    id: String,
    name: String,
    description: Option<String>,
    status: String,
    first_started_at: Option<DateTime<Utc>>,
    graph: Json<AuthorGraph>,
    counters: Json<FlowCounters>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl FlowRow {
    pub(super) fn try_into_flow(self) -> Result<Flow, sqlx::Error> {
        Ok(Flow {
            id: parse_column("flow id", &self.id)?,
            name: self.name,
            description: self.description,
            status: parse_column("flow status", &self.status)?,
            first_started_at: self.first_started_at,
            graph: self.graph.0,
            counters: self.counters.0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct ActionRow {
    id: String,
    flow_id: String,
    external_id: String,
    node_type: String,
    data: Json<ActionData>,
    updated_at: DateTime<Utc>,
}

impl ActionRow {
    pub(super) fn try_into_action(self) -> Result<FlowAction, sqlx::Error> {
        Ok(FlowAction {
            id: parse_column("action id", &self.id)?,
            flow_id: parse_column("flow id", &self.flow_id)?,
            external_id: self.external_id,
            node_type: self.node_type,
            data: self.data.0,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct ParticipantRow {
    id: String,
    flow_id: String,
    entity_type: String,
    entity_id: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ParticipantRow {
    pub(super) fn try_into_participant(self) -> Result<FlowParticipant, sqlx::Error> {
        Ok(FlowParticipant {
            id: parse_column("participant id", &self.id)?,
            flow_id: parse_column("flow id", &self.flow_id)?,
            entity: entity(&self.entity_type, self.entity_id)?,
            status: parse_column("participant status", &self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct ExecutionRow {
    id: String,
    flow_id: String,
    action_id: String,
    entity_type: String,
    entity_id: String,
    mailbox: Option<String>,
    scheduled_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    status: String,
    status_updated_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl ExecutionRow {
    pub(super) fn try_into_execution(self) -> Result<FlowActionExecution, sqlx::Error> {
        Ok(FlowActionExecution {
            id: parse_column("execution id", &self.id)?,
            flow_id: parse_column("flow id", &self.flow_id)?,
            action_id: parse_column("action id", &self.action_id)?,
            entity: entity(&self.entity_type, self.entity_id)?,
            mailbox: self.mailbox,
            scheduled_at: self.scheduled_at,
            executed_at: self.executed_at,
            status: parse_column("execution status", &self.status)?,
            status_updated_at: self.status_updated_at,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
pub(super) struct SettingsRow {
    id: String,
    flow_id: String,
    entity_type: String,
    entity_id: String,
    mailbox: Option<String>,
    user_id: Option<String>,
}

impl SettingsRow {
    pub(super) fn try_into_settings(self) -> Result<FlowExecutionSettings, sqlx::Error> {
        Ok(FlowExecutionSettings {
            id: parse_column("settings id", &self.id)?,
            flow_id: parse_column("flow id", &self.flow_id)?,
            entity: entity(&self.entity_type, self.entity_id)?,
            mailbox: self.mailbox,
            user_id: self
                .user_id
                .as_deref()
                .map(|id| parse_column("user id", id))
                .transpose()?,
        })
    }
}

#[derive(FromRow)]
pub(super) struct SenderRow {
    id: String,
    flow_id: String,
    user_id: String,
}

impl SenderRow {
    pub(super) fn try_into_sender(self) -> Result<FlowSender, sqlx::Error> {
        Ok(FlowSender {
            id: parse_column("sender id", &self.id)?,
            flow_id: parse_column("flow id", &self.flow_id)?,
            user_id: parse_column("user id", &self.user_id)?,
        })
    }
}

/// Converts every row, failing on the first malformed one.
pub(super) fn convert_all<R, T>(
    rows: Vec<R>,
    convert: impl Fn(R) -> Result<T, sqlx::Error>,
) -> Result<Vec<T>, sqlx::Error> {
    rows.into_iter().map(convert).collect()
}
