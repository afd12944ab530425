//! Flow store: flows, actions, participants, executions, senders, billing.

use super::rows::{
    ActionRow, ExecutionRow, FlowRow, ParticipantRow, SenderRow, SettingsRow, convert_all,
};
use super::{PgTransaction, db_error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_core::{
    EntityRef, ExecutionId, FlowActionId, FlowId, ParticipantId, Result, SenderId,
};
use flowline_engine::FlowRepository;
use flowline_flow::{
    ActionKind, BillableEvent, Flow, FlowAction, FlowActionExecution, FlowExecutionSettings,
    FlowParticipant, FlowSender, ParticipantStatus,
};
use sqlx::types::Json;

const FLOW_COLUMNS: &str = "id, name, description, status, first_started_at, graph, counters, created_at, updated_at";
const ACTION_COLUMNS: &str = "a.id, a.flow_id, a.external_id, a.node_type, a.data, a.updated_at";
const PARTICIPANT_COLUMNS: &str = "id, flow_id, entity_type, entity_id, status, created_at, updated_at";
const EXECUTION_COLUMNS: &str = "id, flow_id, action_id, entity_type, entity_id, mailbox, scheduled_at, executed_at, status, status_updated_at, created_at";

fn decode(e: sqlx::Error) -> flowline_core::EngineError {
    db_error("failed to decode row", e)
}

impl PgTransaction {
    async fn linked_actions(&mut self, sql: &str, action_id: FlowActionId) -> Result<Vec<FlowAction>> {
        let rows: Vec<ActionRow> = sqlx::query_as(sql)
            .bind(self.tenant.as_str())
            .bind(action_id.to_string())
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| db_error("failed to load linked actions", e))?;
        Ok(convert_all(rows, ActionRow::try_into_action).map_err(decode)?)
    }
}

#[async_trait]
impl FlowRepository for PgTransaction {
    async fn get_flow(&mut self, flow_id: FlowId) -> Result<Option<Flow>> {
        let row: Option<FlowRow> = sqlx::query_as(&format!(
            "SELECT {FLOW_COLUMNS} FROM flows WHERE tenant = $1 AND id = $2"
        ))
        .bind(self.tenant.as_str())
        .bind(flow_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load flow", e))?;
        Ok(row.map(FlowRow::try_into_flow).transpose().map_err(decode)?)
    }

    async fn list_flows(&mut self) -> Result<Vec<Flow>> {
        let rows: Vec<FlowRow> = sqlx::query_as(&format!(
            "SELECT {FLOW_COLUMNS} FROM flows WHERE tenant = $1 ORDER BY id"
        ))
        .bind(self.tenant.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to list flows", e))?;
        Ok(convert_all(rows, FlowRow::try_into_flow).map_err(decode)?)
    }

    async fn merge_flow(&mut self, flow: &Flow) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flows (tenant, id, name, description, status, first_started_at, graph, counters, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (tenant, id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                status = EXCLUDED.status,
                first_started_at = EXCLUDED.first_started_at,
                graph = EXCLUDED.graph,
                counters = EXCLUDED.counters,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(flow.id.to_string())
        .bind(&flow.name)
        .bind(&flow.description)
        .bind(flow.status.as_str())
        .bind(flow.first_started_at)
        .bind(Json(&flow.graph))
        .bind(Json(&flow.counters))
        .bind(flow.created_at)
        .bind(flow.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to save flow", e))?;
        Ok(())
    }

    async fn delete_flow_actions(&mut self, flow_id: FlowId) -> Result<()> {
        sqlx::query(
            r#"
            DELETE FROM flow_action_links l
            USING flow_actions a
            WHERE l.tenant = $1 AND a.tenant = $1 AND a.flow_id = $2
              AND (l.from_id = a.id OR l.to_id = a.id)
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(flow_id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to delete action links", e))?;

        sqlx::query("DELETE FROM flow_actions WHERE tenant = $1 AND flow_id = $2")
            .bind(self.tenant.as_str())
            .bind(flow_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("failed to delete actions", e))?;
        Ok(())
    }

    async fn merge_flow_action(&mut self, action: &FlowAction) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flow_actions (tenant, id, flow_id, external_id, node_type, kind, data, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant, id) DO UPDATE SET
                external_id = EXCLUDED.external_id,
                node_type = EXCLUDED.node_type,
                kind = EXCLUDED.kind,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(action.id.to_string())
        .bind(action.flow_id.to_string())
        .bind(&action.external_id)
        .bind(&action.node_type)
        .bind(action.kind().as_str())
        .bind(Json(&action.data))
        .bind(action.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to save action", e))?;
        Ok(())
    }

    async fn link_next(&mut self, from: FlowActionId, to: FlowActionId) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flow_action_links (tenant, from_id, to_id)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(from.to_string())
        .bind(to.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to link actions", e))?;
        Ok(())
    }

    async fn get_action(&mut self, action_id: FlowActionId) -> Result<Option<FlowAction>> {
        let row: Option<ActionRow> = sqlx::query_as(&format!(
            "SELECT {ACTION_COLUMNS} FROM flow_actions a WHERE a.tenant = $1 AND a.id = $2"
        ))
        .bind(self.tenant.as_str())
        .bind(action_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load action", e))?;
        Ok(row.map(ActionRow::try_into_action).transpose().map_err(decode)?)
    }

    async fn list_actions(&mut self, flow_id: FlowId) -> Result<Vec<FlowAction>> {
        let rows: Vec<ActionRow> = sqlx::query_as(&format!(
            "SELECT {ACTION_COLUMNS} FROM flow_actions a WHERE a.tenant = $1 AND a.flow_id = $2 ORDER BY a.id"
        ))
        .bind(self.tenant.as_str())
        .bind(flow_id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to list actions", e))?;
        Ok(convert_all(rows, ActionRow::try_into_action).map_err(decode)?)
    }

    async fn get_start_action(&mut self, flow_id: FlowId) -> Result<Option<FlowAction>> {
        let row: Option<ActionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {ACTION_COLUMNS} FROM flow_actions a
            WHERE a.tenant = $1 AND a.flow_id = $2 AND a.kind = $3
            ORDER BY a.id
            LIMIT 1
            "#
        ))
        .bind(self.tenant.as_str())
        .bind(flow_id.to_string())
        .bind(ActionKind::FlowStart.as_str())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load start action", e))?;
        Ok(row.map(ActionRow::try_into_action).transpose().map_err(decode)?)
    }

    async fn get_next_actions(&mut self, action_id: FlowActionId) -> Result<Vec<FlowAction>> {
        let sql = format!(
            r#"
            SELECT {ACTION_COLUMNS} FROM flow_action_links l
            JOIN flow_actions a ON a.tenant = l.tenant AND a.id = l.to_id
            WHERE l.tenant = $1 AND l.from_id = $2
            ORDER BY a.id
            "#
        );
        self.linked_actions(&sql, action_id).await
    }

    async fn get_prev_actions(&mut self, action_id: FlowActionId) -> Result<Vec<FlowAction>> {
        let sql = format!(
            r#"
            SELECT {ACTION_COLUMNS} FROM flow_action_links l
            JOIN flow_actions a ON a.tenant = l.tenant AND a.id = l.from_id
            WHERE l.tenant = $1 AND l.to_id = $2
            ORDER BY a.id
            "#
        );
        self.linked_actions(&sql, action_id).await
    }

    async fn merge_participant(&mut self, participant: &FlowParticipant) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flow_participants (tenant, id, flow_id, entity_type, entity_id, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (tenant, id) DO UPDATE SET
                status = EXCLUDED.status,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(participant.id.to_string())
        .bind(participant.flow_id.to_string())
        .bind(participant.entity.entity_type.as_str())
        .bind(&participant.entity.entity_id)
        .bind(participant.status.as_str())
        .bind(participant.created_at)
        .bind(participant.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to save participant", e))?;
        Ok(())
    }

    async fn get_participant(
        &mut self,
        flow_id: FlowId,
        entity: &EntityRef,
    ) -> Result<Option<FlowParticipant>> {
        let row: Option<ParticipantRow> = sqlx::query_as(&format!(
            r#"
            SELECT {PARTICIPANT_COLUMNS} FROM flow_participants
            WHERE tenant = $1 AND flow_id = $2 AND entity_type = $3 AND entity_id = $4
            "#
        ))
        .bind(self.tenant.as_str())
        .bind(flow_id.to_string())
        .bind(entity.entity_type.as_str())
        .bind(&entity.entity_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load participant", e))?;
        Ok(row
            .map(ParticipantRow::try_into_participant)
            .transpose()
            .map_err(decode)?)
    }

    async fn get_participant_by_id(
        &mut self,
        participant_id: ParticipantId,
    ) -> Result<Option<FlowParticipant>> {
        let row: Option<ParticipantRow> = sqlx::query_as(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM flow_participants WHERE tenant = $1 AND id = $2"
        ))
        .bind(self.tenant.as_str())
        .bind(participant_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load participant", e))?;
        Ok(row
            .map(ParticipantRow::try_into_participant)
            .transpose()
            .map_err(decode)?)
    }

    async fn list_participants(&mut self, flow_id: FlowId) -> Result<Vec<FlowParticipant>> {
        let rows: Vec<ParticipantRow> = sqlx::query_as(&format!(
            "SELECT {PARTICIPANT_COLUMNS} FROM flow_participants WHERE tenant = $1 AND flow_id = $2 ORDER BY id"
        ))
        .bind(self.tenant.as_str())
        .bind(flow_id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to list participants", e))?;
        Ok(convert_all(rows, ParticipantRow::try_into_participant).map_err(decode)?)
    }

    async fn count_participants_with_status(
        &mut self,
        flow_id: FlowId,
        status: ParticipantStatus,
    ) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM flow_participants WHERE tenant = $1 AND flow_id = $2 AND status = $3",
        )
        .bind(self.tenant.as_str())
        .bind(flow_id.to_string())
        .bind(status.as_str())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to count participants", e))?;
        Ok(count)
    }

    async fn merge_execution(&mut self, execution: &FlowActionExecution) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flow_action_executions
                (tenant, id, flow_id, action_id, entity_type, entity_id, mailbox, scheduled_at,
                 executed_at, status, status_updated_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (tenant, id) DO UPDATE SET
                mailbox = EXCLUDED.mailbox,
                scheduled_at = EXCLUDED.scheduled_at,
                executed_at = EXCLUDED.executed_at,
                status = EXCLUDED.status,
                status_updated_at = EXCLUDED.status_updated_at
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(execution.id.to_string())
        .bind(execution.flow_id.to_string())
        .bind(execution.action_id.to_string())
        .bind(execution.entity.entity_type.as_str())
        .bind(&execution.entity.entity_id)
        .bind(&execution.mailbox)
        .bind(execution.scheduled_at)
        .bind(execution.executed_at)
        .bind(execution.status.as_str())
        .bind(execution.status_updated_at)
        .bind(execution.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to save execution", e))?;
        Ok(())
    }

    async fn get_execution(&mut self, execution_id: ExecutionId) -> Result<Option<FlowActionExecution>> {
        let row: Option<ExecutionRow> = sqlx::query_as(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM flow_action_executions WHERE tenant = $1 AND id = $2"
        ))
        .bind(self.tenant.as_str())
        .bind(execution_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load execution", e))?;
        Ok(row
            .map(ExecutionRow::try_into_execution)
            .transpose()
            .map_err(decode)?)
    }

    async fn list_executions_for_entity(
        &mut self,
        flow_id: FlowId,
        entity: &EntityRef,
    ) -> Result<Vec<FlowActionExecution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS} FROM flow_action_executions
            WHERE tenant = $1 AND flow_id = $2 AND entity_type = $3 AND entity_id = $4
            ORDER BY scheduled_at, created_at
            "#
        ))
        .bind(self.tenant.as_str())
        .bind(flow_id.to_string())
        .bind(entity.entity_type.as_str())
        .bind(&entity.entity_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to list executions", e))?;
        Ok(convert_all(rows, ExecutionRow::try_into_execution).map_err(decode)?)
    }

    async fn get_executions_scheduled_before(
        &mut self,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FlowActionExecution>> {
        let rows: Vec<ExecutionRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EXECUTION_COLUMNS} FROM flow_action_executions
            WHERE tenant = $1 AND status IN ('SCHEDULED', 'TECH_ERROR') AND scheduled_at < $2
            ORDER BY scheduled_at
            LIMIT $3
            "#
        ))
        .bind(self.tenant.as_str())
        .bind(before)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load due executions", e))?;
        Ok(convert_all(rows, ExecutionRow::try_into_execution).map_err(decode)?)
    }

    async fn merge_execution_settings(&mut self, settings: &FlowExecutionSettings) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flow_execution_settings (tenant, id, flow_id, entity_type, entity_id, mailbox, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant, flow_id, entity_type, entity_id) DO UPDATE SET
                mailbox = EXCLUDED.mailbox,
                user_id = EXCLUDED.user_id
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(settings.id.to_string())
        .bind(settings.flow_id.to_string())
        .bind(settings.entity.entity_type.as_str())
        .bind(&settings.entity.entity_id)
        .bind(&settings.mailbox)
        .bind(settings.user_id.map(|id| id.to_string()))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to save execution settings", e))?;
        Ok(())
    }

    async fn get_execution_settings(
        &mut self,
        flow_id: FlowId,
        entity: &EntityRef,
    ) -> Result<Option<FlowExecutionSettings>> {
        let row: Option<SettingsRow> = sqlx::query_as(
            r#"
            SELECT id, flow_id, entity_type, entity_id, mailbox, user_id
            FROM flow_execution_settings
            WHERE tenant = $1 AND flow_id = $2 AND entity_type = $3 AND entity_id = $4
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(flow_id.to_string())
        .bind(entity.entity_type.as_str())
        .bind(&entity.entity_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load execution settings", e))?;
        Ok(row
            .map(SettingsRow::try_into_settings)
            .transpose()
            .map_err(decode)?)
    }

    async fn merge_sender(&mut self, sender: &FlowSender) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flow_senders (tenant, id, flow_id, user_id)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (tenant, id) DO UPDATE SET user_id = EXCLUDED.user_id
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(sender.id.to_string())
        .bind(sender.flow_id.to_string())
        .bind(sender.user_id.to_string())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to save sender", e))?;
        Ok(())
    }

    async fn list_senders(&mut self, flow_id: FlowId) -> Result<Vec<FlowSender>> {
        let rows: Vec<SenderRow> = sqlx::query_as(
            "SELECT id, flow_id, user_id FROM flow_senders WHERE tenant = $1 AND flow_id = $2 ORDER BY id",
        )
        .bind(self.tenant.as_str())
        .bind(flow_id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to list senders", e))?;
        Ok(convert_all(rows, SenderRow::try_into_sender).map_err(decode)?)
    }

    async fn delete_sender(&mut self, flow_id: FlowId, sender_id: SenderId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flow_senders WHERE tenant = $1 AND flow_id = $2 AND id = $3")
            .bind(self.tenant.as_str())
            .bind(flow_id.to_string())
            .bind(sender_id.to_string())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("failed to delete sender", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn record_billable_event(&mut self, event: &BillableEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO billable_events
                (tenant, id, kind, subtype, flow_id, execution_id, entity_type, entity_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(event.id.to_string())
        .bind(&event.kind)
        .bind(event.subtype.as_str())
        .bind(event.flow_id.to_string())
        .bind(event.execution_id.to_string())
        .bind(event.entity.entity_type.as_str())
        .bind(&event.entity.entity_id)
        .bind(event.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to record billable event", e))?;
        Ok(())
    }
}
