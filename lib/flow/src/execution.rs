//! Action executions and billable events.
//!
//! An execution is one scheduled or historical run of an action for a
//! participant. Rows are never deleted; the status records how the run ended.

use crate::action::ActionKind;
use chrono::{DateTime, Utc};
use flowline_core::{BillableEventId, EntityRef, ExecutionId, FlowActionId, FlowId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The state of an action execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    /// Waiting for its scheduled time.
    Scheduled,
    /// Ran successfully.
    Success,
    /// The participant failed its requirements at fire time. Not retried.
    BusinessError,
    /// A retryable failure; the sweeper picks it up again.
    TechError,
}

impl ExecutionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Success => "SUCCESS",
            Self::BusinessError => "BUSINESS_ERROR",
            Self::TechError => "TECH_ERROR",
        }
    }

    /// Returns true if the sweeper should (re)process an execution in this
    /// status.
    #[must_use]
    pub fn is_due_candidate(&self) -> bool {
        matches!(self, Self::Scheduled | Self::TechError)
    }

    /// Returns true if this execution consumes mailbox capacity on the day
    /// of its `scheduled_at`. TECH_ERROR rows keep their slot because a
    /// retry sends on that same day.
    #[must_use]
    pub fn counts_against_quota(&self) -> bool {
        matches!(self, Self::Scheduled | Self::Success | Self::TechError)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(Self::Scheduled),
            "SUCCESS" => Ok(Self::Success),
            "BUSINESS_ERROR" => Ok(Self::BusinessError),
            "TECH_ERROR" => Ok(Self::TechError),
            other => Err(format!("unknown execution status: {other}")),
        }
    }
}

/// A scheduled or historical run of an action for one participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowActionExecution {
    pub id: ExecutionId,
    pub flow_id: FlowId,
    pub action_id: FlowActionId,
    #[serde(flatten)]
    pub entity: EntityRef,
    /// The sending mailbox address, for email actions.
    pub mailbox: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub status_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl FlowActionExecution {
    /// Creates a SCHEDULED execution.
    #[must_use]
    pub fn scheduled(
        flow_id: FlowId,
        action_id: FlowActionId,
        entity: EntityRef,
        mailbox: Option<String>,
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: ExecutionId::new(),
            flow_id,
            action_id,
            entity,
            mailbox,
            scheduled_at,
            executed_at: None,
            status: ExecutionStatus::Scheduled,
            status_updated_at: now,
            created_at: now,
        }
    }

    /// Marks the execution as run successfully.
    pub fn succeed(&mut self, now: DateTime<Utc>) {
        self.status = ExecutionStatus::Success;
        self.executed_at = Some(now);
        self.status_updated_at = now;
    }

    /// Marks the execution as failed with the given error status.
    pub fn fail(&mut self, status: ExecutionStatus, now: DateTime<Utc>) {
        self.status = status;
        self.status_updated_at = now;
    }
}

/// The kind recorded on billable events for processed executions.
pub const FLOW_ACTION_EXECUTED: &str = "FLOW_ACTION_EXECUTED";

/// A usage record written when an execution is processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillableEvent {
    pub id: BillableEventId,
    pub kind: String,
    /// The action kind that ran.
    pub subtype: ActionKind,
    pub flow_id: FlowId,
    pub execution_id: ExecutionId,
    #[serde(flatten)]
    pub entity: EntityRef,
    pub created_at: DateTime<Utc>,
}

impl BillableEvent {
    /// Creates the billable event for a processed execution.
    #[must_use]
    pub fn for_execution(
        execution: &FlowActionExecution,
        subtype: ActionKind,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: BillableEventId::new(),
            kind: FLOW_ACTION_EXECUTED.to_string(),
            subtype,
            flow_id: execution.flow_id,
            execution_id: execution.id,
            entity: execution.entity.clone(),
            created_at: now,
        }
    }
}
