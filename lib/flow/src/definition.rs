//! Flow definition types.
//!
//! A flow is a named outbound sequence that consists of:
//! - Metadata (name, description, timestamps)
//! - An ON/OFF status gating both editing and scheduling
//! - The authoring graph as last saved
//! - Denormalized participant counters

use crate::author::AuthorGraph;
use crate::participant::ParticipantStatus;
use chrono::{DateTime, Utc};
use flowline_core::FlowId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Whether a flow is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlowStatus {
    /// Editable; no new executions are emitted.
    Off,
    /// Running; the graph is frozen.
    On,
}

impl FlowStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::On => "ON",
        }
    }
}

impl fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FlowStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OFF" => Ok(Self::Off),
            "ON" => Ok(Self::On),
            other => Err(format!("unknown flow status: {other}")),
        }
    }
}

/// Participant counts per status, kept on the flow row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowCounters {
    pub on_hold: i64,
    pub ready: i64,
    pub scheduled: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub goal_achieved: i64,
    pub total: i64,
}

impl FlowCounters {
    /// Builds counters from per-status counts; `total` is their sum.
    #[must_use]
    pub fn from_counts(counts: impl IntoIterator<Item = (ParticipantStatus, i64)>) -> Self {
        let mut counters = Self::default();
        for (status, count) in counts {
            let slot = match status {
                ParticipantStatus::OnHold => &mut counters.on_hold,
                ParticipantStatus::Ready => &mut counters.ready,
                ParticipantStatus::Scheduled => &mut counters.scheduled,
                ParticipantStatus::InProgress => &mut counters.in_progress,
                ParticipantStatus::Completed => &mut counters.completed,
                ParticipantStatus::GoalAchieved => &mut counters.goal_achieved,
            };
            *slot += count;
        }
        counters.total = counters.on_hold
            + counters.ready
            + counters.scheduled
            + counters.in_progress
            + counters.completed
            + counters.goal_achieved;
        counters
    }

    /// Returns true if `total` equals the sum of the status counters.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        self.total
            == self.on_hold
                + self.ready
                + self.scheduled
                + self.in_progress
                + self.completed
                + self.goal_achieved
    }
}

/// A flow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    pub description: Option<String>,
    pub status: FlowStatus,
    /// Set the first time the flow is turned ON.
    pub first_started_at: Option<DateTime<Utc>>,
    /// The authoring graph as last saved.
    pub graph: AuthorGraph,
    pub counters: FlowCounters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Flow {
    /// Creates a new flow in status OFF with an empty graph.
    #[must_use]
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id: FlowId::new(),
            name: name.into(),
            description: None,
            status: FlowStatus::Off,
            first_started_at: None,
            graph: AuthorGraph::default(),
            counters: FlowCounters::default(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Returns true if the flow is ON.
    #[must_use]
    pub fn is_on(&self) -> bool {
        self.status == FlowStatus::On
    }
}
