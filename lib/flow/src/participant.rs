//! Flow participants and their status machine.
//!
//! ```text
//! ON_HOLD <-> READY -> SCHEDULED -> IN_PROGRESS
//!                          |              |
//!                          v              v
//!                      COMPLETED     GOAL_ACHIEVED
//! ```
//!
//! COMPLETED and GOAL_ACHIEVED are terminal, except that a goal event may
//! still move a COMPLETED participant to GOAL_ACHIEVED.

use chrono::{DateTime, Utc};
use flowline_core::{EntityRef, FlowId, ParticipantId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Where a participant is in its flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantStatus {
    OnHold,
    Ready,
    Scheduled,
    InProgress,
    Completed,
    GoalAchieved,
}

impl ParticipantStatus {
    /// Every status, in counter order.
    pub const ALL: [Self; 6] = [
        Self::OnHold,
        Self::Ready,
        Self::Scheduled,
        Self::InProgress,
        Self::Completed,
        Self::GoalAchieved,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OnHold => "ON_HOLD",
            Self::Ready => "READY",
            Self::Scheduled => "SCHEDULED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::GoalAchieved => "GOAL_ACHIEVED",
        }
    }

    /// Returns true for COMPLETED and GOAL_ACHIEVED.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::GoalAchieved)
    }

    /// The status after a requirement evaluation.
    ///
    /// Terminal statuses are sticky; every other status becomes READY or
    /// ON_HOLD.
    #[must_use]
    pub fn after_requirements(self, met: bool) -> Self {
        match (self.is_terminal(), met) {
            (true, _) => self,
            (false, true) => Self::Ready,
            (false, false) => Self::OnHold,
        }
    }
}

impl fmt::Display for ParticipantStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ParticipantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown participant status: {s}"))
    }
}

/// An entity enrolled in a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowParticipant {
    pub id: ParticipantId,
    pub flow_id: FlowId,
    #[serde(flatten)]
    pub entity: EntityRef,
    pub status: ParticipantStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowParticipant {
    /// Creates a participant in status ON_HOLD.
    #[must_use]
    pub fn new(flow_id: FlowId, entity: EntityRef, now: DateTime<Utc>) -> Self {
        Self {
            id: ParticipantId::new(),
            flow_id,
            entity,
            status: ParticipantStatus::OnHold,
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves to `status`, returning true if it changed.
    pub fn transition(&mut self, status: ParticipantStatus, now: DateTime<Utc>) -> bool {
        if self.status == status {
            return false;
        }
        self.status = status;
        self.updated_at = now;
        true
    }
}
