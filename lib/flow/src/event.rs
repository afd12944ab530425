//! Events exchanged over the event bus.

use flowline_core::{EntityRef, FlowId, ParticipantId};
use serde::{Deserialize, Serialize};

pub const TOPIC_COMPUTE_REQUIREMENTS: &str = "flow.compute-participant-requirements";
pub const TOPIC_SCHEDULE_FLOW: &str = "flow.schedule";
pub const TOPIC_SCHEDULE_PARTICIPANT: &str = "flow.participant.schedule";
pub const TOPIC_GOAL_ACHIEVED: &str = "flow.participant.goal-achieved";
pub const TOPIC_EVENT_COMPLETED: &str = "notification.event-completed";

/// What happened to an entity, for observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionKind {
    Create,
    Update,
    Delete,
}

/// A flow engine event, tagged by its topic name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "eventType", content = "data", rename_all_fields = "camelCase")]
pub enum FlowEvent {
    /// Re-evaluate every participant of a flow after a graph save.
    #[serde(rename = "flow.compute-participant-requirements")]
    ComputeParticipantRequirements { flow_id: FlowId },
    /// Schedule every participant of a flow.
    #[serde(rename = "flow.schedule")]
    ScheduleFlow { flow_id: FlowId },
    /// Schedule a single participant.
    #[serde(rename = "flow.participant.schedule")]
    ScheduleParticipant { participant_id: ParticipantId },
    /// An inbound reply met the flow's goal for a participant.
    #[serde(rename = "flow.participant.goal-achieved")]
    GoalAchieved {
        flow_id: FlowId,
        #[serde(flatten)]
        entity: EntityRef,
    },
    /// Observer notification that an entity changed.
    #[serde(rename = "notification.event-completed")]
    EventCompleted {
        entity_type: String,
        entity_id: String,
        kind: CompletionKind,
    },
}

/// Entity type names used on observer notifications.
pub const ENTITY_FLOW: &str = "FLOW";
pub const ENTITY_FLOW_PARTICIPANT: &str = "FLOW_PARTICIPANT";

impl FlowEvent {
    /// Returns the topic (and bus subject) of this event.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::ComputeParticipantRequirements { .. } => TOPIC_COMPUTE_REQUIREMENTS,
            Self::ScheduleFlow { .. } => TOPIC_SCHEDULE_FLOW,
            Self::ScheduleParticipant { .. } => TOPIC_SCHEDULE_PARTICIPANT,
            Self::GoalAchieved { .. } => TOPIC_GOAL_ACHIEVED,
            Self::EventCompleted { .. } => TOPIC_EVENT_COMPLETED,
        }
    }

    /// Returns the (entity id, entity type) the event is about.
    #[must_use]
    pub fn subject_entity(&self) -> (String, String) {
        match self {
            Self::ComputeParticipantRequirements { flow_id } | Self::ScheduleFlow { flow_id } => {
                (flow_id.to_string(), ENTITY_FLOW.to_string())
            }
            Self::ScheduleParticipant { participant_id } => (
                participant_id.to_string(),
                ENTITY_FLOW_PARTICIPANT.to_string(),
            ),
            Self::GoalAchieved { entity, .. } => {
                (entity.entity_id.clone(), entity.entity_type.to_string())
            }
            Self::EventCompleted {
                entity_type,
                entity_id,
                ..
            } => (entity_id.clone(), entity_type.clone()),
        }
    }

    /// Observer notification for a flow change.
    #[must_use]
    pub fn flow_changed(flow_id: FlowId, kind: CompletionKind) -> Self {
        Self::EventCompleted {
            entity_type: ENTITY_FLOW.to_string(),
            entity_id: flow_id.to_string(),
            kind,
        }
    }

    /// Observer notification for a participant change.
    #[must_use]
    pub fn participant_changed(participant_id: ParticipantId, kind: CompletionKind) -> Self {
        Self::EventCompleted {
            entity_type: ENTITY_FLOW_PARTICIPANT.to_string(),
            entity_id: participant_id.to_string(),
            kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tag_matches_topic() {
        let event = FlowEvent::ScheduleFlow {
            flow_id: FlowId::new(),
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["eventType"], event.topic());
        assert!(value["data"]["flowId"].is_string());
    }

    #[test]
    fn goal_achieved_flattens_entity() {
        let flow_id = FlowId::new();
        let event = FlowEvent::GoalAchieved {
            flow_id,
            entity: EntityRef::contact("c-7"),
        };
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["data"]["entityId"], "c-7");
        assert_eq!(value["data"]["entityType"], "CONTACT");

        let back: FlowEvent = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, event);
    }

    #[test]
    fn completion_kind_names() {
        let event = FlowEvent::flow_changed(FlowId::new(), CompletionKind::Update);
        let value = serde_json::to_value(&event).expect("serialize");
        assert_eq!(value["data"]["kind"], json!("Update"));
        assert_eq!(event.subject_entity().1, ENTITY_FLOW);
    }
}
