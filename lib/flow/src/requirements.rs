//! Participant requirements derived from a flow's actions.

use crate::action::FlowAction;
use serde::{Deserialize, Serialize};

/// The predicates a participant must satisfy to run a flow's actions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRequirements {
    /// Set when the flow contains any email action.
    pub primary_email_required: bool,
}

impl FlowRequirements {
    /// Derives the requirements from a flow's persisted actions.
    #[must_use]
    pub fn for_actions<'a>(actions: impl IntoIterator<Item = &'a FlowAction>) -> Self {
        Self {
            primary_email_required: actions.into_iter().any(|a| a.kind().is_email()),
        }
    }

    /// Returns true if a participant with the given primary email satisfies
    /// every requirement.
    #[must_use]
    pub fn met_by(&self, primary_email: Option<&str>) -> bool {
        !self.primary_email_required || primary_email.is_some_and(|e| !e.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{ActionBody, ActionData};
    use chrono::Utc;
    use flowline_core::{FlowActionId, FlowId};

    fn action(body: ActionBody) -> FlowAction {
        FlowAction {
            id: FlowActionId::new(),
            flow_id: FlowId::new(),
            external_id: "n".to_string(),
            node_type: "action".to_string(),
            data: ActionData::new(body),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn email_actions_require_primary_email() {
        let actions = vec![
            action(ActionBody::FlowStart),
            action(ActionBody::EmailReply {
                body_template: "Bump".to_string(),
            }),
        ];
        let requirements = FlowRequirements::for_actions(&actions);
        assert!(requirements.primary_email_required);
        assert!(!requirements.met_by(None));
        assert!(!requirements.met_by(Some("  ")));
        assert!(requirements.met_by(Some("alice@ex.com")));
    }

    #[test]
    fn flows_without_email_have_no_requirements() {
        let actions = vec![
            action(ActionBody::FlowStart),
            action(ActionBody::LinkedinMessage {
                message_template: None,
            }),
            action(ActionBody::FlowEnd),
        ];
        let requirements = FlowRequirements::for_actions(&actions);
        assert!(!requirements.primary_email_required);
        assert!(requirements.met_by(None));
    }
}
