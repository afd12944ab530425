//! Flow actions: the typed steps of a compiled flow.

use chrono::{DateTime, Utc};
use flowline_core::{FlowActionId, FlowId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of a flow action.
///
/// `Wait` only exists in authoring graphs; the compiler folds it into the
/// `wait_before` of the following action and never persists it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    FlowStart,
    FlowEnd,
    EmailNew,
    EmailReply,
    LinkedinConnectionRequest,
    LinkedinMessage,
    Wait,
}

impl ActionKind {
    /// Returns the wire name of this kind.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FlowStart => "FLOW_START",
            Self::FlowEnd => "FLOW_END",
            Self::EmailNew => "EMAIL_NEW",
            Self::EmailReply => "EMAIL_REPLY",
            Self::LinkedinConnectionRequest => "LINKEDIN_CONNECTION_REQUEST",
            Self::LinkedinMessage => "LINKEDIN_MESSAGE",
            Self::Wait => "WAIT",
        }
    }

    /// Returns true for `EMAIL_NEW` and `EMAIL_REPLY`.
    #[must_use]
    pub fn is_email(&self) -> bool {
        matches!(self, Self::EmailNew | Self::EmailReply)
    }

    /// Returns true for the LinkedIn kinds.
    #[must_use]
    pub fn is_linkedin(&self) -> bool {
        matches!(self, Self::LinkedinConnectionRequest | Self::LinkedinMessage)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FLOW_START" => Ok(Self::FlowStart),
            "FLOW_END" => Ok(Self::FlowEnd),
            "EMAIL_NEW" => Ok(Self::EmailNew),
            "EMAIL_REPLY" => Ok(Self::EmailReply),
            "LINKEDIN_CONNECTION_REQUEST" => Ok(Self::LinkedinConnectionRequest),
            "LINKEDIN_MESSAGE" => Ok(Self::LinkedinMessage),
            "WAIT" => Ok(Self::Wait),
            other => Err(format!("unknown action kind: {other}")),
        }
    }
}

/// Kind-specific payload of a persisted action, tagged by `action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ActionBody {
    FlowStart,
    FlowEnd,
    EmailNew {
        subject: String,
        body_template: String,
    },
    EmailReply {
        body_template: String,
    },
    LinkedinConnectionRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_template: Option<String>,
    },
    LinkedinMessage {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message_template: Option<String>,
    },
}

impl ActionBody {
    /// Returns the kind tag of this body.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::FlowStart => ActionKind::FlowStart,
            Self::FlowEnd => ActionKind::FlowEnd,
            Self::EmailNew { .. } => ActionKind::EmailNew,
            Self::EmailReply { .. } => ActionKind::EmailReply,
            Self::LinkedinConnectionRequest { .. } => ActionKind::LinkedinConnectionRequest,
            Self::LinkedinMessage { .. } => ActionKind::LinkedinMessage,
        }
    }
}

/// The `data` blob of a persisted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionData {
    /// Minutes to wait after the previous action before this one may run.
    #[serde(default)]
    pub wait_before: u32,
    #[serde(flatten)]
    pub body: ActionBody,
}

impl ActionData {
    /// Creates action data without a wait.
    #[must_use]
    pub fn new(body: ActionBody) -> Self {
        Self {
            wait_before: 0,
            body,
        }
    }

    /// Sets the wait in minutes.
    #[must_use]
    pub fn with_wait(mut self, minutes: u32) -> Self {
        self.wait_before = minutes;
        self
    }

    /// Returns the action kind.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.body.kind()
    }

    /// Returns the body template for email actions.
    #[must_use]
    pub fn body_template(&self) -> Option<&str> {
        match &self.body {
            ActionBody::EmailNew { body_template, .. } | ActionBody::EmailReply { body_template } => {
                Some(body_template)
            }
            _ => None,
        }
    }
}

/// A compiled, persisted action node of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowAction {
    /// Stable internal id.
    pub id: FlowActionId,
    /// Owning flow.
    pub flow_id: FlowId,
    /// The authoring tool's node id.
    pub external_id: String,
    /// The authoring tool's node type.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Kind-specific data.
    pub data: ActionData,
    /// When this action was last persisted.
    pub updated_at: DateTime<Utc>,
}

impl FlowAction {
    /// Returns the action kind.
    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.data.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn email_new_data_shape() {
        let data = ActionData::new(ActionBody::EmailNew {
            subject: "Hi".to_string(),
            body_template: "Hello {{contact_first_name}}".to_string(),
        })
        .with_wait(60);

        let value = serde_json::to_value(&data).expect("serialize");
        assert_eq!(
            value,
            json!({
                "action": "EMAIL_NEW",
                "waitBefore": 60,
                "subject": "Hi",
                "bodyTemplate": "Hello {{contact_first_name}}",
            })
        );
    }

    #[test]
    fn wait_before_defaults_to_zero() {
        let data: ActionData =
            serde_json::from_value(json!({"action": "FLOW_END"})).expect("deserialize");
        assert_eq!(data.wait_before, 0);
        assert_eq!(data.kind(), ActionKind::FlowEnd);
    }

    #[test]
    fn email_reply_requires_body_template() {
        let result: Result<ActionData, _> =
            serde_json::from_value(json!({"action": "EMAIL_REPLY", "waitBefore": 5}));
        assert!(result.is_err());
    }

    #[test]
    fn kind_classification() {
        assert!(ActionKind::EmailReply.is_email());
        assert!(!ActionKind::LinkedinMessage.is_email());
        assert!(ActionKind::LinkedinConnectionRequest.is_linkedin());
        assert_eq!(
            "EMAIL_NEW".parse::<ActionKind>().expect("parse"),
            ActionKind::EmailNew
        );
        assert!("SMS".parse::<ActionKind>().is_err());
    }
}
