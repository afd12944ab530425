//! Flow senders and per-participant mailbox pinning.

use flowline_core::{EntityRef, ExecutionSettingsId, FlowId, SenderId, UserId};
use serde::{Deserialize, Serialize};

/// A user whose mailboxes may send on behalf of a flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSender {
    pub id: SenderId,
    pub flow_id: FlowId,
    pub user_id: UserId,
}

impl FlowSender {
    #[must_use]
    pub fn new(flow_id: FlowId, user_id: UserId) -> Self {
        Self {
            id: SenderId::new(),
            flow_id,
            user_id,
        }
    }
}

/// The mailbox a participant was bound to on its first email action.
///
/// Every later email for the same (flow, participant) goes out through the
/// same mailbox so replies stay in one thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowExecutionSettings {
    pub id: ExecutionSettingsId,
    pub flow_id: FlowId,
    #[serde(flatten)]
    pub entity: EntityRef,
    pub mailbox: Option<String>,
    /// Owner of `mailbox`.
    pub user_id: Option<UserId>,
}

impl FlowExecutionSettings {
    /// Creates settings bound to a mailbox.
    #[must_use]
    pub fn bound(flow_id: FlowId, entity: EntityRef, mailbox: String, user_id: UserId) -> Self {
        Self {
            id: ExecutionSettingsId::new(),
            flow_id,
            entity,
            mailbox: Some(mailbox),
            user_id: Some(user_id),
        }
    }

    /// Returns the bound mailbox and its owner, if both are set.
    #[must_use]
    pub fn binding(&self) -> Option<(&str, UserId)> {
        match (&self.mailbox, self.user_id) {
            (Some(mailbox), Some(user_id)) => Some((mailbox.as_str(), user_id)),
            _ => None,
        }
    }
}
