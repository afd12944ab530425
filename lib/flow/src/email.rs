//! Outbound email queue rows.
//!
//! The engine only enqueues messages. A separate sender drains the queue,
//! sets `provider_message_id` once the provider accepts a message, and owns
//! its own retry loop.

use chrono::{DateTime, Utc};
use flowline_core::{EmailMessageId, ExecutionId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Producer type stamped on messages enqueued by the execution processor.
pub const PRODUCER_FLOW_ACTION_EXECUTION: &str = "FlowActionExecution";

/// Delivery state of an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EmailStatus {
    Scheduled,
    Sent,
    Failed,
}

impl EmailStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "SCHEDULED",
            Self::Sent => "SENT",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for EmailStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SCHEDULED" => Ok(Self::Scheduled),
            "SENT" => Ok(Self::Sent),
            "FAILED" => Ok(Self::Failed),
            other => Err(format!("unknown email status: {other}")),
        }
    }
}

/// A message waiting in (or drained from) the outbound queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub id: EmailMessageId,
    /// The execution that produced this message.
    pub producer_id: ExecutionId,
    pub producer_type: String,
    pub from: String,
    pub from_name: String,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub content: String,
    pub provider_message_id: Option<String>,
    pub provider_in_reply_to: Option<String>,
    pub provider_references: Option<String>,
    pub provider_thread_id: Option<String>,
    pub status: EmailStatus,
    pub created_at: DateTime<Utc>,
}

impl EmailMessage {
    /// Creates a SCHEDULED message produced by an execution.
    #[must_use]
    pub fn for_execution(
        producer_id: ExecutionId,
        from: impl Into<String>,
        from_name: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        content: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EmailMessageId::new(),
            producer_id,
            producer_type: PRODUCER_FLOW_ACTION_EXECUTION.to_string(),
            from: from.into(),
            from_name: from_name.into(),
            to: vec![to.into()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: subject.into(),
            content: content.into(),
            provider_message_id: None,
            provider_in_reply_to: None,
            provider_references: None,
            provider_thread_id: None,
            status: EmailStatus::Scheduled,
            created_at: now,
        }
    }

    /// Threads this message as a reply to `parent`.
    ///
    /// Returns false, leaving the message untouched, if the parent has not
    /// been sent yet and so has no provider message id.
    pub fn reply_to(&mut self, parent: &EmailMessage) -> bool {
        let Some(parent_id) = parent.provider_message_id.as_deref() else {
            return false;
        };
        self.subject = format!("Re: {}", parent.subject);
        self.provider_in_reply_to = Some(parent_id.to_string());
        self.provider_references = Some(
            [parent.provider_references.as_deref().unwrap_or(""), parent_id]
                .iter()
                .filter(|part| !part.is_empty())
                .copied()
                .collect::<Vec<_>>()
                .join(" "),
        );
        self.provider_thread_id = parent.provider_thread_id.clone();
        true
    }
}
