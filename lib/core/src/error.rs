//! Error handling foundation for the flowline engine.
//!
//! Every engine operation fails with an [`EngineError`] wrapped in a rootcause
//! [`Report`]. The variants are the externally observable error kinds; callers
//! classify a failure with [`EngineError::is_retryable`] on the report's
//! current context.

use rootcause::Report;
use std::fmt;

/// A Result type alias using rootcause's Report for error handling.
pub type Result<T, C = EngineError> = std::result::Result<T, Report<C>>;

/// The error kinds surfaced by the flow engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The authored graph failed validation.
    InvalidGraph { details: String },
    /// The flow must be OFF for this operation.
    FlowActive { flow_id: String },
    /// No flow with the given id exists for the tenant.
    FlowNotFound { flow_id: String },
    /// A referenced flow action does not exist.
    ActionMissing { action_id: String },
    /// A referenced participant does not exist.
    ParticipantMissing { details: String },
    /// A referenced mailbox does not exist.
    MailboxMissing { mailbox: String },
    /// A referenced user does not exist.
    UserMissing { user_id: String },
    /// The participant has no primary email address.
    NoPrimaryEmail { entity: String },
    /// A reply action could not locate the email it replies to.
    NoParentEmail { details: String },
    /// No mailbox can carry the next email.
    NoMailboxAvailable { details: String },
    /// The sending user has no usable working-hours window.
    NoWorkingSchedule { user_id: String },
    /// The action kind or entity type is not supported.
    Unsupported { what: String },
    /// Concurrent modification detected; safe to retry.
    Conflict { details: String },
    /// Infrastructure failure or deadline exceeded; safe to retry.
    Transient { details: String },
}

impl EngineError {
    /// Returns the stable tag for this error kind.
    #[must_use]
    pub fn tag(&self) -> &'static str {
        match self {
            Self::InvalidGraph { .. } => "InvalidGraph",
            Self::FlowActive { .. } => "FlowActive",
            Self::FlowNotFound { .. } => "FlowNotFound",
            Self::ActionMissing { .. } => "ActionMissing",
            Self::ParticipantMissing { .. } => "ParticipantMissing",
            Self::MailboxMissing { .. } => "MailboxMissing",
            Self::UserMissing { .. } => "UserMissing",
            Self::NoPrimaryEmail { .. } => "NoPrimaryEmail",
            Self::NoParentEmail { .. } => "NoParentEmail",
            Self::NoMailboxAvailable { .. } => "NoMailboxAvailable",
            Self::NoWorkingSchedule { .. } => "NoWorkingSchedule",
            Self::Unsupported { .. } => "Unsupported",
            Self::Conflict { .. } => "Conflict",
            Self::Transient { .. } => "Transient",
        }
    }

    /// Whether the failed operation may be retried as-is.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. } | Self::Transient { .. })
    }

    /// Shorthand for a transient error.
    #[must_use]
    pub fn transient(details: impl Into<String>) -> Self {
        Self::Transient {
            details: details.into(),
        }
    }

    /// Shorthand for an invalid graph error.
    #[must_use]
    pub fn invalid_graph(details: impl Into<String>) -> Self {
        Self::InvalidGraph {
            details: details.into(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidGraph { details } => write!(f, "invalid flow graph: {details}"),
            Self::FlowActive { flow_id } => write!(f, "flow {flow_id} is ON"),
            Self::FlowNotFound { flow_id } => write!(f, "flow not found: {flow_id}"),
            Self::ActionMissing { action_id } => write!(f, "flow action not found: {action_id}"),
            Self::ParticipantMissing { details } => {
                write!(f, "flow participant not found: {details}")
            }
            Self::MailboxMissing { mailbox } => write!(f, "mailbox not found: {mailbox}"),
            Self::UserMissing { user_id } => write!(f, "user not found: {user_id}"),
            Self::NoPrimaryEmail { entity } => write!(f, "no primary email for {entity}"),
            Self::NoParentEmail { details } => write!(f, "no parent email: {details}"),
            Self::NoMailboxAvailable { details } => write!(f, "no mailbox available: {details}"),
            Self::NoWorkingSchedule { user_id } => {
                write!(f, "no working schedule for user {user_id}")
            }
            Self::Unsupported { what } => write!(f, "unsupported: {what}"),
            Self::Conflict { details } => write!(f, "conflict: {details}"),
            Self::Transient { details } => write!(f, "transient failure: {details}"),
        }
    }
}

impl std::error::Error for EngineError {}
