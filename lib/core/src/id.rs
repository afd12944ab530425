//! Typed identifiers.
//!
//! Every id wraps a ULID and renders as `<prefix>_<ulid>`, the form stored in
//! TEXT columns and carried in event envelopes. Parsing accepts that form or
//! a bare ULID (authoring graphs may carry either in `internalId`). A string
//! carrying another id type's prefix is rejected.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Error returned when a string is not a valid id of the requested type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseIdError {
    /// The string carries a prefix that belongs to another id type.
    WrongPrefix {
        id_type: &'static str,
        expected: &'static str,
        found: String,
    },
    /// The ULID part is malformed.
    InvalidUlid { id_type: &'static str, reason: String },
}

impl fmt::Display for ParseIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongPrefix {
                id_type,
                expected,
                found,
            } => write!(f, "{id_type} must start with '{expected}_', got '{found}_'"),
            Self::InvalidUlid { id_type, reason } => write!(f, "invalid {id_type}: {reason}"),
        }
    }
}

impl std::error::Error for ParseIdError {}

fn parse_prefixed(s: &str, prefix: &'static str, id_type: &'static str) -> Result<Ulid, ParseIdError> {
    let raw = match s.split_once('_') {
        Some((found, rest)) if found == prefix => rest,
        Some((found, _)) => {
            return Err(ParseIdError::WrongPrefix {
                id_type,
                expected: prefix,
                found: found.to_string(),
            });
        }
        None => s,
    };
    Ulid::from_str(raw).map_err(|e| ParseIdError::InvalidUlid {
        id_type,
        reason: e.to_string(),
    })
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }

            /// Wraps an existing ULID, e.g. one with a fixed timestamp.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "_{}"), self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_prefixed(s, $prefix, stringify!($name)).map(Self)
            }
        }
    };
}

define_id!(
    /// A CRM user: a flow sender or mailbox owner.
    UserId,
    "usr"
);

define_id!(FlowId, "flow");

define_id!(
    /// Stable id of a compiled flow action.
    ///
    /// Survives re-saves of the authoring graph via the `internalId` field.
    FlowActionId,
    "act"
);

define_id!(ParticipantId, "fpart");

define_id!(SenderId, "fsnd");

define_id!(
    /// Id of a participant's sticky mailbox binding.
    ExecutionSettingsId,
    "fset"
);

define_id!(
    /// A scheduled or historical action execution. Also the producer id of
    /// the email it sends.
    ExecutionId,
    "fexec"
);

define_id!(EmailMessageId, "email");

define_id!(EventId, "evt");

define_id!(BillableEventId, "bill");
