//! Tenant and participant entity references.
//!
//! Every flowline record is tenant-scoped. Participants are entities owned by
//! the surrounding CRM (contacts, users, organizations); the engine only ever
//! holds an opaque reference to them.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An opaque tenant name attached to every entity and edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tenant(String);

impl Tenant {
    /// Creates a tenant from its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the tenant name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Tenant {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// The kind of CRM entity enrolled as a flow participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    /// A contact (person outside the tenant).
    Contact,
    /// A user of the tenant.
    User,
    /// An organization.
    Organization,
}

impl EntityType {
    /// Returns the wire name of this entity type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contact => "CONTACT",
            Self::User => "USER",
            Self::Organization => "ORGANIZATION",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an entity type name is not recognized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEntityTypeError {
    /// The rejected input.
    pub value: String,
}

impl fmt::Display for ParseEntityTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown entity type: {}", self.value)
    }
}

impl std::error::Error for ParseEntityTypeError {}

impl FromStr for EntityType {
    type Err = ParseEntityTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONTACT" => Ok(Self::Contact),
            "USER" => Ok(Self::User),
            "ORGANIZATION" => Ok(Self::Organization),
            other => Err(ParseEntityTypeError {
                value: other.to_string(),
            }),
        }
    }
}

/// A reference to the CRM entity behind a participant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityRef {
    /// The entity's id in the CRM.
    pub entity_id: String,
    /// The kind of entity.
    pub entity_type: EntityType,
}

impl EntityRef {
    /// Creates a new entity reference.
    #[must_use]
    pub fn new(entity_id: impl Into<String>, entity_type: EntityType) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type,
        }
    }

    /// Shorthand for a contact reference.
    #[must_use]
    pub fn contact(entity_id: impl Into<String>) -> Self {
        Self::new(entity_id, EntityType::Contact)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.entity_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_type_parses_wire_names() {
        for kind in [EntityType::Contact, EntityType::User, EntityType::Organization] {
            let parsed: EntityType = kind.as_str().parse().expect("should parse");
            assert_eq!(parsed, kind);
        }
        assert!("PERSON".parse::<EntityType>().is_err());
    }

    #[test]
    fn entity_ref_display() {
        let entity = EntityRef::contact("c-42");
        assert_eq!(entity.to_string(), "CONTACT:c-42");
    }

    #[test]
    fn entity_ref_json_shape() {
        let entity = EntityRef::new("o-1", EntityType::Organization);
        let json = serde_json::to_value(&entity).expect("serialize");
        assert_eq!(json["entityId"], "o-1");
        assert_eq!(json["entityType"], "ORGANIZATION");
    }
}
