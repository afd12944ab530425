//! Read-only view of the CRM entities the engine works with.

use async_trait::async_trait;
use flowline_core::{EntityRef, Result, Tenant, UserId};
use serde::{Deserialize, Serialize};

/// What the engine needs to know about a participant entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityProfile {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub primary_email: Option<String>,
    pub organization_name: Option<String>,
}

/// What the engine needs to know about a sending user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    /// Email addresses, primary first.
    pub emails: Vec<String>,
}

impl UserProfile {
    /// Returns the display name used as the email `from` name.
    #[must_use]
    pub fn display_name(&self) -> String {
        [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Resolves participants and users.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Returns the profile of a participant entity, if it exists.
    async fn entity_profile(&self, tenant: &Tenant, entity: &EntityRef) -> Result<Option<EntityProfile>>;

    /// Returns the profile of a user, if it exists.
    async fn user_profile(&self, tenant: &Tenant, user_id: UserId) -> Result<Option<UserProfile>>;
}
