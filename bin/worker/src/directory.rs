//! CRM directory backed by the read-only projection tables.

use crate::db::db_error;
use async_trait::async_trait;
use flowline_core::{EntityRef, Result, Tenant, UserId};
use flowline_engine::{Directory, EntityProfile, UserProfile};
use sqlx::{FromRow, PgPool};

#[derive(FromRow)]
struct EntityRow {
    first_name: Option<String>,
    last_name: Option<String>,
    primary_email: Option<String>,
    organization_name: Option<String>,
}

#[derive(FromRow)]
struct UserRow {
    first_name: Option<String>,
    last_name: Option<String>,
}

/// Postgres-backed [`Directory`].
#[derive(Clone)]
pub struct PgDirectory {
    pool: PgPool,
}

impl PgDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Directory for PgDirectory {
    async fn entity_profile(&self, tenant: &Tenant, entity: &EntityRef) -> Result<Option<EntityProfile>> {
        let row: Option<EntityRow> = sqlx::query_as(
            r#"
            SELECT first_name, last_name, primary_email, organization_name
            FROM directory_entities
            WHERE tenant = $1 AND entity_type = $2 AND entity_id = $3
            "#,
        )
        .bind(tenant.as_str())
        .bind(entity.entity_type.as_str())
        .bind(&entity.entity_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("failed to load entity profile", e))?;

        Ok(row.map(|row| EntityProfile {
            first_name: row.first_name,
            last_name: row.last_name,
            primary_email: row.primary_email.filter(|email| !email.trim().is_empty()),
            organization_name: row.organization_name,
        }))
    }

    async fn user_profile(&self, tenant: &Tenant, user_id: UserId) -> Result<Option<UserProfile>> {
        let row: Option<UserRow> = sqlx::query_as(
            "SELECT first_name, last_name FROM directory_users WHERE tenant = $1 AND id = $2",
        )
        .bind(tenant.as_str())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error("failed to load user profile", e))?;
        let Some(row) = row else {
            return Ok(None);
        };

        let emails: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT email FROM directory_user_emails
            WHERE tenant = $1 AND user_id = $2
            ORDER BY position, email
            "#,
        )
        .bind(tenant.as_str())
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("failed to load user emails", e))?;

        Ok(Some(UserProfile {
            id: user_id,
            first_name: row.first_name,
            last_name: row.last_name,
            emails,
        }))
    }
}
