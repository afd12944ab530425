//! Postgres persistence for the flow engine.
//!
//! [`PgFlowStore`] hands out one [`PgTransaction`] per engine operation. The
//! transaction implements every store trait the engine needs; its repository
//! methods are split by concern:
//! - Flows, actions, participants, executions, senders and billing
//! - Mailboxes, working schedules and the mailbox ledger
//! - The outbound email queue

mod email;
mod flow;
mod mailbox;
mod rows;

use async_trait::async_trait;
use flowline_core::{EngineError, EntityRef, FlowId, Result, Tenant};
use flowline_engine::{FlowStore, Transaction};
use sqlx::{PgPool, Postgres};
use std::fmt;
use std::str::FromStr;

/// Postgres-backed [`FlowStore`].
#[derive(Clone)]
pub struct PgFlowStore {
    pool: PgPool,
}

impl PgFlowStore {
    /// Creates a new store.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// A tenant-scoped Postgres transaction. Dropping it rolls back.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    tenant: Tenant,
}

impl PgTransaction {
    async fn advisory_lock(&mut self, key: String) -> Result<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| db_error("failed to take advisory lock", e))?;
        Ok(())
    }
}

#[async_trait]
impl FlowStore for PgFlowStore {
    type Tx = PgTransaction;

    async fn begin(&self, tenant: &Tenant) -> Result<PgTransaction> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("failed to begin transaction", e))?;
        Ok(PgTransaction {
            tx,
            tenant: tenant.clone(),
        })
    }

    async fn tenants(&self) -> Result<Vec<Tenant>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT tenant FROM flows
            UNION
            SELECT tenant FROM mailboxes
            ORDER BY tenant
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("failed to list tenants", e))?;
        Ok(names.into_iter().map(Tenant::new).collect())
    }
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn lock_flow(&mut self, flow_id: FlowId) -> Result<()> {
        sqlx::query("SELECT id FROM flows WHERE tenant = $1 AND id = $2 FOR UPDATE")
            .bind(self.tenant.as_str())
            .bind(flow_id.to_string())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| db_error("failed to lock flow", e))?;
        Ok(())
    }

    async fn lock_participant(&mut self, flow_id: FlowId, entity: &EntityRef) -> Result<()> {
        let key = format!("participant:{}:{flow_id}:{entity}", self.tenant);
        self.advisory_lock(key).await
    }

    async fn lock_mailbox(&mut self, mailbox: &str) -> Result<()> {
        let key = format!("mailbox:{}:{mailbox}", self.tenant);
        self.advisory_lock(key).await
    }

    async fn commit(self) -> Result<()> {
        self.tx
            .commit()
            .await
            .map_err(|e| db_error("failed to commit transaction", e))?;
        Ok(())
    }
}

/// Maps a database error onto the engine's error kinds.
///
/// Serialization failures, deadlocks and unique violations are conflicts;
/// everything else is transient.
pub(crate) fn db_error(context: &str, e: sqlx::Error) -> EngineError {
    let code = e
        .as_database_error()
        .and_then(|db| db.code())
        .map(|code| code.into_owned());
    match code.as_deref() {
        Some("40001" | "40P01" | "23505") => EngineError::Conflict {
            details: format!("{context}: {e}"),
        },
        _ => EngineError::transient(format!("{context}: {e}")),
    }
}

/// Parses a stored text column into a typed value.
pub(crate) fn parse_column<T>(what: &str, value: &str) -> std::result::Result<T, sqlx::Error>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    T::from_str(value).map_err(|e| {
        sqlx::Error::Decode(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid {what} '{value}': {e}"),
        )))
    })
}

/// Converts a stored non-negative integer column.
pub(crate) fn to_u32(what: &str, value: i32) -> std::result::Result<u32, sqlx::Error> {
    u32::try_from(value).map_err(|e| {
        sqlx::Error::Decode(Box::new(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("invalid {what} {value}: {e}"),
        )))
    })
}

pub(crate) fn to_i32(value: u32) -> i32 {
    i32::try_from(value).unwrap_or(i32::MAX)
}
