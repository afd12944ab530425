//! Mailboxes, working schedules and the per-mailbox send ledger.

use super::{PgTransaction, db_error, to_i32, to_u32};
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use flowline_core::{Result, UserId};
use flowline_scheduler::{Mailbox, MailboxLedger, MailboxRepository, UserWorkingSchedule, WorkingScheduleRepository};
use sqlx::FromRow;

const MAILBOX_COLUMNS: &str = "username, password, domain, ramp_up_current, ramp_up_max, ramp_up_rate, last_ramp_up_at, min_minutes_between_emails, max_minutes_between_emails";

#[derive(FromRow)]
struct MailboxRow {
    username: String,
    password: String,
    domain: String,
    ramp_up_current: i32,
    ramp_up_max: i32,
    ramp_up_rate: i32,
    last_ramp_up_at: DateTime<Utc>,
    min_minutes_between_emails: i32,
    max_minutes_between_emails: i32,
}

impl MailboxRow {
    fn try_into_mailbox(self) -> std::result::Result<Mailbox, sqlx::Error> {
        Ok(Mailbox {
            username: self.username,
            password: self.password,
            domain: self.domain,
            ramp_up_current: to_u32("ramp_up_current", self.ramp_up_current)?,
            ramp_up_max: to_u32("ramp_up_max", self.ramp_up_max)?,
            ramp_up_rate: to_u32("ramp_up_rate", self.ramp_up_rate)?,
            last_ramp_up_at: self.last_ramp_up_at,
            min_minutes_between_emails: to_u32("min_minutes_between_emails", self.min_minutes_between_emails)?,
            max_minutes_between_emails: to_u32("max_minutes_between_emails", self.max_minutes_between_emails)?,
        })
    }
}

fn decode_mailboxes(rows: Vec<MailboxRow>) -> Result<Vec<Mailbox>> {
    Ok(rows
        .into_iter()
        .map(MailboxRow::try_into_mailbox)
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| db_error("failed to decode mailbox", e))?)
}

#[async_trait]
impl MailboxRepository for PgTransaction {
    async fn get_mailbox(&mut self, username: &str) -> Result<Option<Mailbox>> {
        let row: Option<MailboxRow> = sqlx::query_as(&format!(
            "SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE tenant = $1 AND username = $2"
        ))
        .bind(self.tenant.as_str())
        .bind(username)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load mailbox", e))?;
        Ok(row
            .map(MailboxRow::try_into_mailbox)
            .transpose()
            .map_err(|e| db_error("failed to decode mailbox", e))?)
    }

    async fn list_mailboxes_by_username(&mut self, username: &str) -> Result<Vec<Mailbox>> {
        let rows: Vec<MailboxRow> = sqlx::query_as(&format!(
            "SELECT {MAILBOX_COLUMNS} FROM mailboxes WHERE tenant = $1 AND lower(username) = lower($2)"
        ))
        .bind(self.tenant.as_str())
        .bind(username)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to list mailboxes", e))?;
        decode_mailboxes(rows)
    }

    async fn list_mailboxes_for_ramp_up(&mut self) -> Result<Vec<Mailbox>> {
        let rows: Vec<MailboxRow> = sqlx::query_as(&format!(
            r#"
            SELECT {MAILBOX_COLUMNS} FROM mailboxes
            WHERE tenant = $1 AND ramp_up_current < ramp_up_max
            ORDER BY username
            FOR UPDATE
            "#
        ))
        .bind(self.tenant.as_str())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to list mailboxes for ramp-up", e))?;
        decode_mailboxes(rows)
    }

    async fn merge_mailbox(&mut self, mailbox: &Mailbox) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mailboxes
                (tenant, username, password, domain, ramp_up_current, ramp_up_max, ramp_up_rate,
                 last_ramp_up_at, min_minutes_between_emails, max_minutes_between_emails)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (tenant, username) DO UPDATE SET
                password = EXCLUDED.password,
                domain = EXCLUDED.domain,
                ramp_up_current = EXCLUDED.ramp_up_current,
                ramp_up_max = EXCLUDED.ramp_up_max,
                ramp_up_rate = EXCLUDED.ramp_up_rate,
                last_ramp_up_at = EXCLUDED.last_ramp_up_at,
                min_minutes_between_emails = EXCLUDED.min_minutes_between_emails,
                max_minutes_between_emails = EXCLUDED.max_minutes_between_emails
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(&mailbox.username)
        .bind(&mailbox.password)
        .bind(&mailbox.domain)
        .bind(to_i32(mailbox.ramp_up_current))
        .bind(to_i32(mailbox.ramp_up_max))
        .bind(to_i32(mailbox.ramp_up_rate))
        .bind(mailbox.last_ramp_up_at)
        .bind(to_i32(mailbox.min_minutes_between_emails))
        .bind(to_i32(mailbox.max_minutes_between_emails))
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to save mailbox", e))?;
        Ok(())
    }
}

#[derive(FromRow)]
struct ScheduleRow {
    day_range: String,
    start_hour: String,
    end_hour: String,
}

#[async_trait]
impl WorkingScheduleRepository for PgTransaction {
    async fn working_schedules_for_user(&mut self, user_id: UserId) -> Result<Vec<UserWorkingSchedule>> {
        let rows: Vec<ScheduleRow> = sqlx::query_as(
            r#"
            SELECT day_range, start_hour, end_hour FROM user_working_schedules
            WHERE tenant = $1 AND user_id = $2
            ORDER BY position
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(user_id.to_string())
        .fetch_all(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load working schedules", e))?;
        Ok(rows
            .into_iter()
            .map(|row| UserWorkingSchedule::new(user_id, row.day_range, row.start_hour, row.end_hour))
            .collect())
    }
}

#[async_trait]
impl MailboxLedger for PgTransaction {
    async fn last_execution_for_mailbox(&mut self, mailbox: &str) -> Result<Option<DateTime<Utc>>> {
        let last: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(scheduled_at) FROM flow_action_executions WHERE tenant = $1 AND mailbox = $2",
        )
        .bind(self.tenant.as_str())
        .bind(mailbox)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load last mailbox execution", e))?;
        Ok(last)
    }

    async fn count_executions_for_mailbox_in_day(&mut self, mailbox: &str, day: NaiveDate) -> Result<u64> {
        let start = day.and_time(chrono::NaiveTime::MIN).and_utc();
        let end = start + Duration::days(1);
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM flow_action_executions
            WHERE tenant = $1 AND mailbox = $2
              AND status IN ('SCHEDULED', 'SUCCESS', 'TECH_ERROR')
              AND scheduled_at >= $3 AND scheduled_at < $4
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(mailbox)
        .bind(start)
        .bind(end)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to count mailbox executions", e))?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}
