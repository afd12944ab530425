//! The outbound email queue.

use super::{PgTransaction, db_error, parse_column};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_core::{ExecutionId, Result};
use flowline_engine::EmailQueue;
use flowline_flow::EmailMessage;
use sqlx::FromRow;
use sqlx::types::Json;

#[derive(FromRow)]
struct EmailRow {
    id: String,
    producer_type: String,
    producer_id: String,
    from_address: String,
    from_name: String,
    to_addresses: Json<Vec<String>>,
    cc_addresses: Json<Vec<String>>,
    bcc_addresses: Json<Vec<String>>,
    subject: String,
    content: String,
    provider_message_id: Option<String>,
    provider_in_reply_to: Option<String>,
    provider_references: Option<String>,
    provider_thread_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
}

impl EmailRow {
    fn try_into_message(self) -> std::result::Result<EmailMessage, sqlx::Error> {
        Ok(EmailMessage {
            id: parse_column("email id", &self.id)?,
            producer_id: parse_column("producer id", &self.producer_id)?,
            producer_type: self.producer_type,
            from: self.from_address,
            from_name: self.from_name,
            to: self.to_addresses.0,
            cc: self.cc_addresses.0,
            bcc: self.bcc_addresses.0,
            subject: self.subject,
            content: self.content,
            provider_message_id: self.provider_message_id,
            provider_in_reply_to: self.provider_in_reply_to,
            provider_references: self.provider_references,
            provider_thread_id: self.provider_thread_id,
            status: parse_column("email status", &self.status)?,
            created_at: self.created_at,
        })
    }
}

#[async_trait]
impl EmailQueue for PgTransaction {
    async fn enqueue_email(&mut self, message: &EmailMessage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO email_messages
                (tenant, id, producer_type, producer_id, from_address, from_name,
                 to_addresses, cc_addresses, bcc_addresses, subject, content,
                 provider_message_id, provider_in_reply_to, provider_references,
                 provider_thread_id, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(message.id.to_string())
        .bind(&message.producer_type)
        .bind(message.producer_id.to_string())
        .bind(&message.from)
        .bind(&message.from_name)
        .bind(Json(&message.to))
        .bind(Json(&message.cc))
        .bind(Json(&message.bcc))
        .bind(&message.subject)
        .bind(&message.content)
        .bind(&message.provider_message_id)
        .bind(&message.provider_in_reply_to)
        .bind(&message.provider_references)
        .bind(&message.provider_thread_id)
        .bind(message.status.as_str())
        .bind(message.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to enqueue email", e))?;
        Ok(())
    }

    async fn find_email_by_producer(
        &mut self,
        producer_type: &str,
        producer_id: ExecutionId,
    ) -> Result<Option<EmailMessage>> {
        let row: Option<EmailRow> = sqlx::query_as(
            r#"
            SELECT id, producer_type, producer_id, from_address, from_name,
                   to_addresses, cc_addresses, bcc_addresses, subject, content,
                   provider_message_id, provider_in_reply_to, provider_references,
                   provider_thread_id, status, created_at
            FROM email_messages
            WHERE tenant = $1 AND producer_type = $2 AND producer_id = $3
            "#,
        )
        .bind(self.tenant.as_str())
        .bind(producer_type)
        .bind(producer_id.to_string())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| db_error("failed to load email", e))?;
        Ok(row
            .map(EmailRow::try_into_message)
            .transpose()
            .map_err(|e| db_error("failed to decode email", e))?)
    }
}
