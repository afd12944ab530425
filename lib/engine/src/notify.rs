//! Notification adapter for messages to users (not participants).

use async_trait::async_trait;
use flowline_core::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who a notification goes to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recipient {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub subscriber_id: String,
}

/// Sends templated notifications through an external workflow service.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        workflow_id: &str,
        to: &Recipient,
        subject: &str,
        template_data: &Value,
    ) -> Result<()>;
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn send(
        &self,
        workflow_id: &str,
        to: &Recipient,
        subject: &str,
        template_data: &Value,
    ) -> Result<()> {
        tracing::info!(
            workflow_id,
            to = %to.email,
            subject,
            data = %template_data,
            "notification (not delivered, no notifier configured)"
        );
        Ok(())
    }
}
