//! HTTP notification adapter.
//!
//! Posts one JSON request per notification to the configured workflow
//! service endpoint.

use async_trait::async_trait;
use flowline_core::{EngineError, Result};
use flowline_engine::{Notifier, Recipient};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationRequest<'a> {
    workflow_id: &'a str,
    to: &'a Recipient,
    subject: &'a str,
    payload: &'a Value,
}

/// A [`Notifier`] that triggers notification workflows over HTTP.
#[derive(Clone)]
pub struct HttpNotifier {
    client: reqwest::Client,
    url: String,
}

impl HttpNotifier {
    /// Creates a notifier posting to `url`.
    ///
    /// # Errors
    ///
    /// Returns `Transient` if the HTTP client cannot be built.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::transient(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send(
        &self,
        workflow_id: &str,
        to: &Recipient,
        subject: &str,
        template_data: &Value,
    ) -> Result<()> {
        let request = NotificationRequest {
            workflow_id,
            to,
            subject,
            payload: template_data,
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::transient(format!("failed to send notification: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(%status, %body, workflow_id, "notification endpoint returned error");
            return Err(EngineError::transient(format!(
                "notification endpoint returned {status}"
            ))
            .into());
        }
        tracing::debug!(workflow_id, to = %to.email, "notification sent");
        Ok(())
    }
}
