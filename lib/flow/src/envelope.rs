//! Versioned envelope for events on the bus.
//!
//! Every event travels as
//! `{ version, event: { id, tenant, entityId, entityType, eventType, data }, metadata: { ... } }`.
//! The `version` header allows schema evolution and rolling deployments.

use crate::event::FlowEvent;
use chrono::{DateTime, Utc};
use flowline_core::{EventId, OperationContext, Tenant};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The current envelope version.
pub const CURRENT_VERSION: u32 = 1;

/// The event half of an envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBody {
    pub id: EventId,
    pub tenant: Tenant,
    pub entity_id: String,
    pub entity_type: String,
    pub event_type: String,
    pub data: Value,
}

/// Who caused the event and when.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMetadata {
    pub trace_id: String,
    pub app_source: String,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A versioned event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The version of the envelope format.
    pub version: u32,
    pub event: EventBody,
    pub metadata: EventMetadata,
}

impl Envelope {
    /// Wraps an event raised within `ctx`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be serialized.
    pub fn wrap(
        ctx: &OperationContext,
        event: &FlowEvent,
        app_source: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, serde_json::Error> {
        let mut tagged = serde_json::to_value(event)?;
        let data = tagged
            .get_mut("data")
            .map(Value::take)
            .unwrap_or(Value::Null);
        let (entity_id, entity_type) = event.subject_entity();

        Ok(Self {
            version: CURRENT_VERSION,
            event: EventBody {
                id: EventId::new(),
                tenant: ctx.tenant.clone(),
                entity_id,
                entity_type,
                event_type: event.topic().to_string(),
                data,
            },
            metadata: EventMetadata {
                trace_id: ctx.trace_id.clone(),
                app_source: app_source.to_string(),
                user_id: ctx.user_id.clone(),
                user_email: ctx.user_email.clone(),
                timestamp: now,
            },
        })
    }

    /// Decodes the typed event.
    ///
    /// # Errors
    ///
    /// Returns an error if the event type is unknown or the data does not
    /// match it.
    pub fn decode(&self) -> Result<FlowEvent, serde_json::Error> {
        serde_json::from_value(serde_json::json!({
            "eventType": self.event.event_type,
            "data": self.event.data,
        }))
    }

    /// Rebuilds the context the event was raised in, keeping its trace.
    #[must_use]
    pub fn context(&self) -> OperationContext {
        OperationContext {
            tenant: self.event.tenant.clone(),
            trace_id: self.metadata.trace_id.clone(),
            user_id: self.metadata.user_id.clone(),
            user_email: self.metadata.user_email.clone(),
        }
    }

    /// Returns true if this envelope uses the current version.
    #[must_use]
    pub fn is_current_version(&self) -> bool {
        self.version == CURRENT_VERSION
    }

    /// Serializes the envelope to JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserializes an envelope from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
