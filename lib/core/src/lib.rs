//! Core domain types and utilities for the flowline engine.
//!
//! This crate provides the foundational types shared by every flowline crate:
//! strongly-typed identifiers, tenant and participant entity references, and
//! the error kinds every operation reports.

pub mod context;
pub mod entity;
pub mod error;
pub mod id;

pub use context::OperationContext;
pub use entity::{EntityRef, EntityType, ParseEntityTypeError, Tenant};
pub use error::{EngineError, Result};
pub use id::{
    BillableEventId, EmailMessageId, EventId, ExecutionId, ExecutionSettingsId, FlowActionId,
    FlowId, ParseIdError, ParticipantId, SenderId, UserId,
};
