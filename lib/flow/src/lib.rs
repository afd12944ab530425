//! Flow model for the flowline engine.
//!
//! This crate provides the pure, storage-independent parts of the engine:
//!
//! - **Actions**: typed flow steps with kind-tagged data
//! - **Authoring graph**: the editor's node/edge JSON, round-tripped on save
//! - **Compiler**: validation, WAIT folding and NEXT link emission
//! - **Participants and executions**: status machines for enrolled entities
//! - **Requirements and templates**: eligibility checks and message rendering
//! - **Events**: bus events and their versioned envelope

pub mod action;
pub mod author;
pub mod compiler;
pub mod definition;
pub mod email;
pub mod envelope;
pub mod event;
pub mod execution;
pub mod graph;
pub mod participant;
pub mod requirements;
pub mod sender;
pub mod template;

pub use action::{ActionBody, ActionData, ActionKind, FlowAction};
pub use author::{AuthorEdge, AuthorGraph, AuthorNode, AuthorNodeData};
pub use compiler::{CompiledFlow, compile};
pub use definition::{Flow, FlowCounters, FlowStatus};
pub use email::{EmailMessage, EmailStatus, PRODUCER_FLOW_ACTION_EXECUTION};
pub use envelope::Envelope;
pub use event::{CompletionKind, FlowEvent};
pub use execution::{BillableEvent, ExecutionStatus, FlowActionExecution};
pub use graph::ActionGraph;
pub use participant::{FlowParticipant, ParticipantStatus};
pub use requirements::FlowRequirements;
pub use sender::{FlowExecutionSettings, FlowSender};
pub use template::{TemplateContext, render};
