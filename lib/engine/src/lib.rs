//! Flow execution engine.
//!
//! This crate ties the flow model and the slot allocator to storage and the
//! event bus:
//!
//! - **Store traits**: a tenant-scoped unit of work over flows, mailboxes,
//!   working schedules and the outbound email queue
//! - **Scheduler**: per-participant next-action scheduling with sticky
//!   mailbox binding
//! - **Processor**: runs due executions, composes emails and chains replies
//! - **Periodic workers**: due-execution sweep, ramp-up, statistics and
//!   re-scheduling
//! - **Adapters**: NATS event bus, directory, notifier, clock, and in-memory
//!   implementations for tests

pub mod bus;
pub mod clock;
pub mod directory;
pub mod engine;
pub mod goal;
pub mod handler;
pub mod lifecycle;
pub mod memory;
pub mod nats;
pub mod notify;
pub mod process;
pub mod ramp;
pub mod requirements;
pub mod schedule;
pub mod stats;
pub mod store;
pub mod sweeper;

#[cfg(test)]
mod scenarios;

pub use bus::{EventBus, NullEventBus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use directory::{Directory, EntityProfile, UserProfile};
pub use engine::{Engine, EngineConfig};
pub use handler::{EventHandler, Handled};
pub use nats::{NatsConfig, NatsEventBus};
pub use notify::{LoggingNotifier, Notifier, Recipient};
pub use process::ProcessOutcome;
pub use schedule::{ScheduleOutcome, SkipReason};
pub use store::{EmailQueue, FlowRepository, FlowStore, Transaction};
pub use sweeper::SweepReport;
