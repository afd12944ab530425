//! Mailbox capacity and send-time allocation.
//!
//! This crate provides:
//!
//! - **Mailboxes**: per-mailbox daily quota with catch-up ramp-up
//! - **Working schedules**: weekday/hour windows and window resolution
//! - **Slot allocator**: quota, working hours, spacing and monotonicity
//! - **Repositories**: storage traits implemented by the engine's store

pub mod mailbox;
pub mod repository;
pub mod slot;
pub mod working_schedule;

pub use mailbox::Mailbox;
pub use repository::{MailboxRepository, WorkingScheduleRepository};
pub use slot::{MailboxLedger, SlotAllocator};
pub use working_schedule::{DayRange, ScheduleParseError, UserWorkingSchedule, window_for};
