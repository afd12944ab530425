//! Storage traits for mailboxes and working schedules.
//!
//! Both are implemented by the engine's store transaction, so every read and
//! write here participates in the surrounding unit of work.

use crate::mailbox::Mailbox;
use crate::working_schedule::UserWorkingSchedule;
use async_trait::async_trait;
use flowline_core::{Result, UserId};

/// Mailbox persistence.
#[async_trait]
pub trait MailboxRepository: Send {
    /// Gets a mailbox by its address.
    async fn get_mailbox(&mut self, username: &str) -> Result<Option<Mailbox>>;

    /// Lists mailboxes registered under an address.
    async fn list_mailboxes_by_username(&mut self, username: &str) -> Result<Vec<Mailbox>>;

    /// Lists mailboxes whose quota is still below its ceiling.
    async fn list_mailboxes_for_ramp_up(&mut self) -> Result<Vec<Mailbox>>;

    /// Inserts or updates a mailbox.
    async fn merge_mailbox(&mut self, mailbox: &Mailbox) -> Result<()>;
}

/// Working-hours lookup.
#[async_trait]
pub trait WorkingScheduleRepository: Send {
    /// Returns a user's schedule rows in scan order.
    async fn working_schedules_for_user(&mut self, user_id: UserId) -> Result<Vec<UserWorkingSchedule>>;
}
