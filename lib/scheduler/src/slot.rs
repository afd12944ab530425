//! Mailbox slot allocation.
//!
//! A slot is a send time for a mailbox that satisfies, all in UTC:
//! - the mailbox's daily quota (`ramp_up_current`)
//! - a working-hours window of the sending user
//! - a random spacing drawn from the mailbox's min/max minutes
//! - monotonicity: never earlier than the mailbox's latest execution
//!
//! The allocator reads the mailbox history through a [`MailboxLedger`], which
//! callers implement on the same store transaction that will insert the new
//! execution.

use crate::mailbox::Mailbox;
use crate::working_schedule::{UserWorkingSchedule, next_window_start, window_for};
use async_trait::async_trait;
use chrono::{DateTime, Duration, DurationRound, NaiveDate, TimeDelta, Utc};
use flowline_core::{EngineError, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Upper bound on loop iterations before giving up on a mailbox.
const MAX_ITERATIONS: usize = 3 * 366;

/// Read access to a mailbox's scheduling history.
#[async_trait]
pub trait MailboxLedger: Send {
    /// Returns the `scheduledAt` of the latest execution for a mailbox.
    async fn last_execution_for_mailbox(&mut self, mailbox: &str) -> Result<Option<DateTime<Utc>>>;

    /// Counts SCHEDULED and SUCCESS executions for a mailbox whose
    /// `scheduledAt` falls on the given UTC day.
    async fn count_executions_for_mailbox_in_day(&mut self, mailbox: &str, day: NaiveDate) -> Result<u64>;
}

/// Computes legal send times.
pub struct SlotAllocator {
    rng: Mutex<StdRng>,
}

impl SlotAllocator {
    /// Creates an allocator with a deterministic generator.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Creates an allocator seeded from OS entropy.
    #[must_use]
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    fn random_delay(&self, mailbox: &Mailbox) -> Duration {
        let low = mailbox
            .min_minutes_between_emails
            .min(mailbox.max_minutes_between_emails);
        let high = mailbox
            .min_minutes_between_emails
            .max(mailbox.max_minutes_between_emails);
        let minutes = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(low..=high);
        Duration::minutes(i64::from(minutes))
    }

    /// Places `slot` at a random instant within its minute, never before
    /// `not_before`.
    fn perturb(&self, slot: DateTime<Utc>, not_before: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let minute = slot
            .duration_trunc(TimeDelta::minutes(1))
            .unwrap_or(slot);
        let floor_micros = not_before
            .map(|at| (at - minute).num_microseconds().unwrap_or(0))
            .unwrap_or(0)
            .clamp(0, 59_999_999);
        let offset = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen_range(floor_micros..60_000_000);
        minute + Duration::microseconds(offset)
    }

    /// Returns the next legal send time for `mailbox` at or after `desired_at`.
    ///
    /// The minute of the result is the scheduling decision; the sub-minute
    /// part is random so that messages never share a timestamp.
    ///
    /// # Errors
    ///
    /// Returns `NoWorkingSchedule` if the schedules cover no weekday,
    /// `NoMailboxAvailable` if the mailbox has no daily quota or no slot is
    /// found within the search horizon, and any ledger error.
    #[tracing::instrument(skip(self, ledger, mailbox, schedules), fields(mailbox = %mailbox.username))]
    pub async fn next_legal_slot<L>(
        &self,
        ledger: &mut L,
        mailbox: &Mailbox,
        desired_at: DateTime<Utc>,
        now: DateTime<Utc>,
        schedules: &[UserWorkingSchedule],
    ) -> Result<DateTime<Utc>>
    where
        L: MailboxLedger + ?Sized,
    {
        if mailbox.ramp_up_current == 0 {
            return Err(EngineError::NoMailboxAvailable {
                details: format!("mailbox {} has no daily quota", mailbox.username),
            }
            .into());
        }
        let no_schedule = || EngineError::NoWorkingSchedule {
            user_id: schedules
                .first()
                .map(|s| s.user_id.to_string())
                .unwrap_or_default(),
        };

        let last_at = ledger.last_execution_for_mailbox(&mailbox.username).await?;
        let mut candidate = desired_at.max(now);
        if let Some(last_at) = last_at {
            candidate = candidate.max(last_at);
        }

        for _ in 0..MAX_ITERATIONS {
            let day = candidate.date_naive();

            let used = ledger
                .count_executions_for_mailbox_in_day(&mailbox.username, day)
                .await?;
            if used >= u64::from(mailbox.ramp_up_current) {
                tracing::debug!(%day, used, "daily quota reached, moving to next day");
                candidate = next_midnight(day);
                continue;
            }

            let Some((start, end)) = window_for(schedules, day) else {
                candidate = next_window_start(schedules, day).ok_or_else(no_schedule)?;
                continue;
            };

            let proposal = candidate + self.random_delay(mailbox);
            // Windows are minute-granular; seconds carried over from the
            // latest execution do not push a proposal past `end`.
            let proposal_minute = proposal
                .duration_trunc(TimeDelta::minutes(1))
                .unwrap_or(proposal);
            if proposal < start {
                candidate = start;
            } else if proposal_minute > end {
                candidate = next_midnight(day);
            } else {
                let slot = self.perturb(proposal, last_at);
                tracing::debug!(%slot, "slot allocated");
                return Ok(slot);
            }
        }

        Err(EngineError::NoMailboxAvailable {
            details: format!("no slot found for mailbox {}", mailbox.username),
        }
        .into())
    }
}

fn next_midnight(day: NaiveDate) -> DateTime<Utc> {
    day.succ_opt()
        .unwrap_or(day)
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
