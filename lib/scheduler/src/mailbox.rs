//! Sending mailboxes and their daily ramp-up.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// An email account used to send flow messages.
///
/// `ramp_up_current` is the daily send quota. It grows by `ramp_up_rate`
/// once per UTC day until it reaches `ramp_up_max`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mailbox {
    /// Full email address.
    pub username: String,
    pub password: String,
    pub domain: String,
    pub ramp_up_current: u32,
    pub ramp_up_max: u32,
    pub ramp_up_rate: u32,
    pub last_ramp_up_at: DateTime<Utc>,
    pub min_minutes_between_emails: u32,
    pub max_minutes_between_emails: u32,
}

impl fmt::Debug for Mailbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mailbox")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("domain", &self.domain)
            .field("ramp_up_current", &self.ramp_up_current)
            .field("ramp_up_max", &self.ramp_up_max)
            .field("ramp_up_rate", &self.ramp_up_rate)
            .field("last_ramp_up_at", &self.last_ramp_up_at)
            .field("min_minutes_between_emails", &self.min_minutes_between_emails)
            .field("max_minutes_between_emails", &self.max_minutes_between_emails)
            .finish()
    }
}

impl Mailbox {
    /// Creates a mailbox for an address with the given quota and spacing.
    #[must_use]
    pub fn new(username: impl Into<String>, ramp_up_current: u32, now: DateTime<Utc>) -> Self {
        let username = username.into();
        let domain = username
            .rsplit_once('@')
            .map(|(_, domain)| domain.to_string())
            .unwrap_or_default();
        Self {
            username,
            password: String::new(),
            domain,
            ramp_up_current,
            ramp_up_max: ramp_up_current,
            ramp_up_rate: 0,
            last_ramp_up_at: now,
            min_minutes_between_emails: 1,
            max_minutes_between_emails: 1,
        }
    }

    /// Sets the inter-message spacing bounds in minutes.
    #[must_use]
    pub fn with_spacing(mut self, min_minutes: u32, max_minutes: u32) -> Self {
        self.min_minutes_between_emails = min_minutes;
        self.max_minutes_between_emails = max_minutes;
        self
    }

    /// Sets the ramp-up ceiling and daily increment.
    #[must_use]
    pub fn with_ramp(mut self, max: u32, rate: u32, last_ramp_up_at: DateTime<Utc>) -> Self {
        self.ramp_up_max = max;
        self.ramp_up_rate = rate;
        self.last_ramp_up_at = last_ramp_up_at;
        self
    }

    /// Returns true if a ramp-up pass would change this mailbox.
    #[must_use]
    pub fn needs_ramp_up(&self, today_start: DateTime<Utc>) -> bool {
        self.ramp_up_current < self.ramp_up_max && self.last_ramp_up_at < today_start
    }

    /// Applies every daily increment missed since `last_ramp_up_at`.
    ///
    /// The quota never decreases and never exceeds `ramp_up_max`. Returns
    /// true if anything changed.
    pub fn catch_up_ramp(&mut self, today_start: DateTime<Utc>) -> bool {
        let mut changed = false;
        while self.needs_ramp_up(today_start) {
            self.ramp_up_current = self
                .ramp_up_current
                .saturating_add(self.ramp_up_rate)
                .min(self.ramp_up_max);
            self.last_ramp_up_at += Duration::days(1);
            changed = true;
        }
        changed
    }
}
