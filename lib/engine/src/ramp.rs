//! Daily mailbox ramp-up.

use crate::engine::Engine;
use crate::store::{FlowStore, Transaction};
use chrono::{DateTime, Utc};
use flowline_core::{Result, Tenant};
use flowline_scheduler::MailboxRepository;
use tracing::instrument;

/// Start of the UTC day containing `now`.
pub(crate) fn start_of_day(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc()
}

impl<S: FlowStore> Engine<S> {
    /// Applies every missed daily quota increment to a tenant's mailboxes.
    ///
    /// Returns how many mailboxes changed.
    ///
    /// # Errors
    ///
    /// Returns any store error. The tenant's changes are all-or-nothing.
    #[instrument(skip(self))]
    pub async fn ramp_up_mailboxes(&self, tenant: &Tenant) -> Result<usize> {
        self.with_deadline("ramp_up_mailboxes", async {
            let today = start_of_day(self.now());
            let mut tx = self.store.begin(tenant).await?;
            let mut changed = 0;
            for mut mailbox in tx.list_mailboxes_for_ramp_up().await? {
                tx.lock_mailbox(&mailbox.username).await?;
                let before = mailbox.ramp_up_current;
                if mailbox.catch_up_ramp(today) {
                    tx.merge_mailbox(&mailbox).await?;
                    tracing::info!(
                        mailbox = %mailbox.username,
                        from = before,
                        to = mailbox.ramp_up_current,
                        "ramped up mailbox"
                    );
                    changed += 1;
                }
            }
            tx.commit().await?;
            Ok(changed)
        })
        .await
    }
}
