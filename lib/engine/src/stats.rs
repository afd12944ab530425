//! Per-flow participant statistics.

use crate::engine::Engine;
use crate::store::{FlowRepository, FlowStore, Transaction};
use flowline_core::{OperationContext, Result, Tenant};
use flowline_flow::{CompletionKind, FlowCounters, FlowEvent, ParticipantStatus};
use tracing::instrument;

impl<S: FlowStore> Engine<S> {
    /// Recounts participants by status for every flow of a tenant and
    /// stores the counters on flows whose numbers moved.
    ///
    /// Returns how many flows were updated.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    #[instrument(skip(self))]
    pub async fn refresh_statistics(&self, tenant: &Tenant) -> Result<usize> {
        self.with_deadline("refresh_statistics", async {
            let now = self.now();
            let mut tx = self.store.begin(tenant).await?;
            let mut events = Vec::new();
            for mut flow in tx.list_flows().await? {
                tx.lock_flow(flow.id).await?;
                let mut counts = Vec::with_capacity(ParticipantStatus::ALL.len());
                for status in ParticipantStatus::ALL {
                    counts.push((status, tx.count_participants_with_status(flow.id, status).await?));
                }
                let counters = FlowCounters::from_counts(counts);
                if counters == flow.counters {
                    continue;
                }
                flow.counters = counters;
                flow.updated_at = now;
                tx.merge_flow(&flow).await?;
                events.push(FlowEvent::flow_changed(flow.id, CompletionKind::Update));
            }
            tx.commit().await?;

            let updated = events.len();
            if updated > 0 {
                let ctx = OperationContext::system(tenant.clone());
                self.publish_all(&ctx, events).await;
                tracing::debug!(updated, "refreshed flow statistics");
            }
            Ok(updated)
        })
        .await
    }
}
