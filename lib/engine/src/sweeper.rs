//! Periodic workers: due-execution sweep, ramp-up, statistics and
//! re-scheduling, each run per tenant.

use crate::engine::Engine;
use crate::process::ProcessOutcome;
use crate::store::{FlowRepository, FlowStore};
use flowline_core::{OperationContext, Result, Tenant};
use flowline_flow::FlowEvent;
use std::fmt::Debug;
use std::future::Future;
use tracing::instrument;

/// Totals from one execution sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub succeeded: usize,
    pub business_errors: usize,
    pub tech_errors: usize,
    pub skipped: usize,
    /// Executions whose failure could not even be recorded.
    pub failed: usize,
}

impl SweepReport {
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.business_errors + self.tech_errors + self.skipped + self.failed
    }
}

impl<S: FlowStore> Engine<S> {
    /// Processes a tenant's due executions, oldest first, each in its own
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the due executions cannot be loaded.
    #[instrument(skip(self))]
    pub async fn process_due_executions(&self, tenant: &Tenant) -> Result<SweepReport> {
        let due = {
            let mut tx = self.store.begin(tenant).await?;
            tx.get_executions_scheduled_before(self.now(), self.config.sweep_batch_size)
                .await?
        };

        let mut report = SweepReport::default();
        for execution in due {
            let ctx = OperationContext::system(tenant.clone());
            match self.process_execution(&ctx, execution.id).await {
                Ok(ProcessOutcome::Succeeded) => report.succeeded += 1,
                Ok(ProcessOutcome::Skipped) => report.skipped += 1,
                Ok(ProcessOutcome::BusinessError { .. }) => report.business_errors += 1,
                Ok(ProcessOutcome::TechError { .. }) => report.tech_errors += 1,
                Err(e) => {
                    tracing::warn!(error = %e, execution_id = %execution.id, "failed to process execution");
                    report.failed += 1;
                }
            }
        }
        if report.total() > 0 {
            tracing::info!(?report, "processed due executions");
        }
        Ok(report)
    }

    /// Requests scheduling of every ON flow of a tenant, so participants
    /// whose successor scheduling failed get another chance.
    ///
    /// Returns the number of flows requested.
    ///
    /// # Errors
    ///
    /// Returns an error if the flows cannot be loaded.
    #[instrument(skip(self))]
    pub async fn request_reschedule(&self, tenant: &Tenant) -> Result<usize> {
        let flows = {
            let mut tx = self.store.begin(tenant).await?;
            tx.list_flows().await?
        };
        let events: Vec<_> = flows
            .iter()
            .filter(|flow| flow.is_on())
            .map(|flow| FlowEvent::ScheduleFlow { flow_id: flow.id })
            .collect();
        let requested = events.len();
        self.publish_all(&OperationContext::system(tenant.clone()), events)
            .await;
        Ok(requested)
    }

    /// Runs the execution sweep for every tenant.
    pub async fn sweep_executions(&self) {
        self.for_each_tenant("execution sweep", |tenant| async move {
            self.process_due_executions(&tenant).await
        })
        .await;
    }

    /// Runs the ramp-up worker for every tenant.
    pub async fn sweep_ramp_up(&self) {
        self.for_each_tenant("ramp-up", |tenant| async move {
            self.ramp_up_mailboxes(&tenant).await
        })
        .await;
    }

    /// Runs the statistics aggregator for every tenant.
    pub async fn sweep_statistics(&self) {
        self.for_each_tenant("statistics", |tenant| async move {
            self.refresh_statistics(&tenant).await
        })
        .await;
    }

    /// Requests re-scheduling for every tenant.
    pub async fn sweep_reschedule(&self) {
        self.for_each_tenant("reschedule", |tenant| async move {
            self.request_reschedule(&tenant).await
        })
        .await;
    }

    async fn for_each_tenant<F, Fut, T>(&self, job: &'static str, mut run: F)
    where
        F: FnMut(Tenant) -> Fut,
        Fut: Future<Output = Result<T>>,
        T: Debug,
    {
        let tenants = match self.store.tenants().await {
            Ok(tenants) => tenants,
            Err(e) => {
                tracing::warn!(error = %e, job, "failed to list tenants");
                return;
            }
        };
        for tenant in tenants {
            match run(tenant.clone()).await {
                Ok(result) => tracing::debug!(job, %tenant, ?result, "periodic job finished"),
                Err(e) => tracing::warn!(error = %e, job, %tenant, "periodic job failed"),
            }
        }
    }
}
