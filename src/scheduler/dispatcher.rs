use crate::provider::ProviderClient;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::executor::{DispatchOutcome, Executor};
use crate::scheduler::reconcile::{ReconcileSummary, Reconciler};
use crate::scheduler::selector;
use chrono::Utc;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use std::collections::HashSet;
use uuid::Uuid;

/// Counts reported by one scheduling pass. Items parked on a halted
/// account (and those that hit the capacity re-count) stay pending and
/// are counted as deferred.
#[derive(Debug, Default, Clone, Copy, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PassSummary {
    pub selected: usize,
    pub sent: usize,
    pub deferred: usize,
    pub failed: usize,
    pub skipped: usize,
    pub conflicts: usize,
    pub ambiguous: usize,
    pub reconciled: ReconcileSummary,
}

/// Orchestrates scheduling passes: reconcile stranded items, select a
/// batch, dispatch it one item at a time. Also hosts the background
/// loop spawned at liftoff. Passes may run concurrently from several
/// process instances; the claim transaction keeps them from stepping
/// on each other.
pub struct Dispatcher {
    pool: PgPool,
    config: SchedulerConfig,
    executor: Executor,
    reconciler: Reconciler,
}

impl Dispatcher {
    pub fn new(pool: PgPool, provider: ProviderClient, config: SchedulerConfig) -> Self {
        let executor = Executor::new(pool.clone(), provider.clone(), config.clone());
        let reconciler = Reconciler::new(pool.clone(), provider, config.clone());
        Self {
            pool,
            config,
            executor,
            reconciler,
        }
    }

    /// Run one scheduling pass.
    pub async fn run_pass(&self) -> Result<PassSummary, String> {
        let as_of = Utc::now();

        let reconciled = self.reconciler.run(as_of).await?;

        let batch = selector::select_batch(&self.pool, &self.config, as_of)
            .await
            .map_err(|err| format!("dispatcher: selection failed: {}", err))?;

        let mut summary = PassSummary {
            selected: batch.len(),
            reconciled,
            ..PassSummary::default()
        };

        if batch.is_empty() {
            log::debug!("dispatcher: nothing eligible to dispatch");
            return Ok(summary);
        }

        log::info!("dispatcher: claimed batch of {} item(s)", batch.len());

        // Dispatch sequentially; jitter doubles as spacing between the
        // real-world send instants.
        let mut halted_accounts: HashSet<Uuid> = HashSet::new();
        for item in batch {
            if halted_accounts.contains(&item.account_id) {
                log::warn!(
                    "item {}: account was halted earlier in this pass, leaving pending",
                    item.id
                );
                summary.deferred += 1;
                continue;
            }

            match self.executor.dispatch(item.id, Utc::now()).await {
                Ok(DispatchOutcome::Sent) => summary.sent += 1,
                Ok(DispatchOutcome::Deferred) | Ok(DispatchOutcome::CapacityExhausted) => {
                    summary.deferred += 1
                }
                Ok(DispatchOutcome::Failed) => summary.failed += 1,
                Ok(DispatchOutcome::AccountHalted) => {
                    summary.failed += 1;
                    halted_accounts.insert(item.account_id);
                }
                Ok(DispatchOutcome::Skipped) => summary.skipped += 1,
                Ok(DispatchOutcome::Ambiguous) => summary.ambiguous += 1,
                Ok(DispatchOutcome::Conflict) => summary.conflicts += 1,
                Err(err) => {
                    // The item may still be processing; the reconciler
                    // picks it up once it goes stale.
                    log::error!("dispatcher: {}", err);
                }
            }
        }

        log::info!(
            "dispatcher: pass complete - {} sent, {} deferred, {} failed, {} skipped, {} ambiguous, {} conflicts",
            summary.sent,
            summary.deferred,
            summary.failed,
            summary.skipped,
            summary.ambiguous,
            summary.conflicts
        );

        Ok(summary)
    }

    /// Run passes forever, sleeping the configured interval between them.
    pub async fn run(self) -> ! {
        log::info!(
            "dispatcher started, pass interval {:?}",
            self.config.pass_interval
        );

        loop {
            if let Err(err) = self.run_pass().await {
                log::error!("dispatcher: pass failed: {}", err);
            }

            tokio::time::sleep(self.config.pass_interval).await;
        }
    }
}
