use crate::models::{Account, QueueItem, QueueStatus};
use crate::provider::{ProviderClient, SentRecord};
use crate::scheduler::audit::{self, AuditRecord, AuditStage};
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::queue::SendQueue;
use chrono::{DateTime, Duration, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;

/// Counts from one reconciliation sweep.
#[derive(Debug, Default, Clone, Copy, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileSummary {
    pub examined: usize,
    pub confirmed_sent: usize,
    pub requeued: usize,
    pub failed: usize,
    pub unresolved: usize,
}

enum Resolution {
    ConfirmedSent,
    Requeued,
    Failed,
    Unresolved,
}

/// Resolves items stranded in `processing` after an ambiguous provider
/// outcome (or an executor crash) by consulting the provider's sent
/// history. Only this component may move an ambiguous item out of
/// `processing`; retrying one blind risks a duplicate send.
pub struct Reconciler {
    pool: PgPool,
    queue: SendQueue,
    provider: ProviderClient,
    config: SchedulerConfig,
}

impl Reconciler {
    pub fn new(pool: PgPool, provider: ProviderClient, config: SchedulerConfig) -> Self {
        let queue = SendQueue::new(pool.clone());
        Self {
            pool,
            queue,
            provider,
            config,
        }
    }

    /// Sweep items whose claim is older than the staleness threshold.
    /// Younger `processing` items are left alone; a live executor may
    /// still be inside its jitter delay or network call.
    pub async fn run(&self, as_of: DateTime<Utc>) -> Result<ReconcileSummary, String> {
        let cutoff = as_of - self.config.reconcile_after();
        let stale = self
            .queue
            .stale_processing(cutoff)
            .await
            .map_err(|err| format!("reconciler: stale lookup failed: {}", err))?;

        let mut summary = ReconcileSummary {
            examined: stale.len(),
            ..ReconcileSummary::default()
        };

        if stale.is_empty() {
            return Ok(summary);
        }
        log::info!("reconciler: examining {} stale processing item(s)", stale.len());

        for item in stale {
            match self.resolve(&item, as_of).await {
                Ok(Resolution::ConfirmedSent) => summary.confirmed_sent += 1,
                Ok(Resolution::Requeued) => summary.requeued += 1,
                Ok(Resolution::Failed) => summary.failed += 1,
                Ok(Resolution::Unresolved) => summary.unresolved += 1,
                Err(err) => {
                    log::warn!("reconciler: {}", err);
                    summary.unresolved += 1;
                }
            }
        }

        Ok(summary)
    }

    async fn resolve(&self, item: &QueueItem, as_of: DateTime<Utc>) -> Result<Resolution, String> {
        let account: Option<Account> = sqlx::query_as("SELECT * FROM accounts WHERE id = $1")
            .bind(item.account_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|err| format!("item {}: account lookup failed: {}", item.id, err))?;

        let Some(account) = account else {
            log::warn!("item {}: account is gone, leaving processing", item.id);
            return Ok(Resolution::Unresolved);
        };

        // Small margin behind the claim so provider-side clock skew
        // cannot hide the send we are looking for.
        let claimed_at = item.claimed_at.unwrap_or(as_of - self.config.reconcile_after());
        let since = claimed_at - Duration::minutes(5);

        let sent_history = match self.provider.sent_history(&account, item.channel, since).await {
            Ok(records) => records,
            Err(err) => {
                log::warn!(
                    "item {}: provider history unavailable, leaving processing: {}",
                    item.id,
                    err
                );
                return Ok(Resolution::Unresolved);
            }
        };

        match find_match(&sent_history, item) {
            Some(record) => self.adopt_sent(item, record).await,
            None if item.attempt_count < self.config.max_attempts => self.requeue(item, as_of).await,
            None => self.give_up(item).await,
        }
    }

    /// The send did happen: adopt the provider identifiers and confirm.
    async fn adopt_sent(&self, item: &QueueItem, record: &SentRecord) -> Result<Resolution, String> {
        let sent_at = record.sent_at.unwrap_or_else(Utc::now);
        let updated = self
            .queue
            .mark_sent(
                item,
                record.provider_message_id.as_deref(),
                record.provider_thread_id.as_deref(),
                sent_at,
            )
            .await
            .map_err(|err| format!("item {}: sent adoption failed: {}", item.id, err))?;

        let event = AuditRecord::new(item, AuditStage::ReconcileSent)
            .transition(QueueStatus::Processing, QueueStatus::Sent)
            .provider_ids(
                record.provider_message_id.as_deref(),
                record.provider_thread_id.as_deref(),
            );
        let event = if updated { event } else { event.update_failed() };
        audit::record_or_warn(&self.pool, event).await;

        log::info!(
            "item {}: send confirmed from provider history ({})",
            item.id,
            record.provider_message_id.as_deref().unwrap_or("no id")
        );
        Ok(Resolution::ConfirmedSent)
    }

    /// No trace at the provider: the send did not happen. Back in line
    /// with a backoff while attempts remain.
    async fn requeue(&self, item: &QueueItem, as_of: DateTime<Utc>) -> Result<Resolution, String> {
        let reason = "send not found in provider history after ambiguous outcome";
        let next_attempt_at = as_of + self.config.retry_backoff(item.attempt_count);
        let updated = self
            .queue
            .release_for_retry(item.id, next_attempt_at, reason)
            .await
            .map_err(|err| format!("item {}: reconcile requeue failed: {}", item.id, err))?;

        let event = AuditRecord::new(item, AuditStage::ReconcileRequeued)
            .transition(QueueStatus::Processing, QueueStatus::Pending)
            .error(reason);
        let event = if updated { event } else { event.update_failed() };
        audit::record_or_warn(&self.pool, event).await;

        log::info!(
            "item {}: no provider trace, requeued for attempt {} at {}",
            item.id,
            item.attempt_count + 1,
            next_attempt_at
        );
        Ok(Resolution::Requeued)
    }

    async fn give_up(&self, item: &QueueItem) -> Result<Resolution, String> {
        let reason = "send not found in provider history and attempts exhausted";
        let updated = self
            .queue
            .mark_failed(item.id, reason)
            .await
            .map_err(|err| format!("item {}: reconcile fail transition failed: {}", item.id, err))?;

        let event = AuditRecord::new(item, AuditStage::ReconcileFailed)
            .transition(QueueStatus::Processing, QueueStatus::Failed)
            .error(reason);
        let event = if updated { event } else { event.update_failed() };
        audit::record_or_warn(&self.pool, event).await;

        log::warn!("item {}: {}", item.id, reason);
        Ok(Resolution::Failed)
    }
}

/// Match a stranded item against provider history: recipient identity
/// first, exact body text as the fallback when the listing carries no
/// usable recipient.
fn find_match<'a>(history: &'a [SentRecord], item: &QueueItem) -> Option<&'a SentRecord> {
    history
        .iter()
        .find(|record| record.recipient_identity.as_deref() == Some(item.identity.as_str()))
        .or_else(|| {
            history
                .iter()
                .find(|record| record.text.as_deref() == Some(item.body.as_str()))
        })
}
