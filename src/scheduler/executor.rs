use crate::models::{Account, AccountStatus, QueueItem, QueueStatus};
use crate::provider::{ErrorClass, ProviderClient, ProviderError};
use crate::scheduler::audit::{self, AuditRecord, AuditStage};
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::history;
use crate::scheduler::queue::{ClaimOutcome, SendQueue};
use chrono::{DateTime, Utc};
use rand::Rng;
use rocket_db_pools::sqlx::{self, PgPool};
use std::time::Duration;
use uuid::Uuid;

/// What happened to one item during a dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Provider accepted the message.
    Sent,
    /// Retryable failure; the item went back to pending with a backoff.
    Deferred,
    /// Terminal failure.
    Failed,
    /// Terminal failure that also downgraded the account's health. No
    /// further sends should go to this account within the pass.
    AccountHalted,
    /// Policy re-check hit (suppression or cooldown); terminally skipped.
    Skipped,
    /// Timeout or undecodable response; the item stays `processing`
    /// until the reconciler resolves it.
    Ambiguous,
    /// Claim lost. Another worker owns the item; no side effects here.
    Conflict,
    /// The account's daily budget was spoken for at the claim re-count;
    /// the item stays pending for a later day.
    CapacityExhausted,
}

/// Drives a single queue item through claim, policy re-check, jitter
/// delay, the provider call and the outcome transition. Exactly one
/// provider call per attempt; every attempt leaves an audit trail.
pub struct Executor {
    pool: PgPool,
    queue: SendQueue,
    provider: ProviderClient,
    config: SchedulerConfig,
}

impl Executor {
    pub fn new(pool: PgPool, provider: ProviderClient, config: SchedulerConfig) -> Self {
        let queue = SendQueue::new(pool.clone());
        Self {
            pool,
            queue,
            provider,
            config,
        }
    }

    /// Dispatch one item. `as_of` is the claim instant used for the
    /// capacity re-count; the send timestamp is taken after the
    /// provider call returns.
    pub async fn dispatch(
        &self,
        item_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<DispatchOutcome, String> {
        let (item, account) = match self.queue.claim(&self.config, item_id, as_of).await {
            Ok(ClaimOutcome::Claimed { item, account }) => (item, account),
            Ok(ClaimOutcome::Conflict) => {
                log::debug!("item {}: claim lost, already handled elsewhere", item_id);
                return Ok(DispatchOutcome::Conflict);
            }
            Ok(ClaimOutcome::CapacityExhausted) => {
                log::debug!("item {}: daily capacity exhausted, staying pending", item_id);
                return Ok(DispatchOutcome::CapacityExhausted);
            }
            Ok(ClaimOutcome::NotFound) => {
                log::debug!("item {}: vanished before claim", item_id);
                return Ok(DispatchOutcome::Conflict);
            }
            Err(err) => return Err(format!("item {}: claim failed: {}", item_id, err)),
        };

        // Another campaign may have reached this identity between
        // selection and now; re-validate before spending the send.
        if let Some(reason) = self
            .policy_block(&item, as_of)
            .await
            .map_err(|err| format!("item {}: policy re-check failed: {}", item.id, err))?
        {
            let updated = self
                .queue
                .mark_skipped(item.id, reason)
                .await
                .map_err(|err| format!("item {}: skip transition failed: {}", item.id, err))?;

            let record = AuditRecord::new(&item, AuditStage::PolicySkip)
                .transition(QueueStatus::Processing, QueueStatus::Skipped)
                .error(reason);
            self.record_audit(flag_update(record, updated)).await;

            log::info!("item {}: skipped, {}", item.id, reason);
            return Ok(DispatchOutcome::Skipped);
        }

        self.record_audit(
            AuditRecord::new(&item, AuditStage::AboutToSend)
                .transition(QueueStatus::Pending, QueueStatus::Processing),
        )
        .await;

        let jitter = self.jitter();
        log::debug!("item {}: holding {:?} before send", item.id, jitter);
        tokio::time::sleep(jitter).await;

        match self.provider.send(&account, &item).await {
            Ok(receipt) => {
                let sent_at = Utc::now();
                let updated = self
                    .queue
                    .mark_sent(&item, receipt.message_id(), receipt.thread_id(), sent_at)
                    .await
                    .map_err(|err| format!("item {}: sent transition failed: {}", item.id, err))?;

                if !updated {
                    log::warn!(
                        "item {}: message went out but the status update lost a race",
                        item.id
                    );
                }

                let record = AuditRecord::new(&item, AuditStage::Sent)
                    .transition(QueueStatus::Processing, QueueStatus::Sent)
                    .provider_ids(receipt.message_id(), receipt.thread_id());
                self.record_audit(flag_update(record, updated)).await;

                log::info!(
                    "item {}: sent, provider message {}",
                    item.id,
                    receipt.message_id().unwrap_or("unknown")
                );
                Ok(DispatchOutcome::Sent)
            }
            Err(err) => self.handle_send_error(&item, &account, err).await,
        }
    }

    /// Suppression and cooldown re-check after the claim. Returns the
    /// skip reason when the item must not be sent.
    async fn policy_block(
        &self,
        item: &QueueItem,
        as_of: DateTime<Utc>,
    ) -> Result<Option<&'static str>, sqlx::Error> {
        let mut conn = self.pool.acquire().await?;

        if history::is_suppressed(&mut conn, &item.identity).await? {
            return Ok(Some("identity is on the suppression list"));
        }

        let cutoff = as_of - self.config.cooldown();
        if history::contacted_since(&mut conn, &item.identity, cutoff).await? {
            return Ok(Some("identity contacted within the cooldown window"));
        }

        Ok(None)
    }

    async fn handle_send_error(
        &self,
        item: &QueueItem,
        account: &Account,
        err: ProviderError,
    ) -> Result<DispatchOutcome, String> {
        let class = err.class();
        let message = err.to_string();

        match class {
            ErrorClass::Transient if item.attempt_count < self.config.max_attempts => {
                let next_attempt_at = Utc::now() + self.config.retry_backoff(item.attempt_count);
                let updated = self
                    .queue
                    .release_for_retry(item.id, next_attempt_at, &message)
                    .await
                    .map_err(|err| format!("item {}: retry release failed: {}", item.id, err))?;

                let record = AuditRecord::new(item, AuditStage::Deferred)
                    .transition(QueueStatus::Processing, QueueStatus::Pending)
                    .error(&message);
                self.record_audit(flag_update(record, updated)).await;

                log::warn!(
                    "item {}: transient provider failure on attempt {}, retry at {}: {}",
                    item.id,
                    item.attempt_count,
                    next_attempt_at,
                    message
                );
                Ok(DispatchOutcome::Deferred)
            }
            ErrorClass::Transient | ErrorClass::Permanent => {
                let updated = self.fail_item(item, &message).await?;

                let record = AuditRecord::new(item, AuditStage::SendFailed)
                    .transition(QueueStatus::Processing, QueueStatus::Failed)
                    .error(&message);
                self.record_audit(flag_update(record, updated)).await;

                log::error!(
                    "item {}: failed after {} attempts: {}",
                    item.id,
                    item.attempt_count,
                    message
                );
                Ok(DispatchOutcome::Failed)
            }
            ErrorClass::AuthRevoked | ErrorClass::AccountRestricted => {
                let downgraded = match class {
                    ErrorClass::AuthRevoked => AccountStatus::Disconnected,
                    _ => AccountStatus::Restricted,
                };
                let updated = self.fail_item(item, &message).await?;
                self.downgrade_account(account, downgraded).await?;

                let record = AuditRecord::new(item, AuditStage::SendFailed)
                    .transition(QueueStatus::Processing, QueueStatus::Failed)
                    .error(&message);
                self.record_audit(flag_update(record, updated)).await;

                log::error!(
                    "item {}: provider rejected the account ({}), halting sends on it",
                    item.id,
                    message
                );
                Ok(DispatchOutcome::AccountHalted)
            }
            ErrorClass::Ambiguous => {
                // The send may have happened. Park the item; only the
                // reconciler decides between sent and retry.
                self.queue
                    .record_ambiguous(item.id, &message)
                    .await
                    .map_err(|err| format!("item {}: ambiguous note failed: {}", item.id, err))?;

                let record = AuditRecord::new(item, AuditStage::Ambiguous)
                    .transition(QueueStatus::Processing, QueueStatus::Processing)
                    .error(&message);
                self.record_audit(record).await;

                log::warn!(
                    "item {}: ambiguous provider outcome, parked for reconciliation: {}",
                    item.id,
                    message
                );
                Ok(DispatchOutcome::Ambiguous)
            }
        }
    }

    async fn fail_item(&self, item: &QueueItem, message: &str) -> Result<bool, String> {
        self.queue
            .mark_failed(item.id, message)
            .await
            .map_err(|err| format!("item {}: failed transition failed: {}", item.id, err))
    }

    async fn downgrade_account(
        &self,
        account: &Account,
        status: AccountStatus,
    ) -> Result<(), String> {
        sqlx::query("UPDATE accounts SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(account.id)
            .bind(status)
            .execute(&self.pool)
            .await
            .map_err(|err| format!("account {}: health downgrade failed: {}", account.id, err))?;

        log::warn!(
            "account {} ({}): health downgraded to {:?}",
            account.id,
            account.display_name,
            status
        );
        Ok(())
    }

    fn jitter(&self) -> Duration {
        let min = self.config.jitter_min;
        let max = self.config.jitter_max.max(min);
        if max == min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }

    async fn record_audit(&self, record: AuditRecord) {
        audit::record_or_warn(&self.pool, record).await;
    }
}

fn flag_update(record: AuditRecord, updated: bool) -> AuditRecord {
    if updated { record } else { record.update_failed() }
}
