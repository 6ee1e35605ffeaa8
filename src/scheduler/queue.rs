use crate::models::{Account, Channel, QueueItem, QueueStatus};
use crate::scheduler::capacity;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::history;
use crate::scheduler::window;
use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use uuid::Uuid;

/// Fields supplied when a contact is admitted into a campaign. The
/// normalized identity is derived from the recipient at insert time.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub campaign_id: Uuid,
    pub account_id: Uuid,
    pub contact_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
    pub scheduled_at: DateTime<Utc>,
}

/// Result of an atomic claim attempt.
#[derive(Debug)]
pub enum ClaimOutcome {
    /// The item is now `processing` and owned by this caller. Carries
    /// the refreshed row and the account whose lock guarded the claim.
    Claimed {
        item: QueueItem,
        account: Account,
    },
    /// Another worker claimed the item first, or it already left
    /// `pending`. Not an error; the caller moves on.
    Conflict,
    /// The account's daily budget for the channel was already spoken
    /// for at re-count time. The item stays pending.
    CapacityExhausted,
    /// The item or its account no longer exists.
    NotFound,
}

/// Storage operations on the send queue. All status transitions are
/// guarded updates keyed on the status the row is expected to still
/// have, so a lost race shows up as zero rows affected instead of a
/// silent overwrite.
pub struct SendQueue {
    pool: PgPool,
}

impl SendQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert one pending item.
    pub async fn enqueue(&self, new_item: NewQueueItem) -> Result<QueueItem, sqlx::Error> {
        let identity = new_item.channel.normalize_identity(&new_item.recipient);

        sqlx::query_as(
            r#"INSERT INTO send_queue
                   (campaign_id, account_id, contact_id, channel, recipient, identity,
                    subject, body, status, scheduled_at)
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'pending', $9)
               RETURNING *"#,
        )
        .bind(new_item.campaign_id)
        .bind(new_item.account_id)
        .bind(new_item.contact_id)
        .bind(new_item.channel)
        .bind(&new_item.recipient)
        .bind(&identity)
        .bind(&new_item.subject)
        .bind(&new_item.body)
        .bind(new_item.scheduled_at)
        .fetch_one(&self.pool)
        .await
    }

    /// Fetch one item by id.
    pub async fn get(&self, id: Uuid) -> Result<Option<QueueItem>, sqlx::Error> {
        sqlx::query_as("SELECT * FROM send_queue WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Atomically claim an item for dispatch.
    ///
    /// One transaction: lock the account row (serializing capacity
    /// accounting per account), re-count the day's usage, then update
    /// `pending -> processing` keyed on current status while stamping
    /// the claim time and incrementing the attempt counter. Zero rows
    /// affected means another worker won the race. A failed capacity
    /// re-check rolls the transaction back and leaves the item pending.
    pub async fn claim(
        &self,
        config: &SchedulerConfig,
        item_id: Uuid,
        as_of: DateTime<Utc>,
    ) -> Result<ClaimOutcome, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let item: Option<QueueItem> = sqlx::query_as("SELECT * FROM send_queue WHERE id = $1")
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(item) = item else {
            return Ok(ClaimOutcome::NotFound);
        };
        if item.status != QueueStatus::Pending {
            return Ok(ClaimOutcome::Conflict);
        }

        let account: Option<Account> =
            sqlx::query_as("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
                .bind(item.account_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(account) = account else {
            return Ok(ClaimOutcome::NotFound);
        };

        let tz = window::account_time_zone(&account.time_zone, config.default_time_zone);
        let check =
            capacity::check(&mut tx, config, account.id, item.channel, tz, as_of).await?;
        if check.exhausted() {
            return Ok(ClaimOutcome::CapacityExhausted);
        }

        let result = sqlx::query(
            r#"UPDATE send_queue
               SET status = 'processing',
                   claimed_at = $2,
                   attempt_count = attempt_count + 1,
                   updated_at = NOW()
               WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(item.id)
        .bind(as_of)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(ClaimOutcome::Conflict);
        }

        tx.commit().await?;

        let item = QueueItem {
            status: QueueStatus::Processing,
            claimed_at: Some(as_of),
            attempt_count: item.attempt_count + 1,
            ..item
        };

        Ok(ClaimOutcome::Claimed { item, account })
    }

    /// Record a confirmed send: `processing -> sent` plus the outreach
    /// history row, in one transaction. Returns false when the guarded
    /// update lost (the item was no longer processing), in which case
    /// nothing is written.
    pub async fn mark_sent(
        &self,
        item: &QueueItem,
        provider_message_id: Option<&str>,
        provider_thread_id: Option<&str>,
        sent_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"UPDATE send_queue
               SET status = 'sent',
                   sent_at = $2,
                   provider_message_id = $3,
                   provider_thread_id = $4,
                   last_error = NULL,
                   updated_at = NOW()
               WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(item.id)
        .bind(sent_at)
        .bind(provider_message_id)
        .bind(provider_thread_id)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        history::record_send(&mut tx, item, sent_at).await?;
        tx.commit().await?;

        Ok(true)
    }

    /// Put a retryable failure back in line: `processing -> pending`
    /// with the next attempt time and the error recorded.
    pub async fn release_for_retry(
        &self,
        item_id: Uuid,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE send_queue
               SET status = 'pending',
                   scheduled_at = $2,
                   last_error = $3,
                   claimed_at = NULL,
                   updated_at = NOW()
               WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(item_id)
        .bind(next_attempt_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Terminal failure: `processing -> failed`.
    pub async fn mark_failed(&self, item_id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE send_queue
               SET status = 'failed', last_error = $2, updated_at = NOW()
               WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(item_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Policy skip after a claim: `processing -> skipped`.
    pub async fn mark_skipped(&self, item_id: Uuid, reason: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE send_queue
               SET status = 'skipped', last_error = $2, updated_at = NOW()
               WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(item_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Note an ambiguous provider outcome. The item stays `processing`
    /// (the reconciler owns its next transition); only the error text
    /// is recorded.
    pub async fn record_ambiguous(&self, item_id: Uuid, error: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE send_queue
               SET last_error = $2, updated_at = NOW()
               WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(item_id)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Administrative skip, only while the item is still pending.
    pub async fn skip_pending(&self, item_id: Uuid, reason: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE send_queue
               SET status = 'skipped', last_error = $2, updated_at = NOW()
               WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(item_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Administrative cancel, only while the item is still pending.
    pub async fn cancel_pending(&self, item_id: Uuid, reason: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE send_queue
               SET status = 'cancelled', last_error = $2, updated_at = NOW()
               WHERE id = $1 AND status = 'pending'"#,
        )
        .bind(item_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Cancel every pending item of a campaign, for campaign stop.
    /// Returns the cancelled rows so callers can audit each one.
    pub async fn cancel_pending_for_campaign(
        &self,
        campaign_id: Uuid,
        reason: &str,
    ) -> Result<Vec<QueueItem>, sqlx::Error> {
        sqlx::query_as(
            r#"UPDATE send_queue
               SET status = 'cancelled', last_error = $2, updated_at = NOW()
               WHERE campaign_id = $1 AND status = 'pending'
               RETURNING *"#,
        )
        .bind(campaign_id)
        .bind(reason)
        .fetch_all(&self.pool)
        .await
    }

    /// Put a terminal item back in line with a fresh attempt budget:
    /// `failed | skipped | cancelled -> pending`.
    pub async fn requeue_terminal(
        &self,
        item_id: Uuid,
        scheduled_at: DateTime<Utc>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"UPDATE send_queue
               SET status = 'pending',
                   scheduled_at = $2,
                   attempt_count = 0,
                   last_error = NULL,
                   claimed_at = NULL,
                   updated_at = NOW()
               WHERE id = $1 AND status IN ('failed', 'skipped', 'cancelled')"#,
        )
        .bind(item_id)
        .bind(scheduled_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Items stranded in `processing` with a claim older than `cutoff`,
    /// oldest first. Input to the reconciler.
    pub async fn stale_processing(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<QueueItem>, sqlx::Error> {
        sqlx::query_as(
            r#"SELECT * FROM send_queue
               WHERE status = 'processing' AND claimed_at IS NOT NULL AND claimed_at < $1
               ORDER BY claimed_at ASC"#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
    }

    /// Queue composition by status, for the dispatch status endpoint.
    pub async fn status_counts(&self) -> Result<Vec<(QueueStatus, i64)>, sqlx::Error> {
        sqlx::query_as(
            "SELECT status, COUNT(*) FROM send_queue GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await
    }
}
