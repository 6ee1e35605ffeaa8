use crate::models::{AuditEvent, QueueItem, QueueStatus};
use rocket_db_pools::sqlx::{self, PgConnection, PgPool};
use uuid::Uuid;

/// Where in the dispatch lifecycle an audit event was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStage {
    AboutToSend,
    Sent,
    SendFailed,
    Deferred,
    Ambiguous,
    PolicySkip,
    AdminSkip,
    AdminCancel,
    AdminRequeue,
    ReconcileSent,
    ReconcileRequeued,
    ReconcileFailed,
}

impl AuditStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStage::AboutToSend => "about_to_send",
            AuditStage::Sent => "sent",
            AuditStage::SendFailed => "send_failed",
            AuditStage::Deferred => "deferred",
            AuditStage::Ambiguous => "ambiguous",
            AuditStage::PolicySkip => "policy_skip",
            AuditStage::AdminSkip => "admin_skip",
            AuditStage::AdminCancel => "admin_cancel",
            AuditStage::AdminRequeue => "admin_requeue",
            AuditStage::ReconcileSent => "reconcile_sent",
            AuditStage::ReconcileRequeued => "reconcile_requeued",
            AuditStage::ReconcileFailed => "reconcile_failed",
        }
    }
}

/// One audit row about to be written. `status_update_ok` stays true
/// unless the guarded transition the event describes did not stick.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub queue_item_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub stage: AuditStage,
    pub status_before: Option<QueueStatus>,
    pub status_after: Option<QueueStatus>,
    pub status_update_ok: bool,
    pub provider_message_id: Option<String>,
    pub provider_thread_id: Option<String>,
    pub error_message: Option<String>,
}

impl AuditRecord {
    pub fn new(item: &QueueItem, stage: AuditStage) -> Self {
        Self {
            queue_item_id: item.id,
            campaign_id: Some(item.campaign_id),
            stage,
            status_before: None,
            status_after: None,
            status_update_ok: true,
            provider_message_id: None,
            provider_thread_id: None,
            error_message: None,
        }
    }

    pub fn transition(mut self, before: QueueStatus, after: QueueStatus) -> Self {
        self.status_before = Some(before);
        self.status_after = Some(after);
        self
    }

    pub fn provider_ids(
        mut self,
        message_id: Option<&str>,
        thread_id: Option<&str>,
    ) -> Self {
        self.provider_message_id = message_id.map(str::to_string);
        self.provider_thread_id = thread_id.map(str::to_string);
        self
    }

    pub fn error(mut self, message: &str) -> Self {
        self.error_message = Some(message.to_string());
        self
    }

    pub fn update_failed(mut self) -> Self {
        self.status_update_ok = false;
        self
    }
}

/// Append one audit event. Rows are insert-only; nothing ever updates
/// or deletes them.
pub async fn record(conn: &mut PgConnection, record: AuditRecord) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO send_audit
               (queue_item_id, campaign_id, stage, status_before, status_after,
                status_update_ok, provider_message_id, provider_thread_id, error_message)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
    )
    .bind(record.queue_item_id)
    .bind(record.campaign_id)
    .bind(record.stage.as_str())
    .bind(record.status_before)
    .bind(record.status_after)
    .bind(record.status_update_ok)
    .bind(record.provider_message_id)
    .bind(record.provider_thread_id)
    .bind(record.error_message)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Append an event, logging instead of propagating on failure. An
/// audit write must never abort the operation it describes.
pub async fn record_or_warn(pool: &PgPool, event: AuditRecord) {
    match pool.acquire().await {
        Ok(mut conn) => {
            if let Err(err) = record(&mut conn, event).await {
                log::warn!("audit write failed: {}", err);
            }
        }
        Err(err) => log::warn!("audit write failed: {}", err),
    }
}

/// Audit trail for one queue item, oldest event first.
pub async fn for_item(
    conn: &mut PgConnection,
    queue_item_id: Uuid,
) -> Result<Vec<AuditEvent>, sqlx::Error> {
    sqlx::query_as(
        r#"SELECT id, queue_item_id, campaign_id, stage, status_before, status_after,
                  status_update_ok, provider_message_id, provider_thread_id,
                  error_message, recorded_at
           FROM send_audit
           WHERE queue_item_id = $1
           ORDER BY id ASC"#,
    )
    .bind(queue_item_id)
    .fetch_all(&mut *conn)
    .await
}
