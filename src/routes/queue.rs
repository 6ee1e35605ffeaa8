//! Operator endpoints for acting on individual queue items.
//!
//! Every transition here is guarded: the UPDATE is keyed on the status
//! the operator action expects, so an item the dispatcher has already
//! claimed (or that another operator beat us to) reports a 409 instead
//! of being yanked out from under the in-flight send.

use crate::error::ApiError;
use crate::models::QueueStatus;
use crate::scheduler::audit::{self, AuditRecord, AuditStage};
use crate::scheduler::queue::SendQueue;
use chrono::Utc;
use rocket::{State, post, serde::json::Json};
use rocket_db_pools::sqlx;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::Serialize;
use uuid::Uuid;

/// Response returned after a queue item transition.
#[derive(Debug, Serialize, JsonSchema)]
pub struct QueueActionResponse {
    /// Queue item identifier.
    pub id: Uuid,
    /// Status the item holds after the action.
    pub status: QueueStatus,
    /// Human-readable summary message.
    pub message: String,
}

/// Skip a pending item: it will never be dispatched, but stays on the
/// books as `skipped` for the audit trail.
#[openapi(tag = "Queue")]
#[post("/admin/queue/<id>/skip")]
pub async fn skip_item(
    id: Uuid,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<QueueActionResponse>, ApiError> {
    let queue = SendQueue::new(pool.inner().clone());
    let item = queue
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Queue item '{id}' not found")))?;

    let updated = queue.skip_pending(id, "skipped by operator").await?;
    if !updated {
        return Err(ApiError::Conflict(format!(
            "Queue item '{}' is no longer pending (currently {:?})",
            id, item.status
        )));
    }

    audit::record_or_warn(
        pool.inner(),
        AuditRecord::new(&item, AuditStage::AdminSkip)
            .transition(QueueStatus::Pending, QueueStatus::Skipped),
    )
    .await;

    Ok(Json(QueueActionResponse {
        id,
        status: QueueStatus::Skipped,
        message: format!("Queue item '{id}' skipped"),
    }))
}

/// Cancel a pending item. Cancellation is terminal but reversible via
/// requeue, which starts the attempt counter over.
#[openapi(tag = "Queue")]
#[post("/admin/queue/<id>/cancel")]
pub async fn cancel_item(
    id: Uuid,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<QueueActionResponse>, ApiError> {
    let queue = SendQueue::new(pool.inner().clone());
    let item = queue
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Queue item '{id}' not found")))?;

    let updated = queue.cancel_pending(id, "cancelled by operator").await?;
    if !updated {
        return Err(ApiError::Conflict(format!(
            "Queue item '{}' is no longer pending (currently {:?})",
            id, item.status
        )));
    }

    audit::record_or_warn(
        pool.inner(),
        AuditRecord::new(&item, AuditStage::AdminCancel)
            .transition(QueueStatus::Pending, QueueStatus::Cancelled),
    )
    .await;

    Ok(Json(QueueActionResponse {
        id,
        status: QueueStatus::Cancelled,
        message: format!("Queue item '{id}' cancelled"),
    }))
}

/// Put a failed, skipped, or cancelled item back in the pending queue
/// with its attempt counter reset, due immediately.
#[openapi(tag = "Queue")]
#[post("/admin/queue/<id>/requeue")]
pub async fn requeue_item(
    id: Uuid,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<QueueActionResponse>, ApiError> {
    let queue = SendQueue::new(pool.inner().clone());
    let item = queue
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Queue item '{id}' not found")))?;

    let updated = queue.requeue_terminal(id, Utc::now()).await?;
    if !updated {
        return Err(ApiError::Conflict(format!(
            "Queue item '{}' is not in a terminal state (currently {:?})",
            id, item.status
        )));
    }

    audit::record_or_warn(
        pool.inner(),
        AuditRecord::new(&item, AuditStage::AdminRequeue)
            .transition(item.status, QueueStatus::Pending),
    )
    .await;

    Ok(Json(QueueActionResponse {
        id,
        status: QueueStatus::Pending,
        message: format!("Queue item '{id}' requeued"),
    }))
}
