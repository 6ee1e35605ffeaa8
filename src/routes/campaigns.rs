//! Campaign lifecycle endpoints and contact admission.
//!
//! Lifecycle transitions are guarded the same way queue item
//! transitions are: the UPDATE is keyed on the expected prior status
//! and a lost race reports 409. Stopping a campaign also cancels its
//! pending queue items; in-flight sends finish on their own.

use crate::error::ApiError;
use crate::models::{Account, Campaign, CampaignStatus, Channel, QueueStatus};
use crate::scheduler::audit::{self, AuditRecord, AuditStage};
use crate::scheduler::planner::{self, ContactDraft};
use crate::scheduler::queue::SendQueue;
use crate::scheduler::{PlannerConfig, SchedulerConfig};
use chrono::{DateTime, Utc};
use rocket::{State, post, serde::json::Json};
use rocket_db_pools::sqlx;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// LinkedIn caps connection invitation notes at 300 characters.
const MAX_INVITE_NOTE_CHARS: usize = 300;

/// Response returned after a campaign lifecycle transition.
#[derive(Debug, Serialize, JsonSchema)]
pub struct CampaignActionResponse {
    /// Campaign identifier.
    pub id: Uuid,
    /// Status the campaign holds after the action.
    pub status: CampaignStatus,
    /// Human-readable summary message.
    pub message: String,
}

/// One contact to admit into a campaign.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScheduleContact {
    /// Upstream contact identifier; generated when absent.
    #[serde(rename = "contactId", default)]
    pub contact_id: Option<Uuid>,
    /// Channel-native recipient address (email address, or LinkedIn
    /// provider id / profile URL).
    pub recipient: String,
    /// Subject line, used by email and InMail sends.
    #[serde(default)]
    pub subject: Option<String>,
    /// Message text.
    pub body: String,
}

/// Request body for admitting contacts into a campaign.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScheduleRequest {
    /// Sending account the new items will go out from.
    #[serde(rename = "accountId")]
    pub account_id: Uuid,
    /// Channel the contacts will be messaged on.
    pub channel: Channel,
    /// Contacts to admit, in the order slots are assigned.
    pub contacts: Vec<ScheduleContact>,
    /// Earliest allowed slot; defaults to now.
    #[serde(rename = "startAt", default)]
    pub start_at: Option<DateTime<Utc>>,
}

/// Response returned after contacts are admitted.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ScheduleResponse {
    /// Campaign the contacts were admitted into.
    #[serde(rename = "campaignId")]
    pub campaign_id: Uuid,
    /// Number of queue items created.
    pub scheduled: usize,
    /// Earliest assigned slot.
    #[serde(rename = "firstSlot")]
    pub first_slot: Option<DateTime<Utc>>,
    /// Latest assigned slot.
    #[serde(rename = "lastSlot")]
    pub last_slot: Option<DateTime<Utc>>,
}

async fn campaign_by_id(
    pool: &sqlx::PgPool,
    id: Uuid,
) -> Result<Option<Campaign>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM campaigns WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Pause an active campaign. Pending items stay queued but stop being
/// selected until the campaign resumes.
#[openapi(tag = "Campaigns")]
#[post("/admin/campaigns/<id>/pause")]
pub async fn pause_campaign(
    id: Uuid,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<CampaignActionResponse>, ApiError> {
    let result = sqlx::query(
        "UPDATE campaigns SET status = 'paused', updated_at = NOW()
         WHERE id = $1 AND status = 'active'",
    )
    .bind(id)
    .execute(pool.inner())
    .await?;

    if result.rows_affected() == 0 {
        return match campaign_by_id(pool.inner(), id).await? {
            None => Err(ApiError::NotFound(format!("Campaign '{id}' not found"))),
            Some(campaign) => Err(ApiError::Conflict(format!(
                "Campaign '{}' is not active (currently {:?})",
                id, campaign.status
            ))),
        };
    }

    Ok(Json(CampaignActionResponse {
        id,
        status: CampaignStatus::Paused,
        message: format!("Campaign '{id}' paused"),
    }))
}

/// Resume a paused campaign.
#[openapi(tag = "Campaigns")]
#[post("/admin/campaigns/<id>/resume")]
pub async fn resume_campaign(
    id: Uuid,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<CampaignActionResponse>, ApiError> {
    let result = sqlx::query(
        "UPDATE campaigns SET status = 'active', updated_at = NOW()
         WHERE id = $1 AND status = 'paused'",
    )
    .bind(id)
    .execute(pool.inner())
    .await?;

    if result.rows_affected() == 0 {
        return match campaign_by_id(pool.inner(), id).await? {
            None => Err(ApiError::NotFound(format!("Campaign '{id}' not found"))),
            Some(campaign) => Err(ApiError::Conflict(format!(
                "Campaign '{}' is not paused (currently {:?})",
                id, campaign.status
            ))),
        };
    }

    Ok(Json(CampaignActionResponse {
        id,
        status: CampaignStatus::Active,
        message: format!("Campaign '{id}' resumed"),
    }))
}

/// Stop a campaign for good and cancel everything it still has pending.
#[openapi(tag = "Campaigns")]
#[post("/admin/campaigns/<id>/stop")]
pub async fn stop_campaign(
    id: Uuid,
    pool: &State<sqlx::PgPool>,
) -> Result<Json<CampaignActionResponse>, ApiError> {
    let result = sqlx::query(
        "UPDATE campaigns SET status = 'stopped', updated_at = NOW()
         WHERE id = $1 AND status IN ('active', 'paused')",
    )
    .bind(id)
    .execute(pool.inner())
    .await?;

    if result.rows_affected() == 0 {
        return match campaign_by_id(pool.inner(), id).await? {
            None => Err(ApiError::NotFound(format!("Campaign '{id}' not found"))),
            Some(campaign) => Err(ApiError::Conflict(format!(
                "Campaign '{}' cannot be stopped (currently {:?})",
                id, campaign.status
            ))),
        };
    }

    let queue = SendQueue::new(pool.inner().clone());
    let cancelled = queue
        .cancel_pending_for_campaign(id, "campaign stopped")
        .await?;
    for item in &cancelled {
        audit::record_or_warn(
            pool.inner(),
            AuditRecord::new(item, AuditStage::AdminCancel)
                .transition(QueueStatus::Pending, QueueStatus::Cancelled),
        )
        .await;
    }

    Ok(Json(CampaignActionResponse {
        id,
        status: CampaignStatus::Stopped,
        message: format!(
            "Campaign '{}' stopped, {} pending item(s) cancelled",
            id,
            cancelled.len()
        ),
    }))
}

/// Admit contacts into a campaign: plan spaced send slots on the given
/// account and channel and insert one pending queue item per contact.
#[openapi(tag = "Campaigns")]
#[post("/admin/campaigns/<id>/schedule", data = "<request>")]
pub async fn schedule_contacts(
    id: Uuid,
    request: Json<ScheduleRequest>,
    pool: &State<sqlx::PgPool>,
    config: &State<SchedulerConfig>,
    planner_config: &State<PlannerConfig>,
) -> Result<Json<ScheduleResponse>, ApiError> {
    let request = request.into_inner();

    let campaign = campaign_by_id(pool.inner(), id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Campaign '{id}' not found")))?;
    if matches!(
        campaign.status,
        CampaignStatus::Stopped | CampaignStatus::Completed
    ) {
        return Err(ApiError::Conflict(format!(
            "Campaign '{}' is finished (currently {:?})",
            id, campaign.status
        )));
    }

    if request.contacts.is_empty() {
        return Err(ApiError::BadRequest("No contacts specified".to_string()));
    }
    for contact in &request.contacts {
        if contact.recipient.trim().is_empty() {
            return Err(ApiError::BadRequest(
                "Contact recipient must not be empty".to_string(),
            ));
        }
        if request.channel == Channel::LinkedinConnect
            && contact.body.chars().count() > MAX_INVITE_NOTE_CHARS
        {
            return Err(ApiError::BadRequest(format!(
                "Invitation note for '{}' exceeds {} characters",
                contact.recipient, MAX_INVITE_NOTE_CHARS
            )));
        }
    }

    let account: Account = sqlx::query_as("SELECT * FROM accounts WHERE id = $1")
        .bind(request.account_id)
        .fetch_optional(pool.inner())
        .await?
        .ok_or_else(|| {
            ApiError::BadRequest(format!("Account '{}' not found", request.account_id))
        })?;

    let drafts: Vec<ContactDraft> = request
        .contacts
        .into_iter()
        .map(|contact| ContactDraft {
            contact_id: contact.contact_id.unwrap_or_else(Uuid::new_v4),
            recipient: contact.recipient,
            subject: contact.subject,
            body: contact.body,
        })
        .collect();

    let queue = SendQueue::new(pool.inner().clone());
    let not_before = request.start_at.unwrap_or_else(Utc::now);
    let items = planner::schedule_contacts(
        pool.inner(),
        &queue,
        planner_config.inner(),
        config.inner(),
        id,
        &account,
        request.channel,
        drafts,
        not_before,
    )
    .await?;

    log::info!(
        "campaign {}: scheduled {} item(s) on account {}",
        id,
        items.len(),
        account.provider_account_id
    );

    Ok(Json(ScheduleResponse {
        campaign_id: id,
        scheduled: items.len(),
        first_slot: items.first().map(|item| item.scheduled_at),
        last_slot: items.last().map(|item| item.scheduled_at),
    }))
}
