//! Administrative endpoints for running dispatch passes and inspecting
//! queue and capacity state.

use crate::error::ApiError;
use crate::models::{Account, AccountStatus, Channel, QueueStatus};
use crate::provider::ProviderClient;
use crate::scheduler::queue::SendQueue;
use crate::scheduler::{Dispatcher, PassSummary, SchedulerConfig, capacity, window};
use chrono::Utc;
use rocket::{State, get, post, serde::json::Json};
use rocket_db_pools::sqlx;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::Serialize;
use uuid::Uuid;

/// Queue item count for one status.
#[derive(Debug, Serialize, JsonSchema)]
pub struct QueueStatusCount {
    /// Queue status bucket.
    pub status: QueueStatus,
    /// Number of items in that bucket.
    pub count: i64,
}

/// Today's budget position for one channel on one account.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ChannelCapacityInfo {
    /// Channel the budget applies to.
    pub channel: Channel,
    /// Daily ceiling for this account and channel.
    pub limit: i32,
    /// Sends already counted against today's ceiling.
    pub used: i64,
    /// Sends still available today.
    pub remaining: i64,
}

/// Capacity snapshot for one sending account.
#[derive(Debug, Serialize, JsonSchema)]
pub struct AccountCapacityInfo {
    /// Account identifier.
    #[serde(rename = "accountId")]
    pub account_id: Uuid,
    /// Provider-side account identifier.
    #[serde(rename = "providerAccountId")]
    pub provider_account_id: String,
    /// Account health status.
    pub status: AccountStatus,
    /// IANA time zone the account's local day is computed in.
    #[serde(rename = "timeZone")]
    pub time_zone: String,
    /// Whether the account's send window is open right now.
    #[serde(rename = "windowOpen")]
    pub window_open: bool,
    /// Per-channel budget positions for the account's current local day.
    pub channels: Vec<ChannelCapacityInfo>,
}

/// Response for the dispatch status endpoint.
#[derive(Debug, Serialize, JsonSchema)]
pub struct DispatchStatusResponse {
    /// Queue composition by status.
    #[serde(rename = "queueCounts")]
    pub queue_counts: Vec<QueueStatusCount>,
    /// Capacity snapshot per account.
    pub accounts: Vec<AccountCapacityInfo>,
}

/// Run one dispatch pass right now instead of waiting for the
/// background loop, and report what it did.
#[openapi(tag = "Admin")]
#[post("/admin/dispatch/run")]
pub async fn run_dispatch(
    pool: &State<sqlx::PgPool>,
    config: &State<SchedulerConfig>,
    provider: &State<ProviderClient>,
) -> Result<Json<PassSummary>, ApiError> {
    let dispatcher = Dispatcher::new(
        pool.inner().clone(),
        provider.inner().clone(),
        config.inner().clone(),
    );
    let summary = dispatcher
        .run_pass()
        .await
        .map_err(|e| ApiError::InternalError(format!("Dispatch pass failed: {e}")))?;

    Ok(Json(summary))
}

/// Queue counts by status plus each account's daily budget position.
#[openapi(tag = "Admin")]
#[get("/admin/dispatch/status")]
pub async fn dispatch_status(
    pool: &State<sqlx::PgPool>,
    config: &State<SchedulerConfig>,
) -> Result<Json<DispatchStatusResponse>, ApiError> {
    let queue = SendQueue::new(pool.inner().clone());
    let queue_counts = queue
        .status_counts()
        .await?
        .into_iter()
        .map(|(status, count)| QueueStatusCount { status, count })
        .collect();

    let account_rows: Vec<Account> =
        sqlx::query_as("SELECT * FROM accounts ORDER BY provider_account_id")
            .fetch_all(pool.inner())
            .await?;

    let as_of = Utc::now();
    let mut conn = pool.inner().acquire().await?;
    let mut accounts = Vec::with_capacity(account_rows.len());
    for account in account_rows {
        let tz = window::account_time_zone(&account.time_zone, config.default_time_zone);
        let mut channels = Vec::with_capacity(Channel::ALL.len());
        for channel in Channel::ALL {
            let check =
                capacity::check(&mut conn, config.inner(), account.id, channel, tz, as_of)
                    .await?;
            channels.push(ChannelCapacityInfo {
                channel,
                limit: check.limit,
                used: check.used,
                remaining: check.remaining(),
            });
        }
        accounts.push(AccountCapacityInfo {
            account_id: account.id,
            provider_account_id: account.provider_account_id,
            status: account.status,
            window_open: window::is_open(&config.window, tz, as_of),
            time_zone: account.time_zone,
            channels,
        });
    }

    Ok(Json(DispatchStatusResponse {
        queue_counts,
        accounts,
    }))
}
