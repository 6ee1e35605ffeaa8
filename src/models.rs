use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, FromRow};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ===== Channel and status enums =====

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "channel", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    LinkedinConnect,
    LinkedinDm,
    LinkedinInmail,
}

impl Channel {
    /// Every channel, in display order.
    pub const ALL: [Channel; 4] = [
        Channel::Email,
        Channel::LinkedinConnect,
        Channel::LinkedinDm,
        Channel::LinkedinInmail,
    ];

    /// Normalized contact identity used for cooldown and suppression
    /// lookups: lowercased trimmed address for email, canonical profile
    /// identifier for LinkedIn channels (a bare provider id, or the last
    /// path segment when a profile URL is supplied).
    pub fn normalize_identity(&self, raw: &str) -> String {
        let trimmed = raw.trim();
        match self {
            Channel::Email => trimmed.to_ascii_lowercase(),
            _ => trimmed
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or(trimmed)
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "queue_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    Sent,
    Delivered,
    Failed,
    Bounced,
    Cancelled,
    Skipped,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "account_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Active,
    Restricted,
    Disconnected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "campaign_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Completed,
    Stopped,
}

// ===== Sending identities =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: Uuid,
    pub provider_account_id: String,
    pub display_name: String,
    pub time_zone: String,
    pub status: AccountStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct AccountLimit {
    pub account_id: Uuid,
    pub channel: Channel,
    pub daily_limit: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub name: String,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ===== Send queue =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueItem {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub account_id: Uuid,
    pub contact_id: Uuid,
    pub channel: Channel,
    pub recipient: String,
    pub identity: String,
    pub subject: Option<String>,
    pub body: String,
    pub status: QueueStatus,
    pub scheduled_at: DateTime<Utc>,
    pub attempt_count: i32,
    pub last_error: Option<String>,
    pub provider_message_id: Option<String>,
    pub provider_thread_id: Option<String>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ===== Append-only records =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[allow(dead_code)]
pub struct AuditEvent {
    pub id: i64,
    pub queue_item_id: Uuid,
    pub campaign_id: Option<Uuid>,
    pub stage: String,
    pub status_before: Option<QueueStatus>,
    pub status_after: Option<QueueStatus>,
    pub status_update_ok: bool,
    pub provider_message_id: Option<String>,
    pub provider_thread_id: Option<String>,
    pub error_message: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[allow(dead_code)]
pub struct OutreachHistoryRecord {
    pub id: i64,
    pub identity: String,
    pub channel: Channel,
    pub account_id: Option<Uuid>,
    pub campaign_id: Option<Uuid>,
    pub queue_item_id: Option<Uuid>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[allow(dead_code)]
pub struct SuppressionEntry {
    pub id: Uuid,
    pub identity: String,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}
