use crate::models::Channel;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::window;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rocket_db_pools::sqlx::{self, PgConnection};
use uuid::Uuid;

/// Daily-budget position for one account and channel pair.
#[derive(Debug, Clone, Copy)]
pub struct CapacityCheck {
    pub limit: i32,
    pub used: i64,
}

impl CapacityCheck {
    pub fn remaining(&self) -> i64 {
        (i64::from(self.limit) - self.used).max(0)
    }

    pub fn exhausted(&self) -> bool {
        self.remaining() == 0
    }
}

/// Effective daily ceiling for the pair: the `account_limits` row when
/// one exists, the configured channel default otherwise.
pub async fn daily_limit(
    conn: &mut PgConnection,
    config: &SchedulerConfig,
    account_id: Uuid,
    channel: Channel,
) -> Result<i32, sqlx::Error> {
    let row: Option<(i32,)> = sqlx::query_as(
        "SELECT daily_limit FROM account_limits WHERE account_id = $1 AND channel = $2",
    )
    .bind(account_id)
    .bind(channel)
    .fetch_optional(&mut *conn)
    .await?;

    Ok(row
        .map(|(limit,)| limit)
        .unwrap_or_else(|| config.default_daily_limit(channel)))
}

/// Sends already counted against the pair's budget within the local-day
/// bounds. In-flight `processing` rows count alongside completed sends,
/// so claims made at the ceiling cannot overshoot while earlier claims
/// are still in their jitter delay. The bucketing timestamp is `sent_at`
/// once a send completed, `claimed_at` while it is in flight, falling
/// back to `scheduled_at` for rows stamped by outside writers.
pub async fn used_today(
    conn: &mut PgConnection,
    account_id: Uuid,
    channel: Channel,
    bounds: (DateTime<Utc>, DateTime<Utc>),
) -> Result<i64, sqlx::Error> {
    let (start, end) = bounds;
    let (count,): (i64,) = sqlx::query_as(
        r#"SELECT COUNT(*) FROM send_queue
           WHERE account_id = $1
             AND channel = $2
             AND status IN ('processing', 'sent', 'delivered')
             AND COALESCE(sent_at, claimed_at, scheduled_at) >= $3
             AND COALESCE(sent_at, claimed_at, scheduled_at) < $4"#,
    )
    .bind(account_id)
    .bind(channel)
    .bind(start)
    .bind(end)
    .fetch_one(&mut *conn)
    .await?;

    Ok(count)
}

/// Resolve the pair's budget position for the local day containing
/// `as_of` in the account's time zone.
pub async fn check(
    conn: &mut PgConnection,
    config: &SchedulerConfig,
    account_id: Uuid,
    channel: Channel,
    tz: Tz,
    as_of: DateTime<Utc>,
) -> Result<CapacityCheck, sqlx::Error> {
    let bounds = window::local_day_bounds(tz, as_of);
    let limit = daily_limit(conn, config, account_id, channel).await?;
    let used = used_today(conn, account_id, channel, bounds).await?;
    Ok(CapacityCheck { limit, used })
}
