use crate::models::QueueItem;
use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgConnection};

/// Append the durable cross-campaign record of a confirmed send. Called
/// in the same transaction as the `processing -> sent` transition so the
/// cooldown source of truth can never miss a sent item.
pub async fn record_send(
    conn: &mut PgConnection,
    item: &QueueItem,
    sent_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"INSERT INTO outreach_history
               (identity, channel, account_id, campaign_id, queue_item_id, sent_at)
           VALUES ($1, $2, $3, $4, $5, $6)"#,
    )
    .bind(&item.identity)
    .bind(item.channel)
    .bind(item.account_id)
    .bind(item.campaign_id)
    .bind(item.id)
    .bind(sent_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Whether the identity was contacted on or after `cutoff`, by any
/// campaign on any account. Drives the global cooldown.
pub async fn contacted_since(
    conn: &mut PgConnection,
    identity: &str,
    cutoff: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let (hit,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM outreach_history WHERE identity = $1 AND sent_at >= $2)",
    )
    .bind(identity)
    .bind(cutoff)
    .fetch_one(&mut *conn)
    .await?;

    Ok(hit)
}

/// Whether the identity is on the do-not-contact list.
pub async fn is_suppressed(
    conn: &mut PgConnection,
    identity: &str,
) -> Result<bool, sqlx::Error> {
    let (hit,): (bool,) = sqlx::query_as(
        "SELECT EXISTS (SELECT 1 FROM suppression_list WHERE identity = $1)",
    )
    .bind(identity)
    .fetch_one(&mut *conn)
    .await?;

    Ok(hit)
}
