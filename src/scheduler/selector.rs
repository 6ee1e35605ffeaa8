use crate::models::{Account, Channel, QueueItem};
use crate::scheduler::capacity;
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::window;
use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Build the dispatch batch for one scheduling pass.
///
/// The query narrows to due pending items on active campaigns and
/// active accounts, excluding suppressed identities and identities
/// contacted within the cooldown window. Send-window membership and
/// per-account per-channel capacity depend on the account's time zone,
/// so those run here against an oversampled candidate list; the batch
/// keeps at most one item per contact identity and stops at the
/// configured ceiling. Order is oldest `scheduled_at` first, item id
/// as the tie-break.
pub async fn select_batch(
    pool: &PgPool,
    config: &SchedulerConfig,
    as_of: DateTime<Utc>,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    let cooldown_cutoff = as_of - config.cooldown();
    let scan_limit = (config.max_batch_size * 5).max(config.max_batch_size) as i64;

    let candidates: Vec<QueueItem> = sqlx::query_as(
        r#"SELECT q.* FROM send_queue q
           JOIN campaigns c ON c.id = q.campaign_id
           JOIN accounts a ON a.id = q.account_id
           WHERE q.status = 'pending'
             AND q.scheduled_at <= $1
             AND c.status = 'active'
             AND a.status = 'active'
             AND NOT EXISTS (
                 SELECT 1 FROM suppression_list s WHERE s.identity = q.identity
             )
             AND NOT EXISTS (
                 SELECT 1 FROM outreach_history h
                 WHERE h.identity = q.identity AND h.sent_at >= $2
             )
           ORDER BY q.scheduled_at ASC, q.id ASC
           LIMIT $3"#,
    )
    .bind(as_of)
    .bind(cooldown_cutoff)
    .bind(scan_limit)
    .fetch_all(pool)
    .await?;

    if candidates.is_empty() {
        return Ok(Vec::new());
    }

    let accounts = load_accounts(pool, &candidates).await?;

    let mut conn = pool.acquire().await?;
    let mut remaining: HashMap<(Uuid, Channel), i64> = HashMap::new();
    let mut seen_identities: HashSet<String> = HashSet::new();
    let mut batch = Vec::new();

    for item in candidates {
        if batch.len() >= config.max_batch_size {
            break;
        }

        let Some(account) = accounts.get(&item.account_id) else {
            continue;
        };
        let tz = window::account_time_zone(&account.time_zone, config.default_time_zone);
        if !window::is_open(&config.window, tz, as_of) {
            continue;
        }
        if seen_identities.contains(&item.identity) {
            continue;
        }

        let key = (item.account_id, item.channel);
        if !remaining.contains_key(&key) {
            let check =
                capacity::check(&mut conn, config, item.account_id, item.channel, tz, as_of)
                    .await?;
            remaining.insert(key, check.remaining());
        }
        let Some(slots) = remaining.get_mut(&key) else {
            continue;
        };
        if *slots == 0 {
            continue;
        }
        *slots -= 1;

        seen_identities.insert(item.identity.clone());
        batch.push(item);
    }

    Ok(batch)
}

async fn load_accounts(
    pool: &PgPool,
    candidates: &[QueueItem],
) -> Result<HashMap<Uuid, Account>, sqlx::Error> {
    let mut ids: Vec<Uuid> = candidates.iter().map(|item| item.account_id).collect();
    ids.sort_unstable();
    ids.dedup();

    let accounts: Vec<Account> = sqlx::query_as("SELECT * FROM accounts WHERE id = ANY($1)")
        .bind(&ids)
        .fetch_all(pool)
        .await?;

    Ok(accounts
        .into_iter()
        .map(|account| (account.id, account))
        .collect())
}
