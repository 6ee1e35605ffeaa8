use crate::models::{Account, Channel, QueueItem};
use crate::scheduler::config::{PlannerConfig, SchedulerConfig, WindowConfig};
use crate::scheduler::queue::{NewQueueItem, SendQueue};
use crate::scheduler::window;
use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use rand::Rng;
use rocket_db_pools::sqlx::{self, PgPool};
use uuid::Uuid;

/// One contact to admit into a campaign.
#[derive(Debug, Clone)]
pub struct ContactDraft {
    pub contact_id: Uuid,
    pub recipient: String,
    pub subject: Option<String>,
    pub body: String,
}

/// Plan `count` send slots after `start_at`, each a randomized gap past
/// the previous one and shifted forward to the next open window when
/// the gap lands outside it. Slots are strictly increasing.
pub fn plan_slots_with<R: Rng>(
    rng: &mut R,
    planner: &PlannerConfig,
    window_config: &WindowConfig,
    tz: Tz,
    start_at: DateTime<Utc>,
    count: usize,
) -> Vec<DateTime<Utc>> {
    let mut slots = Vec::with_capacity(count);
    let mut cursor = start_at;

    for _ in 0..count {
        let gap = rng.gen_range(planner.min_gap_minutes..=planner.max_gap_minutes);
        cursor = window::next_open(window_config, tz, cursor + Duration::minutes(gap));
        slots.push(cursor);
    }

    slots
}

/// Where new slots for this account and channel should start: after the
/// last pending slot already on the books, never before `not_before`.
pub async fn next_cursor(
    pool: &PgPool,
    account_id: Uuid,
    channel: Channel,
    not_before: DateTime<Utc>,
) -> Result<DateTime<Utc>, sqlx::Error> {
    let (last_slot,): (Option<DateTime<Utc>>,) = sqlx::query_as(
        r#"SELECT MAX(scheduled_at) FROM send_queue
           WHERE account_id = $1 AND channel = $2 AND status = 'pending'"#,
    )
    .bind(account_id)
    .bind(channel)
    .fetch_one(pool)
    .await?;

    Ok(match last_slot {
        Some(last) => last.max(not_before),
        None => not_before,
    })
}

/// Admit contacts into a campaign: continue from the account's current
/// slot cursor, plan spaced times, and insert one pending item each.
/// Policy filters (suppression, cooldown, capacity) act later, at
/// selection and dispatch time.
pub async fn schedule_contacts(
    pool: &PgPool,
    queue: &SendQueue,
    planner: &PlannerConfig,
    config: &SchedulerConfig,
    campaign_id: Uuid,
    account: &Account,
    channel: Channel,
    contacts: Vec<ContactDraft>,
    not_before: DateTime<Utc>,
) -> Result<Vec<QueueItem>, sqlx::Error> {
    let tz = window::account_time_zone(&account.time_zone, config.default_time_zone);
    let cursor = next_cursor(pool, account.id, channel, not_before).await?;

    let slots = plan_slots_with(
        &mut rand::thread_rng(),
        planner,
        &config.window,
        tz,
        cursor,
        contacts.len(),
    );

    let mut items = Vec::with_capacity(contacts.len());
    for (contact, scheduled_at) in contacts.into_iter().zip(slots) {
        let item = queue
            .enqueue(NewQueueItem {
                campaign_id,
                account_id: account.id,
                contact_id: contact.contact_id,
                channel,
                recipient: contact.recipient,
                subject: contact.subject,
                body: contact.body,
                scheduled_at,
            })
            .await?;
        items.push(item);
    }

    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn planner() -> PlannerConfig {
        PlannerConfig {
            min_gap_minutes: 6,
            max_gap_minutes: 16,
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid RFC 3339 timestamp")
    }

    #[test]
    fn slots_are_increasing_and_gapped_within_bounds() {
        let mut rng = StdRng::seed_from_u64(7);
        let start = utc("2025-06-10T14:00:00Z");
        let slots = plan_slots_with(
            &mut rng,
            &planner(),
            &WindowConfig::unrestricted(),
            chrono_tz::UTC,
            start,
            12,
        );

        assert_eq!(slots.len(), 12);
        let mut prev = start;
        for slot in slots {
            let gap = slot - prev;
            assert!(gap >= Duration::minutes(6), "gap below minimum: {gap}");
            assert!(gap <= Duration::minutes(16), "gap above maximum: {gap}");
            prev = slot;
        }
    }

    #[test]
    fn slots_spill_past_a_closed_window() {
        let window = WindowConfig {
            start_hour: 9,
            end_hour: 18,
            weekdays_only: true,
            unrestricted: false,
        };
        let mut rng = StdRng::seed_from_u64(3);
        // Friday 2025-06-13 17:50 New York local; the second slot cannot
        // fit before 18:00, so it lands Monday morning.
        let start = utc("2025-06-13T21:50:00Z");
        let slots = plan_slots_with(&mut rng, &planner(), &window, chrono_tz::America::New_York, start, 4);

        for slot in &slots {
            assert!(
                window::is_open(&window, chrono_tz::America::New_York, *slot),
                "slot {slot} fell outside the window"
            );
        }
        // Monday 2025-06-16 09:00 local is 13:00 UTC.
        assert!(slots[1] >= utc("2025-06-16T13:00:00Z"));
    }
}
