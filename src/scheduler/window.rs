use crate::scheduler::config::WindowConfig;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::Tz;

/// Parse an account's stored time zone name, falling back to the
/// configured default when the name is unknown.
pub fn account_time_zone(name: &str, fallback: Tz) -> Tz {
    name.parse::<Tz>().unwrap_or(fallback)
}

/// Whether `at` falls inside the send window in the given time zone.
///
/// The window is [start_hour, end_hour) in local wall-clock time,
/// optionally limited to Monday through Friday.
pub fn is_open(window: &WindowConfig, tz: Tz, at: DateTime<Utc>) -> bool {
    if window.unrestricted {
        return true;
    }

    let local = at.with_timezone(&tz);
    if window.weekdays_only && matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }

    let hour = local.hour();
    hour >= window.start_hour && hour < window.end_hour
}

/// UTC bounds [start, end) of the local calendar day containing `at`.
///
/// Capacity counting buckets sends by the account's local day, so the
/// bounds follow local midnights. On DST transition days the interval
/// is 23 or 25 hours long rather than 24.
pub fn local_day_bounds(tz: Tz, at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let local_date = at.with_timezone(&tz).date_naive();
    let next_date = local_date.succ_opt().unwrap_or(local_date);
    (local_midnight(tz, local_date), local_midnight(tz, next_date))
}

/// The local calendar date of `at` in the given time zone. Used as the
/// bucket key for daily-limit accounting.
pub fn local_day(tz: Tz, at: DateTime<Utc>) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// Earliest instant at or after `from` that falls inside the window.
///
/// Scans day by day from `from`, so a weekends-only gap resolves to the
/// following Monday's opening hour. Returns `from` unchanged when the
/// window is unrestricted or `from` is already inside it.
pub fn next_open(window: &WindowConfig, tz: Tz, from: DateTime<Utc>) -> DateTime<Utc> {
    if is_open(window, tz, from) {
        return from;
    }

    let opening = NaiveTime::from_hms_opt(window.start_hour, 0, 0).unwrap_or(NaiveTime::MIN);
    let mut date = from.with_timezone(&tz).date_naive();

    // Two weeks is more than enough to clear any weekday gap.
    for _ in 0..14 {
        let candidate = resolve_local(tz, date.and_time(opening));
        if candidate >= from && is_open(window, tz, candidate) {
            return candidate;
        }
        date = match date.succ_opt() {
            Some(next) => next,
            None => return from,
        };
    }

    from
}

/// Local midnight of `date` as a UTC instant. When midnight is skipped
/// by a DST gap the first valid instant after it is used instead.
fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    resolve_local(tz, date.and_time(NaiveTime::MIN))
}

/// Map a naive local time onto UTC. Ambiguous times (DST fall-back)
/// resolve to the earlier instant; nonexistent times (spring-forward)
/// shift forward past the gap.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    for minutes in [0i64, 30, 60, 90, 120] {
        let shifted = naive + Duration::minutes(minutes);
        if let Some(resolved) = tz.from_local_datetime(&shifted).earliest() {
            return resolved.with_timezone(&Utc);
        }
    }

    // Unreachable with real tzdata; read the naive time as UTC.
    Utc.from_utc_datetime(&naive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::New_York;
    use chrono_tz::Asia::Tokyo;

    fn business_hours() -> WindowConfig {
        WindowConfig {
            start_hour: 9,
            end_hour: 18,
            weekdays_only: true,
            unrestricted: false,
        }
    }

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().expect("valid RFC 3339 timestamp")
    }

    #[test]
    fn window_opens_at_start_hour_and_closes_at_end_hour() {
        let window = business_hours();
        // 2025-06-10 is a Tuesday; New York is UTC-4 in June.
        assert!(!is_open(&window, New_York, utc("2025-06-10T12:59:00Z"))); // 08:59 local
        assert!(is_open(&window, New_York, utc("2025-06-10T13:00:00Z"))); // 09:00 local
        assert!(is_open(&window, New_York, utc("2025-06-10T21:59:00Z"))); // 17:59 local
        assert!(!is_open(&window, New_York, utc("2025-06-10T22:00:00Z"))); // 18:00 local
    }

    #[test]
    fn window_is_closed_on_weekends() {
        let window = business_hours();
        // 2025-06-14 is a Saturday.
        assert!(!is_open(&window, New_York, utc("2025-06-14T16:00:00Z")));

        let weekend_ok = WindowConfig {
            weekdays_only: false,
            ..business_hours()
        };
        assert!(is_open(&weekend_ok, New_York, utc("2025-06-14T16:00:00Z")));
    }

    #[test]
    fn unrestricted_window_is_always_open() {
        let window = WindowConfig::unrestricted();
        assert!(is_open(&window, New_York, utc("2025-06-14T03:00:00Z")));
    }

    #[test]
    fn membership_follows_the_account_zone_not_utc() {
        let window = business_hours();
        let at = utc("2025-06-10T01:00:00Z"); // Tuesday 10:00 in Tokyo, Monday 21:00 in New York
        assert!(is_open(&window, Tokyo, at));
        assert!(!is_open(&window, New_York, at));
    }

    #[test]
    fn day_bounds_cover_a_normal_day() {
        let (start, end) = local_day_bounds(New_York, utc("2025-06-10T16:00:00Z"));
        assert_eq!(start, utc("2025-06-10T04:00:00Z"));
        assert_eq!(end, utc("2025-06-11T04:00:00Z"));
        assert_eq!(end - start, Duration::hours(24));
    }

    #[test]
    fn day_bounds_shrink_on_spring_forward() {
        // 2025-03-09: New York jumps from 02:00 EST to 03:00 EDT.
        let (start, end) = local_day_bounds(New_York, utc("2025-03-09T17:00:00Z"));
        assert_eq!(end - start, Duration::hours(23));
    }

    #[test]
    fn day_bounds_stretch_on_fall_back() {
        // 2025-11-02: New York repeats the 01:00 hour.
        let (start, end) = local_day_bounds(New_York, utc("2025-11-02T17:00:00Z"));
        assert_eq!(end - start, Duration::hours(25));
    }

    #[test]
    fn local_day_differs_from_utc_date_near_midnight() {
        // 02:00 UTC Wednesday is still Tuesday evening in New York.
        let day = local_day(New_York, utc("2025-06-11T02:00:00Z"));
        assert_eq!(day, NaiveDate::from_ymd_opt(2025, 6, 10).expect("valid date"));
    }

    #[test]
    fn next_open_returns_from_when_already_inside() {
        let window = business_hours();
        let inside = utc("2025-06-10T15:00:00Z");
        assert_eq!(next_open(&window, New_York, inside), inside);
    }

    #[test]
    fn next_open_skips_to_the_following_morning() {
        let window = business_hours();
        // Tuesday 20:00 local resolves to Wednesday 09:00 local.
        let evening = utc("2025-06-11T00:00:00Z");
        assert_eq!(
            next_open(&window, New_York, evening),
            utc("2025-06-11T13:00:00Z")
        );
    }

    #[test]
    fn next_open_clears_the_weekend() {
        let window = business_hours();
        // Friday 2025-06-13 19:00 local resolves to Monday 09:00 local.
        let friday_evening = utc("2025-06-13T23:00:00Z");
        assert_eq!(
            next_open(&window, New_York, friday_evening),
            utc("2025-06-16T13:00:00Z")
        );
    }

    #[test]
    fn unknown_zone_name_falls_back() {
        assert_eq!(account_time_zone("Mars/Olympus", chrono_tz::UTC), chrono_tz::UTC);
        assert_eq!(account_time_zone("America/New_York", chrono_tz::UTC), New_York);
    }
}
