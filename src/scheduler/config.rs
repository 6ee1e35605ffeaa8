use crate::models::Channel;
use chrono_tz::Tz;
use std::env;
use std::time::Duration;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_i32(key: &str, default: i32) -> i32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i32>().ok())
        .unwrap_or(default)
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<i64>().ok())
        .unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or_else(|| Duration::from_secs(default_secs))
}

/// Allowed sending window: [start_hour, end_hour) in the account's local
/// time, optionally restricted to weekdays. `unrestricted` disables the
/// window check entirely.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    pub start_hour: u32,
    pub end_hour: u32,
    pub weekdays_only: bool,
    pub unrestricted: bool,
}

impl WindowConfig {
    pub fn from_env() -> Self {
        Self {
            start_hour: env_u32("SCHEDULER_WINDOW_START_HOUR", 9).min(23),
            end_hour: env_u32("SCHEDULER_WINDOW_END_HOUR", 18).min(24),
            weekdays_only: env_bool("SCHEDULER_WINDOW_WEEKDAYS_ONLY", true),
            unrestricted: env_bool("SCHEDULER_WINDOW_UNRESTRICTED", false),
        }
    }

    /// A window that allows every hour of every day.
    pub fn unrestricted() -> Self {
        Self {
            start_hour: 0,
            end_hour: 24,
            weekdays_only: false,
            unrestricted: true,
        }
    }
}

/// Runtime knobs for scheduling passes. Read once at startup and passed
/// into the components explicitly; nothing below this level touches env.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub window: WindowConfig,
    pub max_batch_size: usize,
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub cooldown_days: i64,
    pub max_attempts: i32,
    pub retry_backoff_minutes: i64,
    pub reconcile_after_minutes: i64,
    pub pass_interval: Duration,
    pub default_time_zone: Tz,
    pub daily_limit_email: i32,
    pub daily_limit_linkedin_connect: i32,
    pub daily_limit_linkedin_dm: i32,
    pub daily_limit_linkedin_inmail: i32,
}

impl SchedulerConfig {
    pub fn from_env() -> Self {
        let jitter_min = env_duration_secs("SCHEDULER_JITTER_MIN_SECONDS", 15);
        let jitter_max = env_duration_secs("SCHEDULER_JITTER_MAX_SECONDS", 90);

        // Jitter is bounded to 1-90s; a misconfigured range collapses to
        // the nearest valid one instead of failing startup.
        let jitter_min = jitter_min.clamp(Duration::from_secs(1), Duration::from_secs(90));
        let jitter_max = jitter_max.clamp(jitter_min, Duration::from_secs(90));

        let default_time_zone = env::var("SCHEDULER_DEFAULT_TIMEZONE")
            .ok()
            .and_then(|name| name.parse::<Tz>().ok())
            .unwrap_or(chrono_tz::UTC);

        Self {
            window: WindowConfig::from_env(),
            max_batch_size: env_usize("SCHEDULER_MAX_BATCH_SIZE", 10).max(1),
            jitter_min,
            jitter_max,
            cooldown_days: env_i64("SCHEDULER_COOLDOWN_DAYS", 60).max(0),
            max_attempts: env_i32("SCHEDULER_MAX_ATTEMPTS", 3).max(1),
            retry_backoff_minutes: env_i64("SCHEDULER_RETRY_BACKOFF_MINUTES", 15).max(1),
            reconcile_after_minutes: env_i64("SCHEDULER_RECONCILE_AFTER_MINUTES", 10).max(1),
            pass_interval: env_duration_secs("SCHEDULER_PASS_INTERVAL_SECONDS", 300),
            default_time_zone,
            daily_limit_email: env_i32("SCHEDULER_DAILY_LIMIT_EMAIL", 40).max(0),
            daily_limit_linkedin_connect: env_i32("SCHEDULER_DAILY_LIMIT_LINKEDIN_CONNECT", 20)
                .max(0),
            daily_limit_linkedin_dm: env_i32("SCHEDULER_DAILY_LIMIT_LINKEDIN_DM", 40).max(0),
            daily_limit_linkedin_inmail: env_i32("SCHEDULER_DAILY_LIMIT_LINKEDIN_INMAIL", 40)
                .max(0),
        }
    }

    /// Fallback daily limit for accounts without an `account_limits` row.
    pub fn default_daily_limit(&self, channel: Channel) -> i32 {
        match channel {
            Channel::Email => self.daily_limit_email,
            Channel::LinkedinConnect => self.daily_limit_linkedin_connect,
            Channel::LinkedinDm => self.daily_limit_linkedin_dm,
            Channel::LinkedinInmail => self.daily_limit_linkedin_inmail,
        }
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::days(self.cooldown_days)
    }

    pub fn reconcile_after(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.reconcile_after_minutes)
    }

    /// Exponential backoff for retryable failures: base * 2^(attempt-1),
    /// capped at one day.
    pub fn retry_backoff(&self, attempt: i32) -> chrono::Duration {
        let exponent = attempt.saturating_sub(1).clamp(0, 16) as u32;
        let minutes = self
            .retry_backoff_minutes
            .saturating_mul(1_i64 << exponent)
            .min(24 * 60);
        chrono::Duration::minutes(minutes)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// Spacing parameters for planning `scheduled_at` slots when contacts
/// are admitted into a campaign.
#[derive(Debug, Clone)]
pub struct PlannerConfig {
    pub min_gap_minutes: i64,
    pub max_gap_minutes: i64,
}

impl PlannerConfig {
    pub fn from_env() -> Self {
        let min_gap = env_i64("PLANNER_MIN_GAP_MINUTES", 6).clamp(1, 60);
        let max_gap = env_i64("PLANNER_MAX_GAP_MINUTES", 16).clamp(min_gap, 120);
        Self {
            min_gap_minutes: min_gap,
            max_gap_minutes: max_gap,
        }
    }
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
