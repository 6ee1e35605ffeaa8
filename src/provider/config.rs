use std::env;
use std::time::Duration;

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}

fn env_duration_millis(key: &str, default_millis: u64) -> Duration {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or_else(|| Duration::from_millis(default_millis))
}

/// Configuration for the messaging provider client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub request_timeout: Duration,
    pub history_page_size: usize,
}

impl ProviderConfig {
    pub fn from_env() -> Self {
        Self {
            base_url: env_string("PROVIDER_BASE_URL", "http://localhost:3114"),
            api_key: env_string("PROVIDER_API_KEY", ""),
            request_timeout: env_duration_millis("PROVIDER_TIMEOUT_MS", 30_000),
            history_page_size: env_usize("PROVIDER_HISTORY_PAGE_SIZE", 50).max(1),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
