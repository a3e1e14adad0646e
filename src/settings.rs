use once_cell::sync::Lazy;
use std::{env, time::Duration};

pub const DEFAULT_API_BASE: &str = "https://www.youtube.com/api/lounge";

/// Client tunables. `SETTINGS` reads them once from the environment.
#[derive(Debug, Clone)]
pub struct LoungeConfig {
    /// Base URL of the lounge API, without a trailing slash.
    pub api_base: String,
    /// Total timeout for one-shot requests (pairing, bind, commands).
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_idle_timeout: Duration,
    /// Capacity of the broadcast channel behind `event_receiver`.
    pub event_buffer_capacity: usize,
}

impl Default for LoungeConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            request_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            pool_idle_timeout: Duration::from_secs(600),
            event_buffer_capacity: 100,
        }
    }
}

impl LoungeConfig {
    pub fn from_env() -> Self {
        // optionally load .env
        let _ = dotenvy::dotenv();

        // helper to parse usize
        fn parse_usize(var: &str, default: usize) -> usize {
            env::var(var)
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        }

        // helper to parse seconds into Duration
        fn parse_secs(var: &str, default: Duration) -> Duration {
            env::var(var)
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(default)
        }

        let defaults = Self::default();
        let api_base = env::var("LOUNGE_API_BASE")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or(defaults.api_base);

        LoungeConfig {
            api_base: api_base.trim_end_matches('/').to_string(),
            request_timeout: parse_secs("REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            connect_timeout: parse_secs("CONNECT_TIMEOUT_SECS", defaults.connect_timeout),
            pool_idle_timeout: parse_secs("POOL_IDLE_TIMEOUT_SECS", defaults.pool_idle_timeout),
            event_buffer_capacity: parse_usize(
                "EVENT_BUFFER_CAPACITY",
                defaults.event_buffer_capacity,
            )
            .max(1),
        }
    }

    /// Same settings against another API base (e.g. a local mock server).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub(crate) fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_base, path)
    }
}

/// Global settings instance
pub static SETTINGS: Lazy<LoungeConfig> = Lazy::new(LoungeConfig::from_env);
