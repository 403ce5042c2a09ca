//! Explicit run configuration, resolved once from the environment.
use std::time::Duration;

use crate::http::RetryPolicy;
use crate::util::env::{env_opt, env_parse};

pub const DEFAULT_STEAMSPY_BASE_URL: &str = "https://steamspy.com";
pub const DEFAULT_STORE_BASE_URL: &str = "https://store.steampowered.com";
pub const DEFAULT_WEB_API_BASE_URL: &str = "https://api.steampowered.com";

/// Provider base URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub steamspy: String,
    pub store: String,
    pub web_api: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            steamspy: DEFAULT_STEAMSPY_BASE_URL.into(),
            store: DEFAULT_STORE_BASE_URL.into(),
            web_api: DEFAULT_WEB_API_BASE_URL.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub endpoints: Endpoints,
    pub http_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    /// Permits shared by the three per-game stages.
    pub concurrency: usize,
    pub trending_limit: usize,
    pub db_max_conns: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            http_timeout: Duration::from_secs(10),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            concurrency: 8,
            trending_limit: 100,
            db_max_conns: 10,
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            endpoints: Endpoints {
                steamspy: env_opt("STEAMSPY_BASE_URL").unwrap_or(d.endpoints.steamspy),
                store: env_opt("STEAM_STORE_BASE_URL").unwrap_or(d.endpoints.store),
                web_api: env_opt("STEAM_WEB_API_BASE_URL").unwrap_or(d.endpoints.web_api),
            },
            http_timeout: Duration::from_secs(env_parse("HTTP_TIMEOUT_SECS", 10u64).max(1)),
            max_retries: env_parse("HTTP_MAX_RETRIES", d.max_retries),
            backoff_base: Duration::from_millis(env_parse("HTTP_BACKOFF_BASE_MS", 500u64)),
            concurrency: env_parse("FETCH_CONCURRENCY", d.concurrency).max(1),
            trending_limit: env_parse("TRENDING_LIMIT", d.trending_limit),
            db_max_conns: env_parse("DB_MAX_CONNS", d.db_max_conns).max(1),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_base: self.backoff_base,
        }
    }

    /// Keys worth echoing in the preflight snapshot.
    pub const LOGGED_KEYS: &'static [&'static str] = &[
        "DATABASE_URL",
        "STEAMSPY_BASE_URL",
        "STEAM_STORE_BASE_URL",
        "STEAM_WEB_API_BASE_URL",
        "HTTP_TIMEOUT_SECS",
        "HTTP_MAX_RETRIES",
        "HTTP_BACKOFF_BASE_MS",
        "FETCH_CONCURRENCY",
        "TRENDING_LIMIT",
        "DB_MAX_CONNS",
    ];
}
