//! Runtime configuration
//!
//! All tunables are read from the environment with production defaults, so a
//! bare `leasefinder serve` works out of the box and every knob can be set
//! per-deployment without a config file.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// HTTP server configuration
    pub server: ServerConfig,

    /// Search admission and load-shedding configuration
    pub search: SearchSettings,
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,

    /// Bind port
    pub port: u16,

    /// Enable permissive CORS (disable when fronted by a gateway)
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            enable_cors: true,
        }
    }
}

/// Tunables for the search admission-control engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSettings {
    /// Daily search credit per requester
    pub daily_limit: u32,

    /// Fixed size of the concurrent-search slot pool
    pub max_concurrent_searches: usize,

    /// Hard execution-time ceiling for a single store call, in milliseconds
    pub max_time_ms: u64,

    /// Active-search count above which the service reports overload
    pub overload_active_searches: usize,

    /// p95 latency (ms) above which the service reports overload
    pub overload_p95_latency_ms: u64,

    /// Maximum number of latency samples kept in the rolling window
    pub latency_window_size: usize,

    /// Age limit (minutes) for samples considered when reading the window
    pub latency_window_minutes: u64,

    /// Store timeouts tolerated for one query string before it is blocked
    pub max_failed_attempts: u32,

    /// How long (ms) a blocked query string stays blocked
    pub failed_query_reset_ms: u64,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            daily_limit: 10,
            max_concurrent_searches: 50,
            max_time_ms: 2500,
            overload_active_searches: 40,
            overload_p95_latency_ms: 2000,
            latency_window_size: 100,
            latency_window_minutes: 5,
            max_failed_attempts: 3,
            failed_query_reset_ms: 60_000,
        }
    }
}

impl SearchSettings {
    /// Store-call execution budget as a `Duration`.
    pub fn max_time(&self) -> Duration {
        Duration::from_millis(self.max_time_ms)
    }

    /// Sample-age window as a `Duration`.
    pub fn latency_window(&self) -> Duration {
        Duration::from_secs(self.latency_window_minutes * 60)
    }

    /// Failed-query reset window as a `Duration`.
    pub fn failed_query_reset(&self) -> Duration {
        Duration::from_millis(self.failed_query_reset_ms)
    }
}

impl AppConfig {
    /// Build configuration from the environment, falling back to defaults
    /// for anything unset or unparsable.
    pub fn from_env() -> Self {
        let server = ServerConfig {
            host: std::env::var("HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: env_or("PORT", 3000),
            enable_cors: env_or("ENABLE_CORS", true),
        };

        let search = SearchSettings {
            daily_limit: env_or("DAILY_SEARCH_LIMIT", 10),
            max_concurrent_searches: env_or("MAX_CONCURRENT_SEARCHES", 50),
            max_time_ms: env_or("SEARCH_MAX_TIME_MS", 2500),
            overload_active_searches: env_or("SEARCH_OVERLOAD_ACTIVE", 40),
            overload_p95_latency_ms: env_or("SEARCH_OVERLOAD_P95_LATENCY", 2000),
            latency_window_size: env_or("SEARCH_LATENCY_WINDOW_SIZE", 100),
            latency_window_minutes: env_or("SEARCH_LATENCY_WINDOW_MINUTES", 5),
            max_failed_attempts: env_or("SEARCH_MAX_FAILED_ATTEMPTS", 3),
            failed_query_reset_ms: env_or("SEARCH_FAILED_QUERY_RESET_TIME", 60_000),
        };

        Self { server, search }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            search: SearchSettings::default(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
