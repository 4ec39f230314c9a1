//! Bridge configuration loading.
//!
//! Environment variables are the sole config source. Required:
//! `A_TOKEN`, `B_TOKEN`, `DATABASE_URL`, `KV_URL`. Everything else has a
//! default. A missing required variable is startup-fatal for the hosting
//! process.

use std::env;

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Platform credentials, handed to the adapters at connect time.
    pub a_token: String,
    pub b_token: String,
    pub database_url: String,
    pub kv_url: String,
    /// Max deliveries per channel within one window.
    pub rate_limit_per_channel: i64,
    pub rate_limit_window_secs: u64,
    /// TTL of loop-filter fingerprints.
    pub loop_hash_ttl_secs: u64,
    /// Minimum calls in the rolling window before a breaker may open.
    pub cb_failure_threshold: u32,
    /// How long an open breaker waits before the half-open probe.
    pub cb_reset_timeout_ms: u64,
    /// TTL of edit-workaround trackers.
    pub edit_update_ttl_secs: u64,
    /// Web front-end bases used for jump links.
    pub web_base_url_a: String,
    pub web_base_url_b: String,
    pub log_level: String,
}

impl Config {
    /// Load from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary lookup function (tests pass a map).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let required = |key: &'static str| -> Result<String, ConfigError> {
            lookup(key).ok_or(ConfigError::MissingVar(key))
        };
        let parsed = |key: &'static str, default: u64| -> Result<u64, ConfigError> {
            match lookup(key) {
                None => Ok(default),
                Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
                    var: key,
                    got: raw,
                }),
            }
        };

        Ok(Config {
            a_token: required("A_TOKEN")?,
            b_token: required("B_TOKEN")?,
            database_url: required("DATABASE_URL")?,
            kv_url: required("KV_URL")?,
            rate_limit_per_channel: parsed("RATE_LIMIT_PER_CHANNEL", 5)? as i64,
            rate_limit_window_secs: parsed("RATE_LIMIT_WINDOW_SECONDS", 2)?,
            loop_hash_ttl_secs: parsed("LOOP_HASH_TTL", 10)?,
            cb_failure_threshold: parsed("CB_FAILURE_THRESHOLD", 10)? as u32,
            cb_reset_timeout_ms: parsed("CB_RESET_TIMEOUT_MS", 60_000)?,
            edit_update_ttl_secs: parsed("EDIT_UPDATE_TTL_SECONDS", 604_800)?,
            web_base_url_a: lookup("WEB_BASE_URL_A").unwrap_or_else(|| "https://a.app".to_owned()),
            web_base_url_b: lookup("WEB_BASE_URL_B").unwrap_or_else(|| "https://b.app".to_owned()),
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
        })
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    MissingVar(&'static str),
    InvalidValue { var: &'static str, got: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVar(var) => write!(f, "missing required variable: {}", var),
            ConfigError::InvalidValue { var, got } => {
                write!(f, "invalid value for {}: {:?}", var, got)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
