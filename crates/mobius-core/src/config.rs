//! Client configuration.
//!
//! The base URL and default request timeout are read once from the
//! environment when the client is constructed. There is no runtime
//! reconfiguration: build a new client to change either value.

use std::time::Duration;

use thiserror::Error;

/// Default API base URL (local backend, versioned prefix)
pub const DEFAULT_API_URL: &str = "http://localhost:8000/api/v1";

/// Default request timeout in milliseconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Environment keys, checked in order
const API_URL_KEYS: &[&str] = &["MOBIUS_API_URL", "VITE_API_URL"];
const API_TIMEOUT_KEYS: &[&str] = &["MOBIUS_API_TIMEOUT_DEFAULT", "VITE_API_TIMEOUT_DEFAULT"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key} must be a positive number of milliseconds, got {value:?}")]
    InvalidTimeout { key: &'static str, value: String },

    #[error("{key} must be an http(s) URL, got {value:?}")]
    InvalidUrl { key: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub base_url: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            timeout,
        }
    }

    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |keys: &[&'static str]| {
            keys.iter().find_map(|key| {
                lookup(key)
                    .map(|v| v.trim().to_string())
                    .filter(|v| !v.is_empty())
                    .map(|v| (*key, v))
            })
        };

        let base_url = match first(API_URL_KEYS) {
            Some((key, value)) => {
                if !(value.starts_with("http://") || value.starts_with("https://")) {
                    return Err(ConfigError::InvalidUrl { key, value });
                }
                value
            }
            None => DEFAULT_API_URL.to_string(),
        };

        let timeout = match first(API_TIMEOUT_KEYS) {
            Some((key, value)) => match value.parse::<u64>() {
                Ok(ms) if ms > 0 => Duration::from_millis(ms),
                _ => return Err(ConfigError::InvalidTimeout { key, value }),
            },
            None => Duration::from_millis(DEFAULT_TIMEOUT_MS),
        };

        Ok(Self { base_url, timeout })
    }
}
