//! Sync Layer Configuration Settings
//!
//! Configuration types for the sync layer, loaded from environment variables.

use std::time::Duration;

use reqwest::Url;

use crate::domain::subscription::DeliveryMode;

/// Backend REST settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSettings {
    /// Backend origin, e.g. `http://localhost:8000`.
    pub base_url: String,
    /// Path prefix of every route, e.g. `/api/v1`.
    pub prefix: String,
    /// Total timeout for REST calls. Streams are not subject to it.
    pub request_timeout: Duration,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            prefix: "/api/v1".to_string(),
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl ApiSettings {
    /// Base URL joined with the prefix, without a trailing slash.
    #[must_use]
    pub fn api_root(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        let prefix = self.prefix.trim_matches('/');
        if prefix.is_empty() {
            base.to_string()
        } else {
            format!("{base}/{prefix}")
        }
    }
}

/// Stream channel and store settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSettings {
    /// Flat wait between a connection failure and the next attempt.
    pub reconnect_delay: Duration,
    /// Buffer of each store's update broadcast.
    pub store_updates_capacity: usize,
    /// Delivery mode sent with subscribe calls.
    pub delivery_mode: DeliveryMode,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_millis(5000),
            store_updates_capacity: 1024,
            delivery_mode: DeliveryMode::Full,
        }
    }
}

/// Complete sync layer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncConfig {
    /// Backend REST settings.
    pub api: ApiSettings,
    /// Stream settings.
    pub stream: StreamSettings,
}

impl SyncConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend URL is empty or not an http(s) URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from any key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend URL is empty or not an http(s) URL.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_defaults = ApiSettings::default();
        let stream_defaults = StreamSettings::default();

        let base_url = lookup("FEED_SYNC_API_URL")
            .or_else(|| lookup("PUBLIC_API_URL"))
            .unwrap_or(api_defaults.base_url);
        let base_url = validate_base_url(base_url.trim())?;

        let api = ApiSettings {
            base_url,
            prefix: lookup("FEED_SYNC_API_PREFIX").unwrap_or(api_defaults.prefix),
            request_timeout: parse_env_duration_secs(
                &lookup,
                "FEED_SYNC_REQUEST_TIMEOUT_SECS",
                api_defaults.request_timeout,
            ),
        };

        let stream = StreamSettings {
            reconnect_delay: parse_env_duration_millis(
                &lookup,
                "FEED_SYNC_RECONNECT_DELAY_MS",
                stream_defaults.reconnect_delay,
            ),
            store_updates_capacity: parse_env_usize(
                &lookup,
                "FEED_SYNC_STORE_UPDATES_CAPACITY",
                stream_defaults.store_updates_capacity,
            ),
            delivery_mode: lookup("FEED_SYNC_DELIVERY_MODE")
                .map_or(stream_defaults.delivery_mode, |s| {
                    DeliveryMode::from_str_case_insensitive(&s)
                }),
        };

        Ok(Self { api, stream })
    }

    /// Log the parsed configuration.
    pub fn log(&self) {
        tracing::info!(
            api_root = %self.api.api_root(),
            request_timeout_secs = self.api.request_timeout.as_secs(),
            reconnect_delay_ms = self.stream.reconnect_delay.as_millis(),
            delivery_mode = self.stream.delivery_mode.as_str(),
            "Configuration loaded"
        );
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Backend URL did not parse or is not http(s).
    #[error("invalid backend URL {url:?}: {reason}")]
    InvalidUrl {
        /// Offending value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

fn validate_base_url(raw: &str) -> Result<String, ConfigError> {
    if raw.is_empty() {
        return Err(ConfigError::EmptyValue("FEED_SYNC_API_URL".to_string()));
    }

    let url = Url::parse(raw).map_err(|e| ConfigError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            url: raw.to_string(),
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }

    Ok(raw.trim_end_matches('/').to_string())
}

/// Load a `.env` file from the current directory or any ancestor.
pub fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

fn parse_env_usize(lookup: impl Fn(&str) -> Option<String>, key: &str, default: usize) -> usize {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(
    lookup: impl Fn(&str) -> Option<String>,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
