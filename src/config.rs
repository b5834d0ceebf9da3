//! Configuration parsed from environment variables.

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use url::Url;

use crate::error::ConfigError;

pub const DEFAULT_NOTIFICATIONS_TABLE: &str = "notifications";
pub const DEFAULT_SIGN_OUT_NOTICE: &str = "Signed out successfully";
pub const DEFAULT_API_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_API_CONNECT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_REALTIME_HEARTBEAT_SECS: u64 = 25;

// =============================================================================
// SESSION
// =============================================================================

/// Coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Site origin used to build the sign-out redirect.
    pub site_url: Url,
    /// Table watched by the change feed.
    pub notifications_table: String,
    /// Notice shown after a successful sign-out.
    pub sign_out_notice: String,
}

impl SessionConfig {
    /// Config with defaults for everything but the site origin.
    #[must_use]
    pub fn new(site_url: Url) -> Self {
        Self {
            site_url,
            notifications_table: DEFAULT_NOTIFICATIONS_TABLE.to_owned(),
            sign_out_notice: DEFAULT_SIGN_OUT_NOTICE.to_owned(),
        }
    }

    /// Build from environment variables.
    ///
    /// Required:
    /// - `SITE_URL`
    ///
    /// Optional:
    /// - `NOTIFICATIONS_TABLE`: default `notifications`
    /// - `SIGN_OUT_NOTICE`: default `Signed out successfully`
    ///
    /// # Errors
    ///
    /// Returns an error if `SITE_URL` is missing or not a URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let site_url = env_url("SITE_URL")?;
        let mut config = Self::new(site_url);
        if let Some(table) = env_non_empty("NOTIFICATIONS_TABLE") {
            config.notifications_table = table;
        }
        if let Some(notice) = env_non_empty("SIGN_OUT_NOTICE") {
            config.sign_out_notice = notice;
        }
        Ok(config)
    }
}

// =============================================================================
// API
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiTimeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for ApiTimeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_API_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_API_CONNECT_TIMEOUT_SECS }
    }
}

/// Hosted backend endpoint and credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Project base URL; `/auth/v1`, `/rest/v1` and `/realtime/v1` hang off it.
    pub api_url: Url,
    /// Public (anon) API key.
    pub api_key: String,
    /// Access token of an existing session, if any.
    pub access_token: Option<String>,
    pub timeouts: ApiTimeouts,
    pub heartbeat_secs: u64,
}

impl ApiConfig {
    /// Build from environment variables.
    ///
    /// Required:
    /// - `API_URL`
    /// - `API_KEY`
    ///
    /// Optional:
    /// - `ACCESS_TOKEN`
    /// - `API_REQUEST_TIMEOUT_SECS`: default 30
    /// - `API_CONNECT_TIMEOUT_SECS`: default 10
    /// - `REALTIME_HEARTBEAT_SECS`: default 25
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or `API_URL` is
    /// not a URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_url = env_url("API_URL")?;
        let api_key = env_non_empty("API_KEY").ok_or(ConfigError::Missing("API_KEY"))?;
        Ok(Self {
            api_url,
            api_key,
            access_token: env_non_empty("ACCESS_TOKEN"),
            timeouts: ApiTimeouts {
                request_secs: env_parse("API_REQUEST_TIMEOUT_SECS", DEFAULT_API_REQUEST_TIMEOUT_SECS),
                connect_secs: env_parse("API_CONNECT_TIMEOUT_SECS", DEFAULT_API_CONNECT_TIMEOUT_SECS),
            },
            heartbeat_secs: env_parse("REALTIME_HEARTBEAT_SECS", DEFAULT_REALTIME_HEARTBEAT_SECS),
        })
    }

    /// Join `path` onto the API base, keeping any base path prefix.
    #[must_use]
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.api_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

// =============================================================================
// HELPERS
// =============================================================================

pub(crate) fn env_parse<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

fn env_url(key: &'static str) -> Result<Url, ConfigError> {
    let raw = env_non_empty(key).ok_or(ConfigError::Missing(key))?;
    Url::parse(&raw).map_err(|e| ConfigError::InvalidUrl { var: key, reason: e.to_string() })
}
