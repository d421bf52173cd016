//! Media session configuration.
//!
//! Configuration is loaded from environment variables. The API token is
//! redacted in Debug output.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use common::config::ObservabilityConfig;
use common::join_token::JoinTokenConfig;
use common::meeting_api::MeetingApiClient;
use common::secret::SecretString;
use thiserror::Error;

/// Default number of join token requests per connect.
pub const DEFAULT_TOKEN_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first token retry in milliseconds.
pub const DEFAULT_TOKEN_INITIAL_BACKOFF_MS: u64 = 500;

/// Default upper bound of the token retry delay in milliseconds.
pub const DEFAULT_TOKEN_MAX_BACKOFF_MS: u64 = 4000;

/// Default HTTP timeout for REST collaborators in milliseconds.
pub const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;

/// Default connection stabilization timeout in milliseconds.
pub const DEFAULT_STABILIZATION_TIMEOUT_MS: u64 = 15_000;

/// Default stabilization poll interval in milliseconds.
pub const DEFAULT_STABILIZATION_POLL_MS: u64 = 100;

/// Default delay before the single reconnect attempt in milliseconds.
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 3000;

/// Default mute reconcile interval in milliseconds.
pub const DEFAULT_MUTE_RECONCILE_INTERVAL_MS: u64 = 500;

/// Default device health check interval in milliseconds.
pub const DEFAULT_DEVICE_HEALTH_INTERVAL_MS: u64 = 5000;

/// Default device-change debounce in milliseconds.
pub const DEFAULT_DEVICE_CHANGE_DEBOUNCE_MS: u64 = 500;

/// Default screen-share permission timeout in seconds.
pub const DEFAULT_PERMISSION_TIMEOUT_SECONDS: u64 = 30;

/// Default late-joiner discovery throttle in milliseconds.
pub const DEFAULT_SHARE_DISCOVERY_THROTTLE_MS: u64 = 2000;

/// Default delay between screen video and audio publish in milliseconds.
pub const DEFAULT_SHARE_PUBLISH_SETTLE_MS: u64 = 250;

/// Default roster full-sync interval in milliseconds.
pub const DEFAULT_ROSTER_SYNC_INTERVAL_MS: u64 = 3000;

/// Default heartbeat interval in seconds.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 30;

/// Default signaling outbox capacity.
pub const DEFAULT_SIGNALING_QUEUE_CAPACITY: usize = 256;

/// Timing and sizing knobs used by the running components.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimings {
    pub stabilization_timeout: Duration,
    pub stabilization_poll: Duration,
    pub reconnect_delay: Duration,
    pub mute_reconcile_interval: Duration,
    pub device_health_interval: Duration,
    pub device_change_debounce: Duration,
    pub permission_timeout: Duration,
    pub share_discovery_throttle: Duration,
    pub share_publish_settle: Duration,
    pub roster_sync_interval: Duration,
    pub heartbeat_interval: Duration,
    pub signaling_queue_capacity: usize,
}

impl Default for SessionTimings {
    fn default() -> Self {
        Self {
            stabilization_timeout: Duration::from_millis(DEFAULT_STABILIZATION_TIMEOUT_MS),
            stabilization_poll: Duration::from_millis(DEFAULT_STABILIZATION_POLL_MS),
            reconnect_delay: Duration::from_millis(DEFAULT_RECONNECT_DELAY_MS),
            mute_reconcile_interval: Duration::from_millis(DEFAULT_MUTE_RECONCILE_INTERVAL_MS),
            device_health_interval: Duration::from_millis(DEFAULT_DEVICE_HEALTH_INTERVAL_MS),
            device_change_debounce: Duration::from_millis(DEFAULT_DEVICE_CHANGE_DEBOUNCE_MS),
            permission_timeout: Duration::from_secs(DEFAULT_PERMISSION_TIMEOUT_SECONDS),
            share_discovery_throttle: Duration::from_millis(DEFAULT_SHARE_DISCOVERY_THROTTLE_MS),
            share_publish_settle: Duration::from_millis(DEFAULT_SHARE_PUBLISH_SETTLE_MS),
            roster_sync_interval: Duration::from_millis(DEFAULT_ROSTER_SYNC_INTERVAL_MS),
            heartbeat_interval: Duration::from_secs(DEFAULT_HEARTBEAT_INTERVAL_SECONDS),
            signaling_queue_capacity: DEFAULT_SIGNALING_QUEUE_CAPACITY,
        }
    }
}

/// Media session configuration.
#[derive(Clone)]
pub struct Config {
    /// Base URL of the token service (`POST /join-meeting`).
    pub token_service_url: String,

    /// Base URL of the meeting control API (defaults to the token service).
    pub api_base_url: String,

    /// Bearer token for the meeting control API.
    /// Protected by `SecretString` to prevent accidental logging.
    pub api_token: Option<SecretString>,

    pub token_max_attempts: u32,
    pub token_initial_backoff: Duration,
    pub token_max_backoff: Duration,
    pub http_timeout: Duration,

    pub timings: SessionTimings,

    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("token_service_url", &self.token_service_url)
            .field("api_base_url", &self.api_base_url)
            .field(
                "api_token",
                &self.api_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_max_attempts", &self.token_max_attempts)
            .field("token_initial_backoff", &self.token_initial_backoff)
            .field("token_max_backoff", &self.token_max_backoff)
            .field("http_timeout", &self.http_timeout)
            .field("timings", &self.timings)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}

/// Positive millisecond duration.
fn millis(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<Duration, ConfigError> {
    let value = parse_or(vars, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!("{key} must be greater than 0")));
    }
    Ok(Duration::from_millis(value))
}

/// Positive second duration.
fn seconds(vars: &HashMap<String, String>, key: &str, default: u64) -> Result<Duration, ConfigError> {
    let value = parse_or(vars, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!("{key} must be greater than 0")));
    }
    Ok(Duration::from_secs(value))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let token_service_url = vars
            .get("MS_TOKEN_SERVICE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("MS_TOKEN_SERVICE_URL".to_string()))?
            .clone();

        let api_base_url = vars
            .get("MS_API_BASE_URL")
            .filter(|v| !v.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| token_service_url.clone());

        let api_token = vars
            .get("MS_API_TOKEN")
            .filter(|v| !v.is_empty())
            .map(|v| SecretString::from(v.clone()));

        let token_max_attempts = parse_or(vars, "MS_TOKEN_MAX_ATTEMPTS", DEFAULT_TOKEN_MAX_ATTEMPTS)?;
        if token_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "MS_TOKEN_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let token_initial_backoff = millis(
            vars,
            "MS_TOKEN_INITIAL_BACKOFF_MS",
            DEFAULT_TOKEN_INITIAL_BACKOFF_MS,
        )?;
        let token_max_backoff =
            millis(vars, "MS_TOKEN_MAX_BACKOFF_MS", DEFAULT_TOKEN_MAX_BACKOFF_MS)?;
        if token_max_backoff < token_initial_backoff {
            return Err(ConfigError::InvalidValue(
                "MS_TOKEN_MAX_BACKOFF_MS must not be below MS_TOKEN_INITIAL_BACKOFF_MS"
                    .to_string(),
            ));
        }
        let http_timeout = millis(vars, "MS_HTTP_TIMEOUT_MS", DEFAULT_HTTP_TIMEOUT_MS)?;

        let signaling_queue_capacity = parse_or(
            vars,
            "MS_SIGNALING_QUEUE_CAPACITY",
            DEFAULT_SIGNALING_QUEUE_CAPACITY,
        )?;
        if signaling_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "MS_SIGNALING_QUEUE_CAPACITY must be greater than 0".to_string(),
            ));
        }

        let timings = SessionTimings {
            stabilization_timeout: millis(
                vars,
                "MS_STABILIZATION_TIMEOUT_MS",
                DEFAULT_STABILIZATION_TIMEOUT_MS,
            )?,
            stabilization_poll: millis(
                vars,
                "MS_STABILIZATION_POLL_MS",
                DEFAULT_STABILIZATION_POLL_MS,
            )?,
            reconnect_delay: millis(vars, "MS_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY_MS)?,
            mute_reconcile_interval: millis(
                vars,
                "MS_MUTE_RECONCILE_INTERVAL_MS",
                DEFAULT_MUTE_RECONCILE_INTERVAL_MS,
            )?,
            device_health_interval: millis(
                vars,
                "MS_DEVICE_HEALTH_INTERVAL_MS",
                DEFAULT_DEVICE_HEALTH_INTERVAL_MS,
            )?,
            device_change_debounce: millis(
                vars,
                "MS_DEVICE_CHANGE_DEBOUNCE_MS",
                DEFAULT_DEVICE_CHANGE_DEBOUNCE_MS,
            )?,
            permission_timeout: seconds(
                vars,
                "MS_PERMISSION_TIMEOUT_SECONDS",
                DEFAULT_PERMISSION_TIMEOUT_SECONDS,
            )?,
            share_discovery_throttle: millis(
                vars,
                "MS_SHARE_DISCOVERY_THROTTLE_MS",
                DEFAULT_SHARE_DISCOVERY_THROTTLE_MS,
            )?,
            share_publish_settle: millis(
                vars,
                "MS_SHARE_PUBLISH_SETTLE_MS",
                DEFAULT_SHARE_PUBLISH_SETTLE_MS,
            )?,
            roster_sync_interval: millis(
                vars,
                "MS_ROSTER_SYNC_INTERVAL_MS",
                DEFAULT_ROSTER_SYNC_INTERVAL_MS,
            )?,
            heartbeat_interval: seconds(
                vars,
                "MS_HEARTBEAT_INTERVAL_SECONDS",
                DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
            )?,
            signaling_queue_capacity,
        };

        Ok(Config {
            token_service_url,
            api_base_url,
            api_token,
            token_max_attempts,
            token_initial_backoff,
            token_max_backoff,
            http_timeout,
            timings,
            observability: ObservabilityConfig::from_vars(vars),
        })
    }

    /// Token client configuration derived from this config.
    #[must_use]
    pub fn join_token_config(&self) -> JoinTokenConfig {
        JoinTokenConfig::new(self.token_service_url.clone())
            .with_http_timeout(self.http_timeout)
            .with_max_attempts(self.token_max_attempts)
            .with_backoff(self.token_initial_backoff, self.token_max_backoff)
    }

    /// Meeting control API client derived from this config.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Configuration` if the HTTP client cannot be built.
    pub fn meeting_api_client(&self) -> Result<MeetingApiClient, common::meeting_api::ApiError> {
        MeetingApiClient::new(
            self.api_base_url.clone(),
            self.api_token.clone(),
            self.http_timeout,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "MS_TOKEN_SERVICE_URL".to_string(),
            "https://api.example.com".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.token_service_url, "https://api.example.com");
        assert_eq!(config.api_base_url, "https://api.example.com");
        assert!(config.api_token.is_none());
        assert_eq!(config.token_max_attempts, DEFAULT_TOKEN_MAX_ATTEMPTS);
        assert_eq!(config.token_initial_backoff, Duration::from_millis(500));
        assert_eq!(config.http_timeout, Duration::from_secs(10));
        assert_eq!(config.timings, SessionTimings::default());
    }

    #[test]
    fn test_default_timings() {
        let timings = SessionTimings::default();
        assert_eq!(timings.stabilization_timeout, Duration::from_secs(15));
        assert_eq!(timings.permission_timeout, Duration::from_secs(30));
        assert_eq!(timings.roster_sync_interval, Duration::from_secs(3));
        assert_eq!(timings.device_change_debounce, Duration::from_millis(500));
        assert_eq!(timings.signaling_queue_capacity, 256);
    }

    #[test]
    fn test_from_vars_overrides() {
        let mut vars = base_vars();
        vars.insert("MS_API_BASE_URL".to_string(), "https://meetings.example.com".to_string());
        vars.insert("MS_API_TOKEN".to_string(), "api-secret".to_string());
        vars.insert("MS_TOKEN_MAX_ATTEMPTS".to_string(), "5".to_string());
        vars.insert("MS_PERMISSION_TIMEOUT_SECONDS".to_string(), "10".to_string());
        vars.insert("MS_MUTE_RECONCILE_INTERVAL_MS".to_string(), "300".to_string());
        vars.insert("MS_SIGNALING_QUEUE_CAPACITY".to_string(), "32".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.api_base_url, "https://meetings.example.com");
        assert!(config.api_token.is_some());
        assert_eq!(config.token_max_attempts, 5);
        assert_eq!(config.timings.permission_timeout, Duration::from_secs(10));
        assert_eq!(config.timings.mute_reconcile_interval, Duration::from_millis(300));
        assert_eq!(config.timings.signaling_queue_capacity, 32);
        assert_eq!(config.join_token_config().max_attempts, 5);
    }

    #[test]
    fn test_missing_token_service_url() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(ref var)) if var == "MS_TOKEN_SERVICE_URL"));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        for (key, value) in [
            ("MS_STABILIZATION_TIMEOUT_MS", "soon"),
            ("MS_RECONNECT_DELAY_MS", "0"),
            ("MS_TOKEN_MAX_ATTEMPTS", "0"),
            ("MS_SIGNALING_QUEUE_CAPACITY", "0"),
            ("MS_HEARTBEAT_INTERVAL_SECONDS", "-1"),
        ] {
            let mut vars = base_vars();
            vars.insert(key.to_string(), value.to_string());
            assert!(
                matches!(Config::from_vars(&vars), Err(ConfigError::InvalidValue(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_backoff_bounds_are_ordered() {
        let mut vars = base_vars();
        vars.insert("MS_TOKEN_INITIAL_BACKOFF_MS".to_string(), "5000".to_string());
        vars.insert("MS_TOKEN_MAX_BACKOFF_MS".to_string(), "1000".to_string());
        assert!(matches!(Config::from_vars(&vars), Err(ConfigError::InvalidValue(_))));
    }

    #[test]
    fn test_debug_redacts_api_token() {
        let mut vars = base_vars();
        vars.insert("MS_API_TOKEN".to_string(), "super-secret-api-token".to_string());
        let config = Config::from_vars(&vars).unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret-api-token"));
        assert!(debug.contains("[REDACTED]"));
    }
}
