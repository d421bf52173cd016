//! Observability configuration shared by the session core and its tools.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter applied when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "media_session=info,common=info";

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (`EnvFilter` syntax).
    pub log_level: String,
    /// Enable JSON-formatted logs.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_FILTER.to_string(),
            json_logs: false,
        }
    }
}

impl ObservabilityConfig {
    /// Read `MS_LOG_LEVEL` and `MS_JSON_LOGS` from a variable map.
    ///
    /// Unknown or malformed values fall back to the defaults.
    #[must_use]
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let defaults = Self::default();
        Self {
            log_level: vars
                .get("MS_LOG_LEVEL")
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .unwrap_or(defaults.log_level),
            json_logs: vars
                .get("MS_JSON_LOGS")
                .map_or(defaults.json_logs, |v| {
                    matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes")
                }),
        }
    }

    /// Install the global tracing subscriber.
    ///
    /// `RUST_LOG` takes precedence over `log_level`. Calling this twice is
    /// harmless; the second install is ignored.
    pub fn init_tracing(&self) {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| self.log_level.clone().into());

        let registry = tracing_subscriber::registry().with(filter);
        let result = if self.json_logs {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
        } else {
            registry.with(tracing_subscriber::fmt::layer()).try_init()
        };

        if result.is_err() {
            tracing::debug!("Tracing subscriber already installed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_vars_missing() {
        let config = ObservabilityConfig::from_vars(&HashMap::new());
        assert_eq!(config, ObservabilityConfig::default());
        assert_eq!(config.log_level, DEFAULT_LOG_FILTER);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_overrides_from_vars() {
        let vars = HashMap::from([
            ("MS_LOG_LEVEL".to_string(), "media_session=trace".to_string()),
            ("MS_JSON_LOGS".to_string(), "TRUE".to_string()),
        ]);
        let config = ObservabilityConfig::from_vars(&vars);
        assert_eq!(config.log_level, "media_session=trace");
        assert!(config.json_logs);
    }

    #[test]
    fn test_blank_log_level_uses_default() {
        let vars = HashMap::from([
            ("MS_LOG_LEVEL".to_string(), "  ".to_string()),
            ("MS_JSON_LOGS".to_string(), "nope".to_string()),
        ]);
        let config = ObservabilityConfig::from_vars(&vars);
        assert_eq!(config.log_level, DEFAULT_LOG_FILTER);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_init_tracing_twice_is_harmless() {
        let config = ObservabilityConfig::default();
        config.init_tracing();
        config.init_tracing();
    }
}
