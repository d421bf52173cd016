//! Join-token acquisition from the meeting token service.
//!
//! Exchanges a [`JoinMeetingRequest`] for a [`JoinGrant`] (transport access
//! token, transport URL, assigned identity) via `POST {endpoint}/join-meeting`.
//!
//! # Retry Policy
//!
//! - Every failure is treated as transient: network errors, timeouts,
//!   non-2xx statuses, and malformed bodies
//! - At most `max_attempts` requests are made per call
//! - Backoff doubles after each failure (500ms, 1s, 2s, ..., capped at `max_backoff`)
//! - After the last attempt the caller receives [`TokenError::Exhausted`]
//!   wrapping the final failure
//!
//! Unlike a background refresher, acquisition is bounded: the caller (the
//! connection lifecycle) decides what to do when the service stays down.
//!
//! # Example
//!
//! ```rust,ignore
//! use common::join_token::{JoinTokenClient, JoinTokenConfig};
//! use common::types::JoinMeetingRequest;
//!
//! let client = JoinTokenClient::new(JoinTokenConfig::new("https://api.example.com".into()))?;
//! let grant = client
//!     .acquire(&JoinMeetingRequest {
//!         meeting_id: "standup".into(),
//!         user_id: "42".into(),
//!         display_name: "Alice".into(),
//!         is_host: false,
//!     })
//!     .await?;
//! ```

use crate::types::{JoinGrant, JoinMeetingRequest};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, instrument, trace, warn};

// =============================================================================
// Constants
// =============================================================================

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of requests made before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);

/// Default upper bound for the retry delay.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(4);

/// Default connection timeout for HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur while acquiring a join token.
#[derive(Error, Debug, Clone)]
pub enum TokenError {
    /// HTTP client or network error (including timeouts).
    #[error("HTTP client error: {0}")]
    HttpError(String),

    /// Token service answered with a non-2xx status.
    #[error("Token service rejected request (status {status}): {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Message from the `{error}` envelope, or the status reason.
        message: String,
    },

    /// Response body could not be parsed.
    #[error("Invalid token response: {0}")]
    InvalidResponse(String),

    /// Client configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// All attempts failed.
    #[error("Token acquisition failed after {attempts} attempts: {last_error}")]
    Exhausted {
        /// Number of requests made.
        attempts: u32,
        /// The failure of the final attempt.
        last_error: Box<TokenError>,
    },
}

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the join-token client.
#[derive(Debug, Clone)]
pub struct JoinTokenConfig {
    /// Token service base URL (e.g., `https://api.example.com`).
    pub endpoint: String,

    /// HTTP request timeout.
    pub http_timeout: Duration,

    /// Maximum number of requests per `acquire` call (at least 1).
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub initial_backoff: Duration,

    /// Upper bound for the retry delay.
    pub max_backoff: Duration,
}

impl JoinTokenConfig {
    /// Create a new configuration with default timeouts and retry policy.
    #[must_use]
    pub fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }

    /// Set the HTTP timeout.
    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Set the maximum number of attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Set the backoff bounds.
    #[must_use]
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    /// Delay to wait after the given (1-based) failed attempt.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1_u32 << exponent)
            .min(self.max_backoff)
    }
}

// =============================================================================
// Response Types
// =============================================================================

/// Error envelope returned by the token service with non-2xx statuses.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: String,
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for the token service.
#[derive(Debug, Clone)]
pub struct JoinTokenClient {
    config: JoinTokenConfig,
    http_client: reqwest::Client,
}

impl JoinTokenClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Configuration` if the HTTP client cannot be built
    /// or `max_attempts` is zero.
    pub fn new(config: JoinTokenConfig) -> Result<Self, TokenError> {
        if config.max_attempts == 0 {
            return Err(TokenError::Configuration(
                "max_attempts must be at least 1".into(),
            ));
        }

        let http_client = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| TokenError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    /// Get the client configuration.
    #[must_use]
    pub fn config(&self) -> &JoinTokenConfig {
        &self.config
    }

    /// Acquire a join grant, retrying with exponential backoff.
    ///
    /// # Errors
    ///
    /// Returns `TokenError::Exhausted` once `max_attempts` requests have failed.
    #[instrument(skip_all, fields(meeting_id = %request.meeting_id))]
    pub async fn acquire(&self, request: &JoinMeetingRequest) -> Result<JoinGrant, TokenError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.request_once(request).await {
                Ok(grant) => {
                    info!(
                        target: "common.join_token",
                        meeting_id = %request.meeting_id,
                        attempt,
                        "Join token acquired"
                    );
                    return Ok(grant);
                }
                Err(e) if attempt >= self.config.max_attempts => {
                    warn!(
                        target: "common.join_token",
                        meeting_id = %request.meeting_id,
                        attempts = attempt,
                        error = %e,
                        "Join token acquisition exhausted retries"
                    );
                    return Err(TokenError::Exhausted {
                        attempts: attempt,
                        last_error: Box::new(e),
                    });
                }
                Err(e) => {
                    let backoff = self.config.backoff_for_attempt(attempt);
                    warn!(
                        target: "common.join_token",
                        meeting_id = %request.meeting_id,
                        attempt,
                        error = %e,
                        backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                        "Join token request failed, will retry"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Perform a single `POST /join-meeting` request.
    async fn request_once(&self, request: &JoinMeetingRequest) -> Result<JoinGrant, TokenError> {
        let url = format!(
            "{}/join-meeting",
            self.config.endpoint.trim_end_matches('/')
        );

        debug!(
            target: "common.join_token",
            url = %url,
            "Requesting join token"
        );

        let response = self
            .http_client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                debug!(target: "common.join_token", error = %e, "HTTP request failed");
                TokenError::HttpError(e.to_string())
            })?;

        let status = response.status();

        if status.is_success() {
            return response.json::<JoinGrant>().await.map_err(|e| {
                warn!(target: "common.join_token", error = %e, "Failed to parse join response");
                TokenError::InvalidResponse(e.to_string())
            });
        }

        let body = response.text().await.unwrap_or_else(|e| {
            trace!(target: "common.join_token", error = %e, "Failed to read error response body");
            String::new()
        });
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());

        warn!(
            target: "common.join_token",
            status = %status,
            "Token service returned error status"
        );

        Err(TokenError::Rejected {
            status: status.as_u16(),
            message,
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
