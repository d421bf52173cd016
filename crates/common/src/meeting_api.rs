//! Meeting control REST client (recording and meeting end).
//!
//! The session core only needs success or failure from these endpoints; the
//! recording job descriptor is returned to the caller as opaque JSON.
//!
//! | Endpoint | Purpose |
//! |----------|---------|
//! | `POST /meetings/{id}/recording/start` | Start a server-side recording |
//! | `POST /meetings/{id}/recording/stop` | Stop the active recording |
//! | `POST /meetings/{id}/end` | End the meeting for every participant |

use crate::secret::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors returned by the meeting control API.
#[derive(Error, Debug, Clone)]
pub enum ApiError {
    /// HTTP client or network error.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Non-2xx status.
    #[error("Meeting API returned status {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Message from the `{error}` envelope, or the status reason.
        message: String,
    },

    /// Client configuration error.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Recording quality preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingQuality {
    /// 720p.
    Medium,
    /// 1080p.
    #[default]
    High,
}

/// Recording composition layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordingLayout {
    /// Equal-size tiles.
    #[default]
    Grid,
    /// Active speaker large, others in a strip.
    Speaker,
    /// Screen share only.
    SingleSpeaker,
}

/// Options for starting a recording.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RecordingOptions {
    /// Output quality.
    pub quality: RecordingQuality,
    /// Composition layout.
    pub layout: RecordingLayout,
}

/// Opaque recording job descriptor returned by the service.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct RecordingJob(pub serde_json::Value);

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: String,
}

/// Client for the meeting control endpoints.
#[derive(Clone)]
pub struct MeetingApiClient {
    base_url: String,
    api_token: Option<SecretString>,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for MeetingApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeetingApiClient")
            .field("base_url", &self.base_url)
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl MeetingApiClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Configuration` if the HTTP client cannot be built.
    pub fn new(
        base_url: String,
        api_token: Option<SecretString>,
        http_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(http_timeout)
            .build()
            .map_err(|e| ApiError::Configuration(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            http_client,
        })
    }

    /// Start recording a meeting.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on network failure or non-2xx status.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn start_recording(
        &self,
        meeting_id: &str,
        options: &RecordingOptions,
    ) -> Result<RecordingJob, ApiError> {
        let url = format!("{}/meetings/{meeting_id}/recording/start", self.base_url);
        let response = self.post(&url, Some(options)).await?;
        Self::parse_job(response).await
    }

    /// Stop the active recording.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on network failure or non-2xx status.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn stop_recording(&self, meeting_id: &str) -> Result<RecordingJob, ApiError> {
        let url = format!("{}/meetings/{meeting_id}/recording/stop", self.base_url);
        let response = self.post::<()>(&url, None).await?;
        Self::parse_job(response).await
    }

    /// End the meeting for all participants.
    ///
    /// The service broadcasts an application-level `meeting_ended` message
    /// to every peer before the transport room is closed.
    ///
    /// # Errors
    ///
    /// Returns `ApiError` on network failure or non-2xx status.
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    pub async fn end_meeting(&self, meeting_id: &str) -> Result<(), ApiError> {
        let url = format!("{}/meetings/{meeting_id}/end", self.base_url);
        self.post::<()>(&url, None).await?;
        Ok(())
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: Option<&T>,
    ) -> Result<reqwest::Response, ApiError> {
        debug!(target: "common.meeting_api", url = %url, "Calling meeting API");

        let mut request = self.http_client.post(url);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .map(|envelope| envelope.error)
            .unwrap_or_else(|_| status.canonical_reason().unwrap_or("unknown").to_string());

        warn!(
            target: "common.meeting_api",
            status = %status,
            "Meeting API returned error status"
        );

        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn parse_job(response: reqwest::Response) -> Result<RecordingJob, ApiError> {
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Http(e.to_string()))?;

        if body.trim().is_empty() {
            return Ok(RecordingJob(serde_json::Value::Null));
        }

        // The descriptor is opaque; a non-JSON body is kept as a string.
        Ok(RecordingJob(
            serde_json::from_str(&body).unwrap_or(serde_json::Value::String(body)),
        ))
    }
}
