//! Media session error types.
//!
//! Every error maps to a stable numeric code and a user-facing message.
//! Internal details stay in logs; `user_message()` never includes them.

use std::time::Duration;

use common::join_token::TokenError;
use common::meeting_api::ApiError;
use thiserror::Error;

use crate::transport::TransportError;

/// Camera, microphone or display capture failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// The user or platform refused access.
    #[error("Capture permission denied")]
    PermissionDenied,

    /// The platform cannot capture this kind of media.
    #[error("Capture not supported")]
    Unsupported,

    /// The display picker was dismissed without choosing a surface.
    #[error("No capture surface selected")]
    NoSurfaceSelected,

    /// No matching input device is present.
    #[error("No capture device available")]
    NoDevice,

    /// Any other capture failure.
    #[error("Capture failed: {0}")]
    Failed(String),
}

impl CaptureError {
    /// Actionable message for the UI. Each variant has its own wording.
    #[must_use]
    pub fn user_message(&self) -> &'static str {
        match self {
            CaptureError::PermissionDenied => {
                "Access was blocked. Allow camera, microphone or screen access in your browser settings and try again."
            }
            CaptureError::Unsupported => "Your browser does not support this kind of capture.",
            CaptureError::NoSurfaceSelected => {
                "No screen, window or tab was selected. Choose what to share and try again."
            }
            CaptureError::NoDevice => "No camera or microphone was found. Connect a device and try again.",
            CaptureError::Failed(_) => "Capture could not be started. Please try again.",
        }
    }
}

/// Media session error type.
///
/// `Clone` so that the result of a shared in-flight connect can be handed
/// to every waiter.
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    /// Token issuance failed after all retries.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transport did not reach `connected` in time.
    #[error("Connection did not stabilize within {0:?}")]
    ConnectionTimeout(Duration),

    /// Capture denied, unsupported or without a device.
    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    /// Screen-share request denied, or caller lacks privilege.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// No decision arrived for a screen-share request in time.
    #[error("Screen share request timed out")]
    PermissionTimedOut,

    /// A screen-share request from this participant is still pending.
    #[error("A screen share request is already pending")]
    RequestAlreadyPending,

    /// Track publish or unpublish failed.
    #[error("Publish error: {0}")]
    Publish(String),

    /// Another operation holds the component.
    #[error("Operation in progress: {0}")]
    Busy(String),

    /// No live session.
    #[error("Not connected")]
    NotConnected,

    /// A session for another meeting is live.
    #[error("Already connected to meeting {0}")]
    AlreadyConnected(String),

    /// The session ended for good (meeting ended or removed).
    #[error("Session terminated")]
    Terminated,

    /// Transport (SDK) failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// REST collaborator failure.
    #[error("Service error: {0}")]
    Service(String),

    /// Internal failure.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SessionError {
    /// Stable numeric code for the UI collaborator.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            SessionError::Auth(_) => 2,                       // UNAUTHORIZED
            SessionError::PermissionDenied(_) => 3,           // FORBIDDEN
            SessionError::NotConnected => 4,                  // NOT_CONNECTED
            SessionError::Busy(_)
            | SessionError::AlreadyConnected(_)
            | SessionError::RequestAlreadyPending => 5,       // CONFLICT
            SessionError::Transport(_)
            | SessionError::Service(_)
            | SessionError::Internal(_) => 6,                 // INTERNAL_ERROR
            SessionError::ConnectionTimeout(_) | SessionError::PermissionTimedOut => 8, // TIMEOUT
            SessionError::Capture(_) => 9,                    // CAPTURE_FAILED
            SessionError::Publish(_) => 10,                   // PUBLISH_FAILED
            SessionError::Terminated => 11,                   // TERMINATED
        }
    }

    /// Returns a user-safe message (no internal details).
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Auth(_) => {
                "Could not join the meeting. Check your invitation and try again.".to_string()
            }
            SessionError::ConnectionTimeout(_) => {
                "The connection could not be established. Check your network and try again."
                    .to_string()
            }
            SessionError::Capture(e) => e.user_message().to_string(),
            SessionError::PermissionDenied(msg) => msg.clone(),
            SessionError::PermissionTimedOut => {
                "The host did not respond to your screen share request.".to_string()
            }
            SessionError::RequestAlreadyPending => {
                "Your screen share request is still waiting for the host.".to_string()
            }
            SessionError::Publish(_) => "Your media could not be sent. Please try again.".to_string(),
            SessionError::Busy(_) => "Please wait for the current action to finish.".to_string(),
            SessionError::NotConnected => "You are not connected to a meeting.".to_string(),
            SessionError::AlreadyConnected(_) => {
                "You are already in another meeting. Leave it first.".to_string()
            }
            SessionError::Terminated => "This meeting session has ended.".to_string(),
            SessionError::Transport(_) | SessionError::Service(_) | SessionError::Internal(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

impl From<TokenError> for SessionError {
    fn from(err: TokenError) -> Self {
        SessionError::Auth(err.to_string())
    }
}

impl From<ApiError> for SessionError {
    fn from(err: ApiError) -> Self {
        SessionError::Service(err.to_string())
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotConnected => SessionError::NotConnected,
            TransportError::Publish(msg) => SessionError::Publish(msg),
            other => SessionError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(SessionError::Auth("x".into()).error_code(), 2);
        assert_eq!(SessionError::PermissionDenied("x".into()).error_code(), 3);
        assert_eq!(SessionError::NotConnected.error_code(), 4);
        assert_eq!(SessionError::RequestAlreadyPending.error_code(), 5);
        assert_eq!(SessionError::Busy("publishing".into()).error_code(), 5);
        assert_eq!(SessionError::Internal("x".into()).error_code(), 6);
        assert_eq!(
            SessionError::ConnectionTimeout(Duration::from_secs(15)).error_code(),
            8
        );
        assert_eq!(SessionError::PermissionTimedOut.error_code(), 8);
        assert_eq!(SessionError::Capture(CaptureError::NoDevice).error_code(), 9);
        assert_eq!(SessionError::Publish("x".into()).error_code(), 10);
        assert_eq!(SessionError::Terminated.error_code(), 11);
    }

    #[test]
    fn test_capture_errors_have_distinct_messages() {
        let variants = [
            CaptureError::PermissionDenied,
            CaptureError::Unsupported,
            CaptureError::NoSurfaceSelected,
            CaptureError::NoDevice,
            CaptureError::Failed("boom".into()),
        ];

        let mut messages: Vec<&str> = variants.iter().map(CaptureError::user_message).collect();
        messages.sort_unstable();
        messages.dedup();
        assert_eq!(messages.len(), variants.len());
    }

    #[test]
    fn test_user_message_hides_internal_details() {
        let err = SessionError::Transport("ice failure at 10.0.0.7".to_string());
        assert_eq!(err.user_message(), "An internal error occurred");
        assert!(err.to_string().contains("10.0.0.7"));

        let err = SessionError::Capture(CaptureError::Failed("NotReadableError".into()));
        assert!(!err.user_message().contains("NotReadableError"));
    }

    #[test]
    fn test_token_error_converts_to_auth() {
        let err: SessionError = TokenError::Exhausted {
            attempts: 3,
            last_error: Box::new(TokenError::HttpError("refused".into())),
        }
        .into();
        assert!(matches!(err, SessionError::Auth(ref msg) if msg.contains("3 attempts")));
    }

    #[test]
    fn test_transport_error_conversion() {
        let err: SessionError = TransportError::NotConnected.into();
        assert!(matches!(err, SessionError::NotConnected));

        let err: SessionError = TransportError::Publish("rejected".into()).into();
        assert!(matches!(err, SessionError::Publish(ref msg) if msg == "rejected"));

        let err: SessionError = TransportError::Connect("dns".into()).into();
        assert!(matches!(err, SessionError::Transport(_)));
    }
}
