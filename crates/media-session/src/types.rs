//! Media and connection value types.

use serde::{Deserialize, Serialize};

pub use common::types::ParticipantRole;

/// Camera or microphone, the two kinds with a mute intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Returns the kind as a static string for metric labels and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Video => "video",
        }
    }

    /// Track source carrying this kind.
    #[must_use]
    pub const fn source(self) -> TrackSource {
        match self {
            MediaKind::Audio => TrackSource::Microphone,
            MediaKind::Video => TrackSource::Camera,
        }
    }
}

/// Role a track plays in the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackSource {
    Camera,
    Microphone,
    ScreenShare,
    ScreenShareAudio,
}

impl TrackSource {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TrackSource::Camera => "camera",
            TrackSource::Microphone => "microphone",
            TrackSource::ScreenShare => "screen_share",
            TrackSource::ScreenShareAudio => "screen_share_audio",
        }
    }

    /// Whether this is one of the two screen-share sources.
    #[must_use]
    pub const fn is_screen_share(self) -> bool {
        matches!(self, TrackSource::ScreenShare | TrackSource::ScreenShareAudio)
    }

    /// Mute-intent kind for camera and microphone sources.
    #[must_use]
    pub const fn media_kind(self) -> Option<MediaKind> {
        match self {
            TrackSource::Camera => Some(MediaKind::Video),
            TrackSource::Microphone => Some(MediaKind::Audio),
            TrackSource::ScreenShare | TrackSource::ScreenShareAudio => None,
        }
    }
}

/// Readiness of the hardware track behind a local track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    Live,
    Ended,
}

/// Kind of surface picked in the display capture dialog.
///
/// Only `Tab` reliably carries system audio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplaySurface {
    Tab,
    Window,
    Monitor,
}

/// Session connection status exposed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Reconnecting => "reconnecting",
        }
    }
}

/// Arguments of `connect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOptions {
    pub meeting_id: String,
    pub user_id: String,
    pub display_name: String,
    pub is_host: bool,
    pub is_co_host: bool,
}

impl JoinOptions {
    #[must_use]
    pub fn new(
        meeting_id: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            meeting_id: meeting_id.into(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            is_host: false,
            is_co_host: false,
        }
    }

    #[must_use]
    pub fn as_host(mut self) -> Self {
        self.is_host = true;
        self
    }

    #[must_use]
    pub fn as_co_host(mut self) -> Self {
        self.is_co_host = true;
        self
    }

    #[must_use]
    pub fn role(&self) -> ParticipantRole {
        ParticipantRole::from_flags(self.is_host, self.is_co_host)
    }

    pub(crate) fn join_request(&self) -> common::types::JoinMeetingRequest {
        common::types::JoinMeetingRequest {
            meeting_id: self.meeting_id.clone(),
            user_id: self.user_id.clone(),
            display_name: self.display_name.clone(),
            is_host: self.is_host,
        }
    }
}
