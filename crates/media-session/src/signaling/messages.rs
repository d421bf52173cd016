//! Data-channel message envelopes.
//!
//! Every envelope is a JSON object with a `type` tag, type-specific fields
//! and a millisecond `timestamp`. Types this build does not know decode to
//! `SignalMessage::Unknown` and are ignored by the receiver.

use serde::{Deserialize, Serialize};

/// Current wall-clock time in milliseconds since the Unix epoch.
#[must_use]
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalMessage {
    ChatMessage {
        message_id: String,
        sender_identity: String,
        sender_name: String,
        text: String,
        #[serde(default)]
        timestamp: i64,
    },
    Reaction {
        sender_identity: String,
        sender_name: String,
        emoji: String,
        #[serde(default)]
        timestamp: i64,
    },
    ScreenShareRequest {
        request_id: String,
        requester_identity: String,
        requester_name: String,
        #[serde(default)]
        timestamp: i64,
    },
    ScreenShareApproved {
        request_id: String,
        requester_identity: String,
        approved_by: String,
        #[serde(default)]
        timestamp: i64,
    },
    ScreenShareDenied {
        request_id: String,
        requester_identity: String,
        denied_by: String,
        #[serde(default)]
        timestamp: i64,
    },
    ForceStopScreenShare {
        target_identity: String,
        requested_by: String,
        #[serde(default)]
        timestamp: i64,
    },
    ScreenShareStopped {
        sharer_identity: String,
        stopped_by: String,
        #[serde(default)]
        timestamp: i64,
    },
    ParticipantVideoStateChanged {
        participant_identity: String,
        video_enabled: bool,
        #[serde(default)]
        timestamp: i64,
    },
    AudioDeviceChanged {
        participant_identity: String,
        participant_name: String,
        #[serde(default)]
        timestamp: i64,
    },
    MeetingEnded {
        #[serde(default)]
        ended_by: Option<String>,
        #[serde(default)]
        timestamp: i64,
    },
    ParticipantRemoved {
        target_identity: String,
        removed_by: String,
        #[serde(default)]
        timestamp: i64,
    },
    Heartbeat {
        participant_identity: String,
        #[serde(default)]
        timestamp: i64,
    },
    #[serde(other)]
    Unknown,
}

impl SignalMessage {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    /// Wire `type` tag, also used as a bounded metric label.
    #[must_use]
    pub const fn message_type(&self) -> &'static str {
        match self {
            SignalMessage::ChatMessage { .. } => "chat_message",
            SignalMessage::Reaction { .. } => "reaction",
            SignalMessage::ScreenShareRequest { .. } => "screen_share_request",
            SignalMessage::ScreenShareApproved { .. } => "screen_share_approved",
            SignalMessage::ScreenShareDenied { .. } => "screen_share_denied",
            SignalMessage::ForceStopScreenShare { .. } => "force_stop_screen_share",
            SignalMessage::ScreenShareStopped { .. } => "screen_share_stopped",
            SignalMessage::ParticipantVideoStateChanged { .. } => "participant_video_state_changed",
            SignalMessage::AudioDeviceChanged { .. } => "audio_device_changed",
            SignalMessage::MeetingEnded { .. } => "meeting_ended",
            SignalMessage::ParticipantRemoved { .. } => "participant_removed",
            SignalMessage::Heartbeat { .. } => "heartbeat",
            SignalMessage::Unknown => "unknown",
        }
    }
}
