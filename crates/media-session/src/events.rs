//! Session events broadcast to UI collaborators.

use tokio::sync::broadcast;

use crate::screen_share::{PendingRequest, ScreenShareSnapshot};
use crate::track_guard::LocalMediaState;
use crate::types::MediaKind;

/// Why a session ended for good. No reconnect follows any of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalReason {
    MeetingEnded,
    RemovedByHost,
    DuplicateIdentity,
    RoomDeleted,
}

impl TerminalReason {
    #[must_use]
    pub const fn user_message(self) -> &'static str {
        match self {
            TerminalReason::MeetingEnded => "The meeting has ended",
            TerminalReason::RemovedByHost => "You were removed from the meeting by the host",
            TerminalReason::DuplicateIdentity => {
                "You joined this meeting from another device or tab"
            }
            TerminalReason::RoomDeleted => "The meeting room is no longer available",
        }
    }
}

/// A chat message, sent or received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub message_id: String,
    pub sender_identity: String,
    pub sender_name: String,
    pub text: String,
    pub timestamp_ms: i64,
    /// Sent by the local participant.
    pub local: bool,
}

/// Degraded local device states surfaced as notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceNotice {
    AudioDeviceReplaced { device_id: Option<String> },
    AudioDeviceDegraded { message: String },
    CaptureUnavailable { kind: MediaKind, message: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected {
        meeting_id: String,
        identity: String,
    },
    Reconnecting {
        reason: &'static str,
    },
    Reconnected,
    ReconnectFailed {
        message: String,
    },
    Disconnected,
    Terminated(TerminalReason),
    ParticipantJoined {
        identity: String,
        name: Option<String>,
    },
    ParticipantLeft {
        identity: String,
    },
    ChatReceived(ChatMessage),
    ReactionReceived {
        sender_identity: String,
        sender_name: String,
        emoji: String,
    },
    ScreenShareChanged(ScreenShareSnapshot),
    /// Host side: a participant asks to share.
    ScreenShareRequested(PendingRequest),
    ScreenShareRequestResolved {
        request_id: String,
        approved: bool,
    },
    PeerVideoStateChanged {
        identity: String,
        video_enabled: bool,
    },
    PeerSwitchedDevice {
        identity: String,
        name: String,
    },
    DeviceNotice(DeviceNotice),
    LocalMediaChanged(LocalMediaState),
}

/// Send without caring whether anyone listens.
pub(crate) fn emit(events: &broadcast::Sender<SessionEvent>, event: SessionEvent) {
    let _ = events.send(event);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_messages_are_distinct() {
        let reasons = [
            TerminalReason::MeetingEnded,
            TerminalReason::RemovedByHost,
            TerminalReason::DuplicateIdentity,
            TerminalReason::RoomDeleted,
        ];
        let messages: std::collections::HashSet<_> =
            reasons.iter().map(|r| r.user_message()).collect();
        assert_eq!(messages.len(), reasons.len());
    }

    #[test]
    fn test_emit_without_receivers_is_silent() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        emit(&tx, SessionEvent::Disconnected);
    }
}
