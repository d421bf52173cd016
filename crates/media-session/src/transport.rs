//! Seams to the external WebRTC SDK.
//!
//! The core never talks to a concrete SDK. `RoomTransport` is the room
//! connection, `MediaDevices` creates capture tracks and `LocalMediaTrack`
//! is one local track with its two independent mute layers:
//!
//! - the SDK mute flag (`is_muted`), which is what peers are told
//! - the hardware capture flag (`is_capture_enabled`), which decides whether
//!   the device is actually producing media

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use common::secret::SecretString;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};

use crate::errors::CaptureError;
use crate::types::{DisplaySurface, ReadyState, TrackSource};

/// Transport-assigned publication id.
pub type TrackSid = String;

/// Local track shared between the guard, the monitor and the transport.
pub type SharedTrack = Arc<dyn LocalMediaTrack>;

/// Stream of SDK events for one room connection.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Errors reported by the SDK.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Room connect failed: {0}")]
    Connect(String),

    #[error("Room is not connected")]
    NotConnected,

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Data channel send failed: {0}")]
    Data(String),

    #[error("Transport error: {0}")]
    Other(String),
}

/// SDK-level room connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// Why the room connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    ClientInitiated,
    ParticipantRemoved,
    DuplicateIdentity,
    RoomDeleted,
    ServerShutdown,
    NetworkLost,
    Unknown,
}

impl DisconnectReason {
    /// Disconnect requested by the local user.
    #[must_use]
    pub const fn is_voluntary(self) -> bool {
        matches!(self, DisconnectReason::ClientInitiated)
    }

    /// Disconnects after which rejoining automatically is wrong.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            DisconnectReason::ParticipantRemoved
                | DisconnectReason::DuplicateIdentity
                | DisconnectReason::RoomDeleted
        )
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            DisconnectReason::ClientInitiated => "client_initiated",
            DisconnectReason::ParticipantRemoved => "participant_removed",
            DisconnectReason::DuplicateIdentity => "duplicate_identity",
            DisconnectReason::RoomDeleted => "room_deleted",
            DisconnectReason::ServerShutdown => "server_shutdown",
            DisconnectReason::NetworkLost => "network_lost",
            DisconnectReason::Unknown => "unknown",
        }
    }
}

/// The local participant as the SDK sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalParticipantInfo {
    pub identity: String,
    pub sid: String,
    pub name: Option<String>,
    pub metadata: Option<String>,
}

/// One publication of a remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicationInfo {
    pub sid: TrackSid,
    pub source: TrackSource,
    pub muted: bool,
    pub subscribed: bool,
}

/// Remote participant snapshot with its publications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipantInfo {
    pub identity: String,
    pub sid: String,
    pub name: Option<String>,
    pub metadata: Option<String>,
    pub publications: Vec<PublicationInfo>,
}

/// Events delivered by the SDK for one room connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    ParticipantConnected(RemoteParticipantInfo),
    ParticipantDisconnected {
        identity: String,
    },
    TrackPublished {
        identity: String,
        publication: PublicationInfo,
    },
    TrackUnpublished {
        identity: String,
        sid: TrackSid,
    },
    TrackSubscribed {
        identity: String,
        publication: PublicationInfo,
    },
    TrackUnsubscribed {
        identity: String,
        sid: TrackSid,
    },
    TrackMuted {
        identity: String,
        sid: TrackSid,
    },
    TrackUnmuted {
        identity: String,
        sid: TrackSid,
    },
    DataReceived {
        sender_identity: Option<String>,
        payload: Vec<u8>,
    },
    ConnectionStateChanged(TransportState),
    Disconnected(DisconnectReason),
}

/// Room connection provided by the SDK.
#[async_trait]
pub trait RoomTransport: Send + Sync {
    /// Open the room connection. Events for this connection arrive on the
    /// returned receiver until it closes.
    async fn connect(&self, url: &str, token: &SecretString)
        -> Result<TransportEvents, TransportError>;

    fn state(&self) -> TransportState;

    fn local_participant(&self) -> Option<LocalParticipantInfo>;

    fn remote_participants(&self) -> Vec<RemoteParticipantInfo>;

    async fn publish_track(&self, track: SharedTrack) -> Result<TrackSid, TransportError>;

    /// Resolves only after the SFU acknowledged the unpublish.
    async fn unpublish_track(&self, sid: &str) -> Result<(), TransportError>;

    async fn set_subscribed(
        &self,
        identity: &str,
        sid: &str,
        subscribed: bool,
    ) -> Result<(), TransportError>;

    /// Reliable data-channel send. An empty destination list broadcasts.
    async fn send_data(&self, payload: Vec<u8>, destinations: &[String])
        -> Result<(), TransportError>;

    async fn disconnect(&self);
}

/// What to ask the display picker for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayCaptureRequest {
    pub video: bool,
    pub system_audio: bool,
}

/// Tracks acquired from the display picker.
#[derive(Clone)]
pub struct DisplayCapture {
    pub video: SharedTrack,
    pub audio: Option<SharedTrack>,
}

impl fmt::Debug for DisplayCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayCapture")
            .field("video", &self.video.id())
            .field("audio", &self.audio.as_ref().map(|t| t.id()))
            .finish()
    }
}

/// Capture device access provided by the SDK / platform.
#[async_trait]
pub trait MediaDevices: Send + Sync {
    /// Id of the current default audio input, if any.
    async fn default_audio_input(&self) -> Result<Option<String>, CaptureError>;

    async fn create_microphone(&self, device_id: Option<&str>)
        -> Result<SharedTrack, CaptureError>;

    async fn create_camera(&self) -> Result<SharedTrack, CaptureError>;

    async fn capture_display(
        &self,
        request: DisplayCaptureRequest,
    ) -> Result<DisplayCapture, CaptureError>;

    /// OS-level device-change notifications.
    fn device_changes(&self) -> broadcast::Receiver<()>;
}

/// One local media track.
pub trait LocalMediaTrack: Send + Sync {
    fn id(&self) -> String;

    fn source(&self) -> TrackSource;

    fn is_muted(&self) -> bool;

    fn set_muted(&self, muted: bool);

    fn is_capture_enabled(&self) -> bool;

    fn set_capture_enabled(&self, enabled: bool);

    fn ready_state(&self) -> ReadyState;

    fn device_id(&self) -> Option<String>;

    /// The hardware reports the source as muted (OS privacy toggle).
    fn is_source_muted(&self) -> bool;

    fn display_surface(&self) -> Option<DisplaySurface>;

    fn stop(&self);
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_classification() {
        assert!(DisconnectReason::ClientInitiated.is_voluntary());
        assert!(!DisconnectReason::NetworkLost.is_voluntary());

        assert!(DisconnectReason::ParticipantRemoved.is_terminal());
        assert!(DisconnectReason::RoomDeleted.is_terminal());
        assert!(DisconnectReason::DuplicateIdentity.is_terminal());
        assert!(!DisconnectReason::NetworkLost.is_terminal());
        assert!(!DisconnectReason::ServerShutdown.is_terminal());
        assert!(!DisconnectReason::Unknown.is_terminal());
    }
}
