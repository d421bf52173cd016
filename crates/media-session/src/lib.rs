//! Huddle media session core.
//!
//! Drives one client's participation in a real-time meeting room on top of
//! an external WebRTC SDK:
//!
//! - `connection` - connect/disconnect state machine with token acquisition
//!   and a single scheduled reconnect
//! - `track_guard` - authoritative mute intent, enforced at both mute layers
//! - `device_health` - microphone health checks and track replacement
//! - `screen_share` - permission protocol and share lifecycle
//! - `remote_sync` - roster of remote participants and their tracks
//! - `signaling` - data-channel envelopes and the ordered outbox
//! - `session` - the `MediaSession` facade composing all of the above
//!
//! The SDK is reached only through the traits in `transport`.

#![warn(clippy::pedantic)]

pub mod config;
pub mod connection;
pub(crate) mod context;
pub mod device_health;
pub mod directory;
pub mod errors;
pub(crate) mod event_pump;
pub mod events;
pub(crate) mod in_flight;
pub(crate) mod maintenance;
pub mod observability;
pub mod participant_key;
pub mod remote_sync;
pub mod screen_share;
pub mod session;
pub mod signaling;
pub mod track_guard;
pub mod transport;
pub mod types;

pub use config::{Config, ConfigError, SessionTimings};
pub use connection::{
    ConnectionManager, DisconnectKind, DisconnectOutcome, SessionHandle, TokenProvider,
};
pub use directory::{DirectoryEntry, EmptyDirectory, ParticipantDirectory};
pub use errors::{CaptureError, SessionError};
pub use events::{ChatMessage, DeviceNotice, SessionEvent, TerminalReason};
pub use participant_key::ParticipantKey;
pub use session::{MediaSession, MediaSessionBuilder, ShareToggle};
pub use types::{
    ConnectionStatus, DisplaySurface, JoinOptions, MediaKind, ParticipantRole, ReadyState,
    TrackSource,
};
