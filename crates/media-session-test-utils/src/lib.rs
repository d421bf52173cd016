//! # Media Session Test Utilities
//!
//! Fakes for the SDK seams of the media session core and shared fixtures,
//! so integration tests run without a browser or an SFU.
//!
//! ## Modules
//!
//! - `fake_transport` - in-memory `RoomTransport` that records every call
//! - `fake_devices` - `MediaDevices` with failure injection and scripted
//!   display-picker outcomes
//! - `fake_track` - `LocalMediaTrack` with controllable hardware state
//! - `mock_tokens` - scripted `TokenProvider`
//! - `fixtures` - grants, roster builders, fast timings, a static directory
//!
//! ## Usage
//!
//! ```rust,ignore
//! use media_session::MediaSession;
//! use media_session_test_utils::*;
//!
//! #[tokio::test(start_paused = true)]
//! async fn test_example() {
//!     let harness = SessionHarness::new();
//!     harness.session.connect(participant_options("42")).await.unwrap();
//!     assert_eq!(harness.transport.connect_count(), 1);
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use media_session::{MediaSession, ParticipantDirectory, SessionEvent, SessionTimings};
use tokio::sync::broadcast;

pub mod fake_devices;
pub mod fake_track;
pub mod fake_transport;
pub mod fixtures;
pub mod mock_tokens;

pub use fake_devices::{DisplayCapturedTracks, DisplayScenario, FakeDevices};
pub use fake_track::{FakeTrack, FakeTrackState};
pub use fake_transport::{FakeTransport, PublishRecord, SentData, TransportCall};
pub use fixtures::*;
pub use mock_tokens::MockTokenProvider;

/// A `MediaSession` wired to fresh fakes.
pub struct SessionHarness {
    pub session: MediaSession,
    pub transport: Arc<FakeTransport>,
    pub devices: Arc<FakeDevices>,
    pub tokens: Arc<MockTokenProvider>,
}

impl SessionHarness {
    /// Harness with `fast_timings()` and no directory.
    pub fn new() -> Self {
        Self::with_timings(fast_timings())
    }

    pub fn with_timings(timings: SessionTimings) -> Self {
        Self::build(timings, None)
    }

    pub fn with_directory(directory: Arc<dyn ParticipantDirectory>) -> Self {
        Self::build(fast_timings(), Some(directory))
    }

    fn build(timings: SessionTimings, directory: Option<Arc<dyn ParticipantDirectory>>) -> Self {
        let transport = FakeTransport::new();
        let devices = FakeDevices::new();
        let tokens = MockTokenProvider::new();

        let mut builder = MediaSession::builder(transport.clone(), devices.clone(), tokens.clone())
            .timings(timings);
        if let Some(directory) = directory {
            builder = builder.directory(directory);
        }

        Self {
            session: builder.build(),
            transport,
            devices,
            tokens,
        }
    }
}

impl Default for SessionHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// Upper bound for `wait_for_event`. Virtual time under `start_paused`.
pub const EVENT_WAIT: Duration = Duration::from_secs(30);

/// Next event matching `predicate`, skipping the rest. `None` on timeout.
pub async fn wait_for_event<F>(
    events: &mut broadcast::Receiver<SessionEvent>,
    mut predicate: F,
) -> Option<SessionEvent>
where
    F: FnMut(&SessionEvent) -> bool,
{
    let search = async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    tokio::time::timeout(EVENT_WAIT, search).await.ok().flatten()
}

/// Let spawned tasks (outbox worker, event pump) drain.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}
