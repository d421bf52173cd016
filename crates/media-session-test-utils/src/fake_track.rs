//! In-memory local track with both mute layers and a controllable hardware
//! state.

use std::sync::{Arc, Mutex};

use media_session::transport::LocalMediaTrack;
use media_session::{DisplaySurface, ReadyState, TrackSource};

/// Observable state of a `FakeTrack`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeTrackState {
    pub muted: bool,
    pub capture_enabled: bool,
    pub ready: ReadyState,
    pub device_id: Option<String>,
    pub source_muted: bool,
    pub display_surface: Option<DisplaySurface>,
    pub stopped: bool,
}

#[derive(Debug)]
pub struct FakeTrack {
    id: String,
    source: TrackSource,
    state: Mutex<FakeTrackState>,
}

impl FakeTrack {
    /// A live, unmuted track on the `default` device.
    pub fn new(id: &str, source: TrackSource) -> Arc<Self> {
        Self::build(id, source, Some("default".to_string()), None)
    }

    pub fn with_device(id: &str, source: TrackSource, device_id: &str) -> Arc<Self> {
        Self::build(id, source, Some(device_id.to_string()), None)
    }

    pub fn display(id: &str, source: TrackSource, surface: DisplaySurface) -> Arc<Self> {
        Self::build(id, source, None, Some(surface))
    }

    fn build(
        id: &str,
        source: TrackSource,
        device_id: Option<String>,
        display_surface: Option<DisplaySurface>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            source,
            state: Mutex::new(FakeTrackState {
                muted: false,
                capture_enabled: true,
                ready: ReadyState::Live,
                device_id,
                source_muted: false,
                display_surface,
                stopped: false,
            }),
        })
    }

    pub fn state(&self) -> FakeTrackState {
        self.state.lock().unwrap().clone()
    }

    /// Simulate the SDK or browser changing both flags behind our back.
    pub fn drift(&self, muted: bool, capture_enabled: bool) {
        let mut state = self.state.lock().unwrap();
        state.muted = muted;
        state.capture_enabled = capture_enabled;
    }

    /// Simulate the device being unplugged.
    pub fn end(&self) {
        self.state.lock().unwrap().ready = ReadyState::Ended;
    }

    /// A track that exists but has not started producing media.
    pub fn set_not_ready(&self) {
        self.state.lock().unwrap().ready = ReadyState::Ended;
    }

    pub fn set_device_id(&self, device_id: &str) {
        self.state.lock().unwrap().device_id = Some(device_id.to_string());
    }

    pub fn set_source_muted(&self, source_muted: bool) {
        self.state.lock().unwrap().source_muted = source_muted;
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().unwrap().stopped
    }
}

impl LocalMediaTrack for FakeTrack {
    fn id(&self) -> String {
        self.id.clone()
    }

    fn source(&self) -> TrackSource {
        self.source
    }

    fn is_muted(&self) -> bool {
        self.state.lock().unwrap().muted
    }

    fn set_muted(&self, muted: bool) {
        self.state.lock().unwrap().muted = muted;
    }

    fn is_capture_enabled(&self) -> bool {
        self.state.lock().unwrap().capture_enabled
    }

    fn set_capture_enabled(&self, enabled: bool) {
        let mut state = self.state.lock().unwrap();
        if !state.stopped {
            state.capture_enabled = enabled;
        }
    }

    fn ready_state(&self) -> ReadyState {
        self.state.lock().unwrap().ready
    }

    fn device_id(&self) -> Option<String> {
        self.state.lock().unwrap().device_id.clone()
    }

    fn is_source_muted(&self) -> bool {
        self.state.lock().unwrap().source_muted
    }

    fn display_surface(&self) -> Option<DisplaySurface> {
        self.state.lock().unwrap().display_surface
    }

    fn stop(&self) {
        let mut state = self.state.lock().unwrap();
        state.stopped = true;
        state.capture_enabled = false;
        state.ready = ReadyState::Ended;
    }
}
