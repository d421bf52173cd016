//! Capture devices backed by `FakeTrack`s, with failure injection and
//! scripted display-picker outcomes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use media_session::transport::{
    DisplayCapture, DisplayCaptureRequest, MediaDevices, SharedTrack,
};
use media_session::{CaptureError, DisplaySurface, TrackSource};
use tokio::sync::broadcast;

use crate::fake_track::FakeTrack;

/// What the display picker returns on the next `capture_display`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisplayScenario {
    /// Browser tab with a live system-audio track.
    TabWithAudio,
    /// Tab with an audio track that never became live.
    TabAudioNotLive,
    /// Tab picked but the audio checkbox left off.
    TabWithoutAudio,
    /// Application window, which carries no audio.
    Window,
    /// Entire screen, which carries no audio.
    Monitor,
    /// The picker failed.
    Fail(CaptureError),
}

#[derive(Default)]
struct DevicesInner {
    default_input: Option<String>,
    microphone_error: Option<CaptureError>,
    camera_error: Option<CaptureError>,
    microphones: Vec<Arc<FakeTrack>>,
    cameras: Vec<Arc<FakeTrack>>,
    displays: Vec<DisplayCapturedTracks>,
    display_requests: Vec<DisplayCaptureRequest>,
}

/// Tracks handed out by one `capture_display` call.
#[derive(Debug, Clone)]
pub struct DisplayCapturedTracks {
    pub video: Arc<FakeTrack>,
    pub audio: Option<Arc<FakeTrack>>,
}

pub struct FakeDevices {
    inner: Mutex<DevicesInner>,
    scenario: Mutex<DisplayScenario>,
    changes: broadcast::Sender<()>,
}

impl FakeDevices {
    pub fn new() -> Arc<Self> {
        let (changes, _) = broadcast::channel(16);
        Arc::new(Self {
            inner: Mutex::new(DevicesInner {
                default_input: Some("default".to_string()),
                ..DevicesInner::default()
            }),
            scenario: Mutex::new(DisplayScenario::Window),
            changes,
        })
    }

    pub fn set_default_audio_input(&self, device_id: Option<&str>) {
        self.inner.lock().unwrap().default_input = device_id.map(str::to_string);
    }

    pub fn fail_microphone(&self, error: Option<CaptureError>) {
        self.inner.lock().unwrap().microphone_error = error;
    }

    pub fn fail_camera(&self, error: Option<CaptureError>) {
        self.inner.lock().unwrap().camera_error = error;
    }

    pub fn set_display_scenario(&self, scenario: DisplayScenario) {
        *self.scenario.lock().unwrap() = scenario;
    }

    /// Fire an OS device-change notification.
    pub fn trigger_device_change(&self) {
        let _ = self.changes.send(());
    }

    pub fn microphones(&self) -> Vec<Arc<FakeTrack>> {
        self.inner.lock().unwrap().microphones.clone()
    }

    pub fn last_microphone(&self) -> Option<Arc<FakeTrack>> {
        self.inner.lock().unwrap().microphones.last().cloned()
    }

    pub fn cameras(&self) -> Vec<Arc<FakeTrack>> {
        self.inner.lock().unwrap().cameras.clone()
    }

    pub fn last_camera(&self) -> Option<Arc<FakeTrack>> {
        self.inner.lock().unwrap().cameras.last().cloned()
    }

    pub fn displays(&self) -> Vec<DisplayCapturedTracks> {
        self.inner.lock().unwrap().displays.clone()
    }

    pub fn display_requests(&self) -> Vec<DisplayCaptureRequest> {
        self.inner.lock().unwrap().display_requests.clone()
    }
}

#[async_trait]
impl MediaDevices for FakeDevices {
    async fn default_audio_input(&self) -> Result<Option<String>, CaptureError> {
        Ok(self.inner.lock().unwrap().default_input.clone())
    }

    async fn create_microphone(&self, device_id: Option<&str>) -> Result<SharedTrack, CaptureError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.microphone_error.clone() {
            return Err(error);
        }
        let n = inner.microphones.len() + 1;
        let device = device_id
            .map(str::to_string)
            .or_else(|| inner.default_input.clone())
            .unwrap_or_else(|| "default".to_string());
        let track = FakeTrack::with_device(&format!("mic-{n}"), TrackSource::Microphone, &device);
        inner.microphones.push(Arc::clone(&track));
        Ok(track)
    }

    async fn create_camera(&self) -> Result<SharedTrack, CaptureError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.camera_error.clone() {
            return Err(error);
        }
        let n = inner.cameras.len() + 1;
        let track = FakeTrack::new(&format!("cam-{n}"), TrackSource::Camera);
        inner.cameras.push(Arc::clone(&track));
        Ok(track)
    }

    async fn capture_display(
        &self,
        request: DisplayCaptureRequest,
    ) -> Result<DisplayCapture, CaptureError> {
        let scenario = self.scenario.lock().unwrap().clone();
        let mut inner = self.inner.lock().unwrap();
        inner.display_requests.push(request);
        let n = inner.displays.len() + 1;

        let video_id = format!("screen-{n}");
        let audio_id = format!("screen-audio-{n}");
        let (video, audio) = match scenario {
            DisplayScenario::Fail(error) => return Err(error),
            DisplayScenario::TabWithAudio => (
                FakeTrack::display(&video_id, TrackSource::ScreenShare, DisplaySurface::Tab),
                Some(FakeTrack::display(
                    &audio_id,
                    TrackSource::ScreenShareAudio,
                    DisplaySurface::Tab,
                )),
            ),
            DisplayScenario::TabAudioNotLive => {
                let audio =
                    FakeTrack::display(&audio_id, TrackSource::ScreenShareAudio, DisplaySurface::Tab);
                audio.set_not_ready();
                (
                    FakeTrack::display(&video_id, TrackSource::ScreenShare, DisplaySurface::Tab),
                    Some(audio),
                )
            }
            DisplayScenario::TabWithoutAudio => (
                FakeTrack::display(&video_id, TrackSource::ScreenShare, DisplaySurface::Tab),
                None,
            ),
            DisplayScenario::Window => (
                FakeTrack::display(&video_id, TrackSource::ScreenShare, DisplaySurface::Window),
                None,
            ),
            DisplayScenario::Monitor => (
                FakeTrack::display(&video_id, TrackSource::ScreenShare, DisplaySurface::Monitor),
                None,
            ),
        };

        inner.displays.push(DisplayCapturedTracks {
            video: Arc::clone(&video),
            audio: audio.clone(),
        });
        Ok(DisplayCapture {
            video,
            audio: audio.map(|a| a as SharedTrack),
        })
    }

    fn device_changes(&self) -> broadcast::Receiver<()> {
        self.changes.subscribe()
    }
}
