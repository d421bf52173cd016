//! `ScreenShareManager` - local share lifecycle and the remote share view.
//!
//! Local share states:
//!
//! ```text
//! Idle -> Requesting -> Publishing -> Active -> Stopping -> Idle
//! ```
//!
//! `start` and `stop` are serialized by the state: a second `start` while
//! requesting, publishing or stopping fails with `Busy`, and stopping the
//! local share mid-publish is refused. A force-stop from a host that arrives
//! mid-publish is deferred until the publish completes.
//!
//! The remote view tracks at most one share. A screen-share publication
//! that originates from the local participant (matched by identity, sid or
//! user id) is never subscribed, so its audio can never be played back.

use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::context::SessionContext;
use crate::errors::SessionError;
use crate::events::SessionEvent;
use crate::in_flight::InFlight;
use crate::participant_key::ParticipantKey;
use crate::remote_sync::MediaHandle;
use crate::screen_share::permission::ScreenSharePermission;
use crate::signaling::{now_millis, SignalMessage};
use crate::transport::{DisplayCaptureRequest, PublicationInfo, SharedTrack, TrackSid};
use crate::types::{DisplaySurface, ReadyState, TrackSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShareState {
    #[default]
    Idle,
    /// Waiting for host approval.
    Requesting,
    /// Capture acquired, tracks being published.
    Publishing,
    Active,
    Stopping,
}

/// How screen audio was handled for a share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioStrategy {
    /// A live system-audio track is published with the video.
    SystemAudio,
    /// The capture surface carries no audio (window or entire screen).
    NoAudioFallback,
    /// An audio track was returned but never became live.
    AudioNotReady,
    /// Audio was expected but could not be captured or published.
    SystemAudioFailed,
}

impl AudioStrategy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            AudioStrategy::SystemAudio => "system_audio",
            AudioStrategy::NoAudioFallback => "no_audio_fallback",
            AudioStrategy::AudioNotReady => "audio_not_ready",
            AudioStrategy::SystemAudioFailed => "system_audio_failed",
        }
    }

    #[must_use]
    pub const fn has_system_audio(self) -> bool {
        matches!(self, AudioStrategy::SystemAudio)
    }

    /// Instruction for the user when screen audio is missing.
    #[must_use]
    pub const fn user_hint(self) -> Option<&'static str> {
        match self {
            AudioStrategy::SystemAudio => None,
            AudioStrategy::NoAudioFallback
            | AudioStrategy::AudioNotReady
            | AudioStrategy::SystemAudioFailed => {
                Some("To share audio, select a browser tab and check Share tab audio")
            }
        }
    }
}

/// Result of a successful `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareStartResult {
    pub audio_strategy: AudioStrategy,
    pub has_system_audio: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalShareInfo {
    pub audio_strategy: AudioStrategy,
    pub has_system_audio: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteShareInfo {
    pub sharer_identity: String,
    pub video_sid: Option<TrackSid>,
    pub audio_sid: Option<TrackSid>,
    pub has_system_audio: bool,
}

/// Screen-share state exposed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScreenShareSnapshot {
    pub state: ShareState,
    pub local: Option<LocalShareInfo>,
    pub remote: Option<RemoteShareInfo>,
}

impl ScreenShareSnapshot {
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.local.is_some() || self.remote.is_some()
    }
}

/// Result of a late-joiner discovery pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    /// Another pass ran too recently.
    Throttled,
    AlreadyRunning,
    NoShare,
    Found { sharer_identity: String },
}

struct LocalShare {
    video: SharedTrack,
    video_sid: Option<TrackSid>,
    audio: Option<SharedTrack>,
    audio_sid: Option<TrackSid>,
    strategy: AudioStrategy,
}

struct RemoteShare {
    sharer_identity: String,
    video_sid: Option<TrackSid>,
    audio_sid: Option<TrackSid>,
    video: Option<Arc<MediaHandle>>,
    audio: Option<Arc<MediaHandle>>,
}

impl RemoteShare {
    fn new(sharer_identity: &str) -> Self {
        Self {
            sharer_identity: sharer_identity.to_string(),
            video_sid: None,
            audio_sid: None,
            video: None,
            audio: None,
        }
    }

    fn release(&mut self) {
        for handle in [self.video.take(), self.audio.take()].into_iter().flatten() {
            handle.release();
        }
    }

    fn info(&self) -> RemoteShareInfo {
        RemoteShareInfo {
            sharer_identity: self.sharer_identity.clone(),
            video_sid: self.video_sid.clone(),
            audio_sid: self.audio_sid.clone(),
            has_system_audio: self.audio_sid.is_some(),
        }
    }
}

#[derive(Default)]
struct ShareInner {
    state: ShareState,
    local: Option<LocalShare>,
    remote: Option<RemoteShare>,
    pending_force_stop: Option<String>,
    last_discovery: Option<Instant>,
    /// Bumped by every start and by teardown.
    epoch: u64,
}

impl ShareInner {
    fn snapshot(&self) -> ScreenShareSnapshot {
        ScreenShareSnapshot {
            state: self.state,
            local: self.local.as_ref().map(|l| LocalShareInfo {
                audio_strategy: l.strategy,
                has_system_audio: l.strategy.has_system_audio(),
            }),
            remote: self.remote.as_ref().map(RemoteShare::info),
        }
    }
}

/// Undoes a `start` that did not complete: resets the state and releases
/// whatever capture had acquired. Disarmed once the share is stored.
struct StartGuard<'a> {
    manager: &'a ScreenShareManager,
    epoch: u64,
    tracks: Vec<SharedTrack>,
    sids: Vec<TrackSid>,
    armed: bool,
}

impl StartGuard<'_> {
    fn acquired(&mut self, track: &SharedTrack) {
        self.tracks.push(Arc::clone(track));
    }

    fn published(&mut self, sid: &TrackSid) {
        self.sids.push(sid.clone());
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        {
            let mut inner = self.manager.lock();
            if inner.epoch == self.epoch {
                inner.state = ShareState::Idle;
                inner.pending_force_stop = None;
            }
        }
        for track in &self.tracks {
            track.stop();
        }
        if self.sids.is_empty() {
            return;
        }

        let sids = std::mem::take(&mut self.sids);
        warn!(
            target: "ms.screen_share",
            tracks = sids.len(),
            "Screen share start abandoned, unpublishing its tracks"
        );
        let transport = Arc::clone(&self.manager.ctx.transport);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    for sid in sids {
                        if let Err(e) = transport.unpublish_track(&sid).await {
                            warn!(target: "ms.screen_share", error = %e, "Failed to unpublish screen track");
                        }
                    }
                });
            }
            Err(_) => {
                warn!(target: "ms.screen_share", "No runtime left to unpublish screen tracks");
            }
        }
    }
}

pub struct ScreenShareManager {
    ctx: Arc<SessionContext>,
    inner: Mutex<ShareInner>,
    discovery_running: AtomicBool,
}

impl ScreenShareManager {
    pub(crate) fn new(ctx: Arc<SessionContext>) -> Self {
        Self {
            ctx,
            inner: Mutex::new(ShareInner::default()),
            discovery_running: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ShareInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn set_state(&self, state: ShareState) {
        self.lock().state = state;
    }

    fn publish_snapshot(&self) {
        let snapshot = self.snapshot();
        self.ctx.emit(SessionEvent::ScreenShareChanged(snapshot));
    }

    #[must_use]
    pub fn snapshot(&self) -> ScreenShareSnapshot {
        self.lock().snapshot()
    }

    #[must_use]
    pub fn state(&self) -> ShareState {
        self.lock().state
    }

    #[must_use]
    pub fn has_local_share(&self) -> bool {
        self.lock().local.is_some()
    }

    /// A local publish is running and must not be interrupted.
    #[must_use]
    pub fn publish_in_progress(&self) -> bool {
        self.lock().state == ShareState::Publishing
    }

    /// Playable handle of the remote share for `source`.
    #[must_use]
    pub fn remote_handle(&self, source: TrackSource) -> Option<Arc<MediaHandle>> {
        let inner = self.lock();
        let remote = inner.remote.as_ref()?;
        let handle = match source {
            TrackSource::ScreenShare => remote.video.as_ref(),
            TrackSource::ScreenShareAudio => remote.audio.as_ref(),
            TrackSource::Camera | TrackSource::Microphone => None,
        }?;
        handle.is_playable().then(|| Arc::clone(handle))
    }

    /// Start sharing the screen.
    ///
    /// # Errors
    ///
    /// - `Busy` if a start or stop is already running
    /// - permission errors for participants (see `request_permission`)
    /// - `Capture` if the display picker failed, with a distinct message per cause
    /// - `Publish` if the video track could not be published
    /// - `NotConnected` if the session ended while the share was starting
    ///
    /// Dropping the future part way returns the manager to `Idle` and
    /// releases the tracks acquired so far.
    #[instrument(skip_all, name = "ms.screen_share.start")]
    pub async fn start(
        &self,
        permission: &ScreenSharePermission,
    ) -> Result<ShareStartResult, SessionError> {
        let (previous, epoch) = {
            let mut inner = self.lock();
            if matches!(
                inner.state,
                ShareState::Requesting | ShareState::Publishing | ShareState::Stopping
            ) {
                return Err(SessionError::Busy(
                    "Screen share start is already in progress".to_string(),
                ));
            }
            inner.state = ShareState::Requesting;
            inner.pending_force_stop = None;
            inner.epoch = inner.epoch.wrapping_add(1);
            (inner.local.take(), inner.epoch)
        };
        let mut guard = StartGuard {
            manager: self,
            epoch,
            tracks: Vec::new(),
            sids: Vec::new(),
            armed: true,
        };

        if let Some(previous) = previous {
            debug!(target: "ms.screen_share", "Clearing previous local share before start");
            self.release_local(previous).await;
        }

        permission.request_permission().await?;

        {
            let mut inner = self.lock();
            if inner.epoch != epoch || !self.ctx.handle.is_active() {
                return Err(SessionError::NotConnected);
            }
            inner.state = ShareState::Publishing;
        }
        match self.capture_and_publish(&mut guard).await {
            Ok(local) => {
                let result = ShareStartResult {
                    audio_strategy: local.strategy,
                    has_system_audio: local.strategy.has_system_audio(),
                };
                let stored = {
                    let mut inner = self.lock();
                    let live = inner.epoch == epoch
                        && inner.state == ShareState::Publishing
                        && self.ctx.handle.is_active();
                    if live {
                        inner.local = Some(local);
                        inner.state = ShareState::Active;
                        Some(inner.pending_force_stop.take())
                    } else {
                        None
                    }
                };
                // Session torn down mid-publish: the guard releases the capture.
                let Some(deferred_stop) = stored else {
                    info!(target: "ms.screen_share", "Session ended while screen share was starting");
                    return Err(SessionError::NotConnected);
                };
                guard.disarm();
                info!(
                    target: "ms.screen_share",
                    audio_strategy = result.audio_strategy.as_str(),
                    "Screen share started"
                );
                self.publish_snapshot();

                if let Some(requested_by) = deferred_stop {
                    info!(target: "ms.screen_share", "Running force stop deferred during publish");
                    if let Err(e) = self.stop_own(&requested_by).await {
                        warn!(target: "ms.screen_share", error = %e, "Deferred force stop failed");
                    }
                }
                Ok(result)
            }
            Err(e) => {
                warn!(target: "ms.screen_share", error = %e, "Screen share start failed");
                Err(e)
            }
        }
    }

    /// Acquire the display, pick the audio strategy and publish video then audio.
    /// Everything acquired is stopped again on failure, by the guard at the latest.
    async fn capture_and_publish(
        &self,
        guard: &mut StartGuard<'_>,
    ) -> Result<LocalShare, SessionError> {
        let capture = self
            .ctx
            .devices
            .capture_display(DisplayCaptureRequest {
                video: true,
                system_audio: true,
            })
            .await?;

        let video = capture.video;
        guard.acquired(&video);
        let (mut audio, mut strategy) = match capture.audio {
            Some(track) if track.ready_state() == ReadyState::Live => {
                guard.acquired(&track);
                (Some(track), AudioStrategy::SystemAudio)
            }
            Some(track) => {
                track.stop();
                (None, AudioStrategy::AudioNotReady)
            }
            None if video.display_surface() == Some(DisplaySurface::Tab) => {
                (None, AudioStrategy::SystemAudioFailed)
            }
            None => (None, AudioStrategy::NoAudioFallback),
        };

        let video_sid = match self.ctx.transport.publish_track(Arc::clone(&video)).await {
            Ok(sid) => {
                guard.published(&sid);
                sid
            }
            Err(e) => {
                video.stop();
                if let Some(audio) = audio {
                    audio.stop();
                }
                return Err(SessionError::Publish(e.to_string()));
            }
        };

        let mut audio_sid = None;
        if let Some(track) = audio.take() {
            // Video settles before audio joins it.
            tokio::time::sleep(self.ctx.timings.share_publish_settle).await;
            if !self.ctx.handle.is_active() {
                return Err(SessionError::NotConnected);
            }
            match self.ctx.transport.publish_track(Arc::clone(&track)).await {
                Ok(sid) => {
                    guard.published(&sid);
                    audio_sid = Some(sid);
                    audio = Some(track);
                }
                Err(e) => {
                    warn!(target: "ms.screen_share", error = %e, "Screen audio publish failed, sharing video only");
                    track.stop();
                    strategy = AudioStrategy::SystemAudioFailed;
                }
            }
        }

        Ok(LocalShare {
            video,
            video_sid: Some(video_sid),
            audio,
            audio_sid,
            strategy,
        })
    }

    /// Unpublish and stop the tracks of a local share.
    async fn release_local(&self, share: LocalShare) {
        for sid in [share.video_sid, share.audio_sid].into_iter().flatten() {
            if let Err(e) = self.ctx.transport.unpublish_track(&sid).await {
                warn!(target: "ms.screen_share", error = %e, "Failed to unpublish screen track");
            }
        }
        share.video.stop();
        if let Some(audio) = share.audio {
            audio.stop();
        }
    }

    /// Stop the local share (`target` is `None` or names us) or force-stop
    /// another participant's share.
    ///
    /// # Errors
    ///
    /// - `Busy` when the local share is still publishing
    /// - `PermissionDenied` when a participant tries to stop someone else
    #[instrument(skip_all, name = "ms.screen_share.stop")]
    pub async fn stop(&self, target: Option<&str>) -> Result<bool, SessionError> {
        match target {
            Some(target) if !self.ctx.handle.local.matches_alias(target) => {
                self.force_stop_remote(target).await
            }
            _ => {
                let by = self.ctx.local_identity().to_string();
                self.stop_own(&by).await
            }
        }
    }

    async fn stop_own(&self, stopped_by: &str) -> Result<bool, SessionError> {
        let local = {
            let mut inner = self.lock();
            match inner.state {
                ShareState::Requesting | ShareState::Publishing => {
                    return Err(SessionError::Busy(
                        "Screen share publish is in progress".to_string(),
                    ));
                }
                ShareState::Stopping => return Ok(false),
                ShareState::Idle | ShareState::Active => {}
            }
            let Some(local) = inner.local.take() else {
                inner.state = ShareState::Idle;
                return Ok(false);
            };
            inner.state = ShareState::Stopping;
            local
        };

        self.release_local(local).await;

        let message = SignalMessage::ScreenShareStopped {
            sharer_identity: self.ctx.local_identity().to_string(),
            stopped_by: stopped_by.to_string(),
            timestamp: now_millis(),
        };
        if let Err(e) = self.ctx.outbox.send(&message, Vec::new()).await {
            warn!(target: "ms.screen_share", error = %e, "Failed to broadcast screen share stop");
        }

        self.set_state(ShareState::Idle);
        info!(target: "ms.screen_share", stopped_by = %stopped_by, "Screen share stopped");
        self.publish_snapshot();
        Ok(true)
    }

    /// Directed force-stop to the target plus a global stop broadcast.
    async fn force_stop_remote(&self, target: &str) -> Result<bool, SessionError> {
        if !self.ctx.is_privileged() {
            return Err(SessionError::PermissionDenied(
                "Only hosts and co-hosts can stop another participant's screen share".to_string(),
            ));
        }

        let identity = self
            .ctx
            .remote
            .resolve(target)
            .unwrap_or_else(|| target.to_string());
        let requested_by = self.ctx.local_identity().to_string();

        let force_stop = SignalMessage::ForceStopScreenShare {
            target_identity: identity.clone(),
            requested_by: requested_by.clone(),
            timestamp: now_millis(),
        };
        self.ctx
            .outbox
            .send(&force_stop, vec![identity.clone()])
            .await?;

        let stopped = SignalMessage::ScreenShareStopped {
            sharer_identity: identity.clone(),
            stopped_by: requested_by,
            timestamp: now_millis(),
        };
        self.ctx.outbox.send(&stopped, Vec::new()).await?;

        info!(target: "ms.screen_share", target_identity = %identity, "Force stop sent");
        self.clear_remote_if(&identity);
        Ok(true)
    }

    /// A host asked us to stop sharing.
    pub(crate) async fn handle_force_stop(&self, target_identity: &str, requested_by: &str) {
        if !self.ctx.handle.local.matches_alias(target_identity) {
            return;
        }
        {
            let mut inner = self.lock();
            if matches!(inner.state, ShareState::Publishing | ShareState::Requesting) {
                info!(target: "ms.screen_share", "Force stop deferred until publish completes");
                inner.pending_force_stop = Some(requested_by.to_string());
                return;
            }
        }
        if let Err(e) = self.stop_own(requested_by).await {
            warn!(target: "ms.screen_share", error = %e, "Force stop failed");
        }
    }

    /// Someone broadcast that a share ended.
    pub(crate) fn handle_share_stopped(&self, sharer_identity: &str) {
        if self.ctx.handle.local.matches_alias(sharer_identity) {
            return;
        }
        self.clear_remote_if(sharer_identity);
    }

    fn clear_remote_if(&self, identity: &str) -> bool {
        let cleared = {
            let mut inner = self.lock();
            let matches = inner.remote.as_ref().is_some_and(|r| {
                r.sharer_identity == identity
                    || self.ctx.key_for(&r.sharer_identity).matches_alias(identity)
            });
            if matches {
                if let Some(mut remote) = inner.remote.take() {
                    remote.release();
                }
            }
            matches
        };
        if cleared {
            debug!(target: "ms.screen_share", sharer = %identity, "Remote share cleared");
            self.publish_snapshot();
        }
        cleared
    }

    /// Whether a publication by `key` would be our own share echoing back.
    fn is_own(&self, key: &ParticipantKey) -> bool {
        self.ctx.is_local(key)
    }

    /// A remote screen-share track was published: subscribe unless it is ours.
    pub(crate) async fn on_track_published(&self, identity: &str, publication: &PublicationInfo) {
        if !publication.source.is_screen_share() {
            return;
        }
        if self.is_own(&self.ctx.key_for(identity)) {
            debug!(target: "ms.screen_share", "Own screen share publication ignored");
            return;
        }

        self.record_remote_publication(identity, publication);
        if !publication.subscribed {
            if let Err(e) = self
                .ctx
                .transport
                .set_subscribed(identity, &publication.sid, true)
                .await
            {
                warn!(target: "ms.screen_share", error = %e, "Failed to subscribe to screen share");
            }
        }
        self.publish_snapshot();
    }

    /// Last published wins: a new sharer replaces the previous remote share.
    fn record_remote_publication(&self, identity: &str, publication: &PublicationInfo) {
        let mut inner = self.lock();
        if inner
            .remote
            .as_ref()
            .is_some_and(|r| r.sharer_identity != identity)
        {
            if let Some(mut previous) = inner.remote.take() {
                previous.release();
            }
        }
        let remote = inner
            .remote
            .get_or_insert_with(|| RemoteShare::new(identity));
        match publication.source {
            TrackSource::ScreenShare => remote.video_sid = Some(publication.sid.clone()),
            TrackSource::ScreenShareAudio => remote.audio_sid = Some(publication.sid.clone()),
            TrackSource::Camera | TrackSource::Microphone => {}
        }
    }

    /// Materialize a subscribed remote screen-share track.
    ///
    /// Returns `None` for our own tracks, which are unsubscribed instead.
    pub(crate) async fn on_track_subscribed(
        &self,
        identity: &str,
        publication: &PublicationInfo,
    ) -> Option<Arc<MediaHandle>> {
        if !publication.source.is_screen_share() {
            return None;
        }
        if self.is_own(&self.ctx.key_for(identity)) {
            warn!(target: "ms.screen_share", "Own screen share track subscribed, unsubscribing");
            if let Err(e) = self
                .ctx
                .transport
                .set_subscribed(identity, &publication.sid, false)
                .await
            {
                warn!(target: "ms.screen_share", error = %e, "Failed to unsubscribe own screen share");
            }
            return None;
        }

        let handle = self.materialize(identity, publication);
        self.publish_snapshot();
        Some(handle)
    }

    fn materialize(&self, identity: &str, publication: &PublicationInfo) -> Arc<MediaHandle> {
        self.record_remote_publication(identity, publication);
        let mut inner = self.lock();
        let remote = inner
            .remote
            .get_or_insert_with(|| RemoteShare::new(identity));
        let slot = match publication.source {
            TrackSource::ScreenShareAudio => &mut remote.audio,
            _ => &mut remote.video,
        };
        if let Some(existing) = slot.as_ref() {
            if existing.sid() == publication.sid && !existing.is_released() {
                return Arc::clone(existing);
            }
        }
        let handle = MediaHandle::new(
            publication.sid.clone(),
            identity.to_string(),
            publication.source,
            publication.muted,
        );
        if let Some(previous) = slot.replace(Arc::clone(&handle)) {
            previous.release();
        }
        handle
    }

    pub(crate) fn on_track_unsubscribed(&self, identity: &str, sid: &str) {
        let changed = {
            let mut inner = self.lock();
            let Some(remote) = inner.remote.as_mut() else {
                return;
            };
            if remote.sharer_identity != identity {
                return;
            }
            let mut changed = false;
            for slot in [&mut remote.video, &mut remote.audio] {
                if slot.as_ref().is_some_and(|h| h.sid() == sid) {
                    if let Some(handle) = slot.take() {
                        handle.release();
                        changed = true;
                    }
                }
            }
            changed
        };
        if changed {
            self.publish_snapshot();
        }
    }

    pub(crate) fn on_track_unpublished(&self, identity: &str, sid: &str) {
        self.on_track_unsubscribed(identity, sid);
        let video_gone = {
            let mut inner = self.lock();
            let Some(remote) = inner.remote.as_mut() else {
                return;
            };
            if remote.sharer_identity != identity {
                return;
            }
            if remote.audio_sid.as_deref() == Some(sid) {
                remote.audio_sid = None;
            }
            remote.video_sid.as_deref() == Some(sid)
        };
        if video_gone {
            self.clear_remote_if(identity);
        } else {
            self.publish_snapshot();
        }
    }

    pub(crate) fn on_track_muted(&self, identity: &str, sid: &str, muted: bool) {
        let inner = self.lock();
        let Some(remote) = inner.remote.as_ref() else {
            return;
        };
        if remote.sharer_identity != identity {
            return;
        }
        for handle in [remote.video.as_ref(), remote.audio.as_ref()]
            .into_iter()
            .flatten()
            .filter(|h| h.sid() == sid)
        {
            handle.set_silenced(muted);
        }
    }

    pub(crate) fn on_participant_left(&self, identity: &str) {
        self.clear_remote_if(identity);
    }

    /// Late-joiner discovery: adopt a share already running in the room.
    ///
    /// Throttled and guarded against re-entry, so overlapping calls never
    /// process the roster twice.
    #[instrument(skip_all, name = "ms.screen_share.discover")]
    pub async fn check_for_existing_share(&self) -> DiscoveryOutcome {
        let Some(_running) = InFlight::try_acquire(&self.discovery_running) else {
            return DiscoveryOutcome::AlreadyRunning;
        };

        {
            let mut inner = self.lock();
            let throttle = self.ctx.timings.share_discovery_throttle;
            if inner
                .last_discovery
                .is_some_and(|last| last.elapsed() < throttle)
            {
                return DiscoveryOutcome::Throttled;
            }
            inner.last_discovery = Some(Instant::now());
        }

        for participant in self.ctx.transport.remote_participants() {
            if self.is_own(&ParticipantKey::from_remote(&participant)) {
                continue;
            }
            let Some(video) = participant
                .publications
                .iter()
                .find(|p| p.source == TrackSource::ScreenShare)
            else {
                continue;
            };
            let audio = participant
                .publications
                .iter()
                .find(|p| p.source == TrackSource::ScreenShareAudio);

            for publication in std::iter::once(video).chain(audio) {
                if !publication.subscribed {
                    if let Err(e) = self
                        .ctx
                        .transport
                        .set_subscribed(&participant.identity, &publication.sid, true)
                        .await
                    {
                        warn!(target: "ms.screen_share", error = %e, "Failed to subscribe to existing share");
                        continue;
                    }
                }
                self.materialize(&participant.identity, publication);
            }

            info!(
                target: "ms.screen_share",
                sharer = %participant.identity,
                "Existing screen share discovered"
            );
            self.publish_snapshot();
            return DiscoveryOutcome::Found {
                sharer_identity: participant.identity,
            };
        }

        DiscoveryOutcome::NoShare
    }

    /// The platform ended our capture (e.g. the browser's stop button).
    pub(crate) async fn check_capture_ended(&self) -> bool {
        let ended = {
            let inner = self.lock();
            inner.state == ShareState::Active
                && inner
                    .local
                    .as_ref()
                    .is_some_and(|l| l.video.ready_state() == ReadyState::Ended)
        };
        if !ended {
            return false;
        }
        info!(target: "ms.screen_share", "Screen capture ended by the platform");
        let by = self.ctx.local_identity().to_string();
        matches!(self.stop_own(&by).await, Ok(true))
    }

    /// Stop local capture and release remote handles. The room connection is
    /// closed by the caller.
    pub(crate) fn teardown(&self) {
        let mut inner = self.lock();
        if let Some(local) = inner.local.take() {
            local.video.stop();
            if let Some(audio) = local.audio {
                audio.stop();
            }
        }
        if let Some(mut remote) = inner.remote.take() {
            remote.release();
        }
        inner.state = ShareState::Idle;
        inner.pending_force_stop = None;
        inner.epoch = inner.epoch.wrapping_add(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::context::testing::test_context;
    use crate::transport::testing::StubTransport;
    use crate::types::ParticipantRole;

    fn publication(sid: &str, source: TrackSource) -> PublicationInfo {
        PublicationInfo {
            sid: sid.to_string(),
            source,
            muted: false,
            subscribed: true,
        }
    }

    #[test]
    fn test_audio_strategy_labels_and_hints() {
        assert_eq!(AudioStrategy::SystemAudio.as_str(), "system_audio");
        assert_eq!(AudioStrategy::NoAudioFallback.as_str(), "no_audio_fallback");
        assert!(AudioStrategy::SystemAudio.user_hint().is_none());
        assert!(AudioStrategy::SystemAudioFailed
            .user_hint()
            .unwrap()
            .contains("Share tab audio"));
        assert!(!AudioStrategy::AudioNotReady.has_system_audio());
    }

    #[tokio::test(start_paused = true)]
    async fn test_own_screen_audio_is_never_materialized() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-1", ParticipantRole::Host, transport.clone());
        let manager = ScreenShareManager::new(ctx);

        // Same user id under another identity prefix
        for identity in ["user-1", "user_1", "participant-1"] {
            let handle = manager
                .on_track_subscribed(identity, &publication("TR_a", TrackSource::ScreenShareAudio))
                .await;
            assert!(handle.is_none(), "{identity} echoed back");
        }
        assert!(manager.snapshot().remote.is_none());

        let subscriptions = transport.subscriptions.lock().unwrap().clone();
        assert!(subscriptions.iter().all(|(_, _, subscribed)| !subscribed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_share_last_published_wins() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-1", ParticipantRole::Participant, transport);
        let manager = ScreenShareManager::new(ctx);

        let first = manager
            .on_track_subscribed("user-2", &publication("TR_v2", TrackSource::ScreenShare))
            .await
            .unwrap();
        manager
            .on_track_subscribed("user-3", &publication("TR_v3", TrackSource::ScreenShare))
            .await
            .unwrap();

        assert!(first.is_released());
        let remote = manager.snapshot().remote.unwrap();
        assert_eq!(remote.sharer_identity, "user-3");
        assert!(manager.remote_handle(TrackSource::ScreenShare).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unpublish_of_video_clears_remote_share() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-1", ParticipantRole::Participant, transport);
        let manager = ScreenShareManager::new(ctx);

        let video = manager
            .on_track_subscribed("user-2", &publication("TR_v", TrackSource::ScreenShare))
            .await
            .unwrap();
        manager
            .on_track_subscribed("user-2", &publication("TR_a", TrackSource::ScreenShareAudio))
            .await
            .unwrap();
        assert!(manager.snapshot().remote.unwrap().has_system_audio);

        manager.on_track_unpublished("user-2", "TR_a");
        assert!(!manager.snapshot().remote.unwrap().has_system_audio);

        manager.on_track_unpublished("user-2", "TR_v");
        assert!(manager.snapshot().remote.is_none());
        assert!(video.is_released());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_broadcast_clears_remote_share() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-1", ParticipantRole::Participant, transport);
        let manager = ScreenShareManager::new(ctx);

        manager
            .on_track_subscribed("user-2", &publication("TR_v", TrackSource::ScreenShare))
            .await;
        manager.handle_share_stopped("user-2");
        assert!(!manager.snapshot().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn test_participant_cannot_force_stop_others() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-1", ParticipantRole::Participant, transport);
        let manager = ScreenShareManager::new(ctx);

        let result = manager.stop(Some("user-2")).await;
        assert!(matches!(result, Err(SessionError::PermissionDenied(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_without_share_is_noop() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-1", ParticipantRole::Host, transport.clone());
        let manager = ScreenShareManager::new(ctx);

        assert!(!manager.stop(None).await.unwrap());
        assert!(transport.sent_messages().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_discovery_is_throttled() {
        let transport = StubTransport::new();
        let (ctx, _rx) = test_context("user-1", ParticipantRole::Participant, transport);
        let manager = ScreenShareManager::new(ctx);

        assert_eq!(manager.check_for_existing_share().await, DiscoveryOutcome::NoShare);
        assert_eq!(manager.check_for_existing_share().await, DiscoveryOutcome::Throttled);

        tokio::time::advance(std::time::Duration::from_secs(2)).await;
        assert_eq!(manager.check_for_existing_share().await, DiscoveryOutcome::NoShare);
    }
}
