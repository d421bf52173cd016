//! Mute intent enforcement for local camera and microphone tracks.
//!
//! The guard owns the authoritative "intended muted" flag per kind. Every
//! track attached to it is held to that intent at two layers: the SDK mute
//! flag and the hardware capture flag. The invariant is
//! `capture_enabled == !intended_muted` for every attached track once the
//! next reconcile tick has run.
//!
//! Intent is written only by explicit actions: the user (`set_intended_mute`)
//! or the session bootstrap (`apply_default`). Once the user has touched a
//! kind, bootstrap defaults no longer apply to it. `reconcile` only reads
//! intent.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::observability::metrics;
use crate::transport::{SharedTrack, TrackSid};
use crate::types::MediaKind;

/// Smallest reconcile interval accepted by the ticker.
const MIN_RECONCILE_INTERVAL: Duration = Duration::from_millis(10);

/// Local mute and publish state exposed to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LocalMediaState {
    pub audio_muted: bool,
    pub video_muted: bool,
    pub audio_published: bool,
    pub video_published: bool,
}

/// Corrections made by one reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    pub sdk_corrections: u32,
    pub capture_corrections: u32,
    pub missing_tracks: u32,
}

impl ReconcileReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.sdk_corrections == 0 && self.capture_corrections == 0 && self.missing_tracks == 0
    }
}

struct KindState {
    intended_muted: bool,
    user_touched: bool,
    track: Option<SharedTrack>,
    sid: Option<TrackSid>,
    expected: bool,
}

impl Default for KindState {
    fn default() -> Self {
        Self {
            intended_muted: true,
            user_touched: false,
            track: None,
            sid: None,
            expected: false,
        }
    }
}

impl KindState {
    fn enforce_on(&self, track: &SharedTrack) {
        track.set_muted(self.intended_muted);
        track.set_capture_enabled(!self.intended_muted);
    }
}

#[derive(Default)]
struct GuardInner {
    audio: KindState,
    video: KindState,
}

impl GuardInner {
    fn kind(&self, kind: MediaKind) -> &KindState {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Video => &self.video,
        }
    }

    fn kind_mut(&mut self, kind: MediaKind) -> &mut KindState {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Video => &mut self.video,
        }
    }
}

/// Single source of truth for local mute intent.
#[derive(Default)]
pub struct TrackStateGuard {
    inner: Mutex<GuardInner>,
}

impl TrackStateGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GuardInner> {
        // Poisoning is ignored: the state is plain data.
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Explicit user action. Applied to the attached track immediately.
    ///
    /// Returns the previous intent.
    pub fn set_intended_mute(&self, kind: MediaKind, muted: bool) -> bool {
        self.update_intent(kind, |_| muted)
    }

    /// Flip the intent for `kind` and return the new muted value.
    pub fn toggle(&self, kind: MediaKind) -> bool {
        !self.update_intent(kind, |muted| !muted)
    }

    fn update_intent(&self, kind: MediaKind, next: impl FnOnce(bool) -> bool) -> bool {
        let mut inner = self.lock();
        let state = inner.kind_mut(kind);
        let previous = state.intended_muted;
        let muted = next(previous);
        state.intended_muted = muted;
        state.user_touched = true;
        if let Some(track) = &state.track {
            state.enforce_on(track);
        }
        debug!(
            target: "ms.track_guard",
            kind = kind.as_str(),
            muted,
            "Mute intent set by user"
        );
        previous
    }

    /// Bootstrap default. Ignored once the user has touched `kind`.
    ///
    /// Returns true if the default was applied.
    pub fn apply_default(&self, kind: MediaKind, muted: bool) -> bool {
        let mut inner = self.lock();
        let state = inner.kind_mut(kind);
        if state.user_touched {
            debug!(
                target: "ms.track_guard",
                kind = kind.as_str(),
                "Bootstrap default skipped, user intent takes precedence"
            );
            return false;
        }
        state.intended_muted = muted;
        if let Some(track) = &state.track {
            state.enforce_on(track);
        }
        true
    }

    #[must_use]
    pub fn intended_mute(&self, kind: MediaKind) -> bool {
        self.lock().kind(kind).intended_muted
    }

    #[must_use]
    pub fn user_touched(&self, kind: MediaKind) -> bool {
        self.lock().kind(kind).user_touched
    }

    /// Attach a track and hold it to the current intent.
    ///
    /// Returns the previously attached track, if any.
    pub fn attach_track(
        &self,
        kind: MediaKind,
        track: SharedTrack,
        sid: Option<TrackSid>,
    ) -> Option<(SharedTrack, Option<TrackSid>)> {
        let mut inner = self.lock();
        let state = inner.kind_mut(kind);
        state.enforce_on(&track);
        let previous = state.track.replace(track);
        let previous_sid = std::mem::replace(&mut state.sid, sid);
        state.expected = true;
        previous.map(|t| (t, previous_sid))
    }

    /// Detach the track of `kind`; the guard no longer expects one.
    pub fn detach_track(&self, kind: MediaKind) -> Option<(SharedTrack, Option<TrackSid>)> {
        let mut inner = self.lock();
        let state = inner.kind_mut(kind);
        state.expected = false;
        let sid = state.sid.take();
        state.track.take().map(|t| (t, sid))
    }

    #[must_use]
    pub fn track(&self, kind: MediaKind) -> Option<SharedTrack> {
        self.lock().kind(kind).track.clone()
    }

    #[must_use]
    pub fn sid(&self, kind: MediaKind) -> Option<TrackSid> {
        self.lock().kind(kind).sid.clone()
    }

    /// Whether a track of `kind` should be present.
    #[must_use]
    pub fn expects_track(&self, kind: MediaKind) -> bool {
        self.lock().kind(kind).expected
    }

    /// Mark a track of `kind` as required even while none is attached.
    pub fn expect_track(&self, kind: MediaKind) {
        self.lock().kind_mut(kind).expected = true;
    }

    /// Compare intent with both mute layers of each track and correct drift.
    pub fn reconcile(&self) -> ReconcileReport {
        let inner = self.lock();
        let mut report = ReconcileReport::default();

        for kind in [MediaKind::Audio, MediaKind::Video] {
            let state = inner.kind(kind);
            let Some(track) = &state.track else {
                if state.expected {
                    report.missing_tracks += 1;
                    warn!(
                        target: "ms.track_guard",
                        kind = kind.as_str(),
                        "Expected local track is missing"
                    );
                }
                continue;
            };

            let muted = state.intended_muted;

            if track.is_muted() != muted {
                track.set_muted(muted);
                report.sdk_corrections += 1;
                metrics::record_mute_correction(kind.as_str(), "sdk");
                debug!(
                    target: "ms.track_guard",
                    kind = kind.as_str(),
                    intended_muted = muted,
                    "Corrected SDK mute drift"
                );
            }

            if track.is_capture_enabled() == muted {
                track.set_capture_enabled(!muted);
                report.capture_corrections += 1;
                metrics::record_mute_correction(kind.as_str(), "capture");
                debug!(
                    target: "ms.track_guard",
                    kind = kind.as_str(),
                    intended_muted = muted,
                    "Corrected capture drift"
                );
            }
        }

        report
    }

    #[must_use]
    pub fn snapshot(&self) -> LocalMediaState {
        let inner = self.lock();
        LocalMediaState {
            audio_muted: inner.audio.intended_muted,
            video_muted: inner.video.intended_muted,
            audio_published: inner.audio.sid.is_some(),
            video_published: inner.video.sid.is_some(),
        }
    }

    /// Detach every track and restore bootstrap defaults for a new session.
    ///
    /// Returned tracks are owned by the caller, who stops them.
    pub fn reset(&self) -> Vec<(SharedTrack, Option<TrackSid>)> {
        let mut inner = self.lock();
        let old = std::mem::take(&mut *inner);
        [old.audio, old.video]
            .into_iter()
            .filter_map(|state| state.track.map(|t| (t, state.sid)))
            .collect()
    }

    /// Detach every track but keep mute intent, for a reconnect.
    pub fn release_tracks(&self) -> Vec<(SharedTrack, Option<TrackSid>)> {
        let mut inner = self.lock();
        [MediaKind::Audio, MediaKind::Video]
            .into_iter()
            .filter_map(|kind| {
                let state = inner.kind_mut(kind);
                state.expected = false;
                let sid = state.sid.take();
                state.track.take().map(|t| (t, sid))
            })
            .collect()
    }

    /// Spawn the periodic reconcile ticker.
    pub fn spawn_reconcile_loop(
        self: &Arc<Self>,
        interval: Duration,
        cancel_token: CancellationToken,
    ) -> JoinHandle<()> {
        let guard = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(MIN_RECONCILE_INTERVAL));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        debug!(target: "ms.track_guard", "Reconcile loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        guard.reconcile();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::transport::testing::StubTrack;
    use crate::types::TrackSource;

    fn mic() -> Arc<StubTrack> {
        StubTrack::new("mic-1", TrackSource::Microphone)
    }

    #[test]
    fn test_defaults_to_muted() {
        let guard = TrackStateGuard::new();
        assert!(guard.intended_mute(MediaKind::Audio));
        assert!(guard.intended_mute(MediaKind::Video));
        assert!(!guard.user_touched(MediaKind::Audio));
    }

    #[test]
    fn test_attach_applies_intent_to_both_layers() {
        let guard = TrackStateGuard::new();
        let track = mic();
        guard.attach_track(MediaKind::Audio, track.clone(), Some("TR_1".into()));

        let state = track.snapshot();
        assert!(state.muted);
        assert!(!state.capture_enabled);
        assert!(guard.snapshot().audio_published);
    }

    #[test]
    fn test_user_intent_is_applied_immediately() {
        let guard = TrackStateGuard::new();
        let track = mic();
        guard.attach_track(MediaKind::Audio, track.clone(), None);

        guard.set_intended_mute(MediaKind::Audio, false);
        let state = track.snapshot();
        assert!(!state.muted);
        assert!(state.capture_enabled);
        assert!(guard.user_touched(MediaKind::Audio));
    }

    #[test]
    fn test_default_never_overrides_user_intent() {
        let guard = TrackStateGuard::new();
        guard.set_intended_mute(MediaKind::Audio, false);

        assert!(!guard.apply_default(MediaKind::Audio, true));
        assert!(!guard.intended_mute(MediaKind::Audio));

        // Untouched kind still takes defaults
        assert!(guard.apply_default(MediaKind::Video, false));
        assert!(!guard.intended_mute(MediaKind::Video));
    }

    #[test]
    fn test_reconcile_corrects_each_layer_independently() {
        let guard = TrackStateGuard::new();
        let track = mic();
        guard.attach_track(MediaKind::Audio, track.clone(), None);

        // Only the capture layer drifts
        track.state.lock().unwrap().capture_enabled = true;
        let report = guard.reconcile();
        assert_eq!(report.sdk_corrections, 0);
        assert_eq!(report.capture_corrections, 1);
        assert!(!track.snapshot().capture_enabled);

        // Only the SDK layer drifts
        track.state.lock().unwrap().muted = false;
        let report = guard.reconcile();
        assert_eq!(report.sdk_corrections, 1);
        assert_eq!(report.capture_corrections, 0);
        assert!(track.snapshot().muted);

        assert!(guard.reconcile().is_clean());
    }

    #[test]
    fn test_reconcile_keeps_explicit_unmute() {
        let guard = TrackStateGuard::new();
        let track = mic();
        guard.attach_track(MediaKind::Audio, track.clone(), None);
        guard.set_intended_mute(MediaKind::Audio, false);

        // SDK drifts back to muted; the guard restores the user's unmute
        track.state.lock().unwrap().muted = true;
        guard.reconcile();
        let state = track.snapshot();
        assert!(!state.muted);
        assert!(state.capture_enabled);
    }

    #[test]
    fn test_missing_expected_track_is_reported() {
        let guard = TrackStateGuard::new();
        guard.expect_track(MediaKind::Audio);
        let report = guard.reconcile();
        assert_eq!(report.missing_tracks, 1);

        guard.detach_track(MediaKind::Audio);
        assert!(guard.reconcile().is_clean());
    }

    #[test]
    fn test_reset_returns_tracks_and_restores_defaults() {
        let guard = TrackStateGuard::new();
        guard.attach_track(MediaKind::Audio, mic(), Some("TR_1".into()));
        guard.set_intended_mute(MediaKind::Audio, false);

        let tracks = guard.reset();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks.first().unwrap().1.as_deref(), Some("TR_1"));
        assert!(guard.intended_mute(MediaKind::Audio));
        assert!(!guard.user_touched(MediaKind::Audio));
        assert!(guard.track(MediaKind::Audio).is_none());
    }

    #[test]
    fn test_release_tracks_keeps_intent() {
        let guard = TrackStateGuard::new();
        guard.attach_track(MediaKind::Audio, mic(), Some("TR_1".into()));
        guard.set_intended_mute(MediaKind::Audio, false);

        assert_eq!(guard.release_tracks().len(), 1);
        assert!(!guard.intended_mute(MediaKind::Audio));
        assert!(guard.user_touched(MediaKind::Audio));
        assert!(!guard.expects_track(MediaKind::Audio));
    }

    #[test]
    fn test_toggle_flips_intent() {
        let guard = TrackStateGuard::new();
        assert!(!guard.toggle(MediaKind::Video));
        assert!(guard.toggle(MediaKind::Video));
    }

    #[test]
    fn test_concurrent_toggles_never_collapse() {
        let guard = TrackStateGuard::new();
        let muted_results = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| {
                        (0..1000)
                            .filter(|_| guard.toggle(MediaKind::Audio))
                            .count()
                    })
                })
                .collect();
            workers
                .into_iter()
                .map(|w| w.join().unwrap())
                .sum::<usize>()
        });

        // Each flip sees the one before it, so results alternate exactly.
        assert_eq!(muted_results, 4000);
        assert!(guard.intended_mute(MediaKind::Audio));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_loop_corrects_drift_on_tick() {
        let guard = Arc::new(TrackStateGuard::new());
        let track = mic();
        guard.attach_track(MediaKind::Audio, track.clone(), None);
        let cancel_token = CancellationToken::new();
        let handle = guard.spawn_reconcile_loop(Duration::from_millis(500), cancel_token.clone());

        // Let the immediate first tick run
        tokio::time::advance(Duration::from_millis(1)).await;
        tokio::task::yield_now().await;

        track.state.lock().unwrap().capture_enabled = true;
        tokio::time::advance(Duration::from_millis(500)).await;
        tokio::task::yield_now().await;
        assert!(!track.snapshot().capture_enabled);

        cancel_token.cancel();
        handle.await.unwrap();
    }
}
