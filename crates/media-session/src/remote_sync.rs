//! Remote participant roster and playable media handles.
//!
//! Participants are keyed by transport identity. Every alias of a
//! participant (sid, identity, user id and its prefixed forms) resolves
//! through one index to that identity, so all aliases reach the same
//! handle. Camera and microphone handles are owned here; screen-share
//! handles are owned by the screen-share manager.
//!
//! The roster is updated by SDK events and by a periodic `full_sync` that
//! diffs the live roster against the map by size and identity set.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::events::{emit, SessionEvent};
use crate::observability::metrics;
use crate::participant_key::{role_from_metadata, strip_identity_prefix, ParticipantKey};
use crate::transport::{PublicationInfo, RemoteParticipantInfo, TrackSid};
use crate::types::{ParticipantRole, TrackSource};

/// A subscribed remote track materialized for playback.
#[derive(Debug)]
pub struct MediaHandle {
    sid: TrackSid,
    participant_identity: String,
    source: TrackSource,
    silenced: AtomicBool,
    released: AtomicBool,
}

impl MediaHandle {
    #[must_use]
    pub fn new(
        sid: impl Into<TrackSid>,
        participant_identity: impl Into<String>,
        source: TrackSource,
        silenced: bool,
    ) -> Arc<Self> {
        Arc::new(Self {
            sid: sid.into(),
            participant_identity: participant_identity.into(),
            source,
            silenced: AtomicBool::new(silenced),
            released: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    #[must_use]
    pub fn participant_identity(&self) -> &str {
        &self.participant_identity
    }

    #[must_use]
    pub fn source(&self) -> TrackSource {
        self.source
    }

    #[must_use]
    pub fn is_silenced(&self) -> bool {
        self.silenced.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Live, not muted and not released.
    #[must_use]
    pub fn is_playable(&self) -> bool {
        !self.is_silenced() && !self.is_released()
    }

    pub(crate) fn set_silenced(&self, silenced: bool) {
        self.silenced.store(silenced, Ordering::Release);
    }

    pub(crate) fn release(&self) {
        self.released.store(true, Ordering::Release);
    }
}

/// Publication state of one remote track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrackState {
    pub sid: TrackSid,
    pub source: TrackSource,
    pub muted: bool,
    pub subscribed: bool,
}

impl From<&PublicationInfo> for RemoteTrackState {
    fn from(publication: &PublicationInfo) -> Self {
        Self {
            sid: publication.sid.clone(),
            source: publication.source,
            muted: publication.muted,
            subscribed: publication.subscribed,
        }
    }
}

/// Read-only view of one remote participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteParticipantState {
    pub key: ParticipantKey,
    pub name: Option<String>,
    pub role: ParticipantRole,
    pub tracks: Vec<RemoteTrackState>,
    /// Last `participant_video_state_changed` hint from the peer.
    pub video_enabled_hint: Option<bool>,
    /// Timestamp (ms) of the peer's last heartbeat.
    pub last_seen_ms: Option<i64>,
}

impl RemoteParticipantState {
    #[must_use]
    pub fn track(&self, source: TrackSource) -> Option<&RemoteTrackState> {
        self.tracks.iter().find(|t| t.source == source)
    }
}

/// Result of a full reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SyncDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

struct PeerEntry {
    state: RemoteParticipantState,
    camera: Option<Arc<MediaHandle>>,
    microphone: Option<Arc<MediaHandle>>,
}

impl PeerEntry {
    fn new(info: &RemoteParticipantInfo) -> Self {
        Self {
            state: RemoteParticipantState {
                key: ParticipantKey::from_remote(info),
                name: info.name.clone().filter(|n| !n.is_empty()),
                role: role_from_metadata(info.metadata.as_deref()),
                tracks: info.publications.iter().map(RemoteTrackState::from).collect(),
                video_enabled_hint: None,
                last_seen_ms: None,
            },
            camera: None,
            microphone: None,
        }
    }

    fn handle_slot(&mut self, source: TrackSource) -> Option<&mut Option<Arc<MediaHandle>>> {
        match source {
            TrackSource::Camera => Some(&mut self.camera),
            TrackSource::Microphone => Some(&mut self.microphone),
            TrackSource::ScreenShare | TrackSource::ScreenShareAudio => None,
        }
    }

    fn release_all(&mut self) {
        for handle in [self.camera.take(), self.microphone.take()].into_iter().flatten() {
            handle.release();
        }
    }

    fn release_sid(&mut self, sid: &str) -> bool {
        let mut released = false;
        for slot in [&mut self.camera, &mut self.microphone] {
            if slot.as_ref().is_some_and(|h| h.sid() == sid) {
                if let Some(handle) = slot.take() {
                    handle.release();
                    released = true;
                }
            }
        }
        released
    }

    fn handles(&self) -> impl Iterator<Item = &Arc<MediaHandle>> {
        self.camera.iter().chain(self.microphone.iter())
    }
}

#[derive(Default)]
struct SyncInner {
    participants: HashMap<String, PeerEntry>,
    aliases: HashMap<String, String>,
    local: Option<ParticipantKey>,
    /// Peers refused because they match the local participant, by identity.
    local_aliases: HashMap<String, ParticipantKey>,
}

impl SyncInner {
    fn index(&mut self, key: &ParticipantKey) {
        for alias in key.aliases() {
            self.aliases.insert(alias, key.identity().to_string());
        }
    }

    fn unindex(&mut self, identity: &str) {
        self.aliases.retain(|_, target| target != identity);
    }

    fn resolve(&self, alias: &str) -> Option<&str> {
        if self.participants.contains_key(alias) {
            return self.participants.get_key_value(alias).map(|(k, _)| k.as_str());
        }
        self.aliases
            .get(alias)
            .or_else(|| self.aliases.get(strip_identity_prefix(alias)))
            .map(String::as_str)
    }

    fn is_local(&self, key: &ParticipantKey) -> bool {
        self.local.as_ref().is_some_and(|local| local.matches(key))
    }

    fn insert(&mut self, info: &RemoteParticipantInfo) -> bool {
        if self.participants.contains_key(&info.identity) {
            return false;
        }
        let mut entry = PeerEntry::new(info);
        if self.is_local(&entry.state.key) {
            self.local_aliases
                .insert(info.identity.clone(), entry.state.key.clone());
            return false;
        }
        let key = entry.state.key.clone();
        self.index(&key);
        // Handles for publications already subscribed when the peer is first seen
        let subscribed: Vec<RemoteTrackState> = entry
            .state
            .tracks
            .iter()
            .filter(|t| t.subscribed)
            .cloned()
            .collect();
        for track in subscribed {
            if let Some(slot) = entry.handle_slot(track.source) {
                *slot = Some(MediaHandle::new(
                    track.sid,
                    info.identity.clone(),
                    track.source,
                    track.muted,
                ));
            }
        }
        self.participants.insert(info.identity.clone(), entry);
        true
    }

    fn remove(&mut self, identity: &str) -> bool {
        let Some(mut entry) = self.participants.remove(identity) else {
            return false;
        };
        entry.release_all();
        self.unindex(identity);
        true
    }
}

/// Consistent map of remote participants and their streams.
pub struct RemoteParticipantSync {
    inner: Mutex<SyncInner>,
    events: broadcast::Sender<SessionEvent>,
}

impl RemoteParticipantSync {
    #[must_use]
    pub fn new(events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            inner: Mutex::new(SyncInner::default()),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, SyncInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Set the local participant so it never enters the roster.
    pub fn set_local(&self, key: ParticipantKey) {
        self.lock().local = Some(key);
    }

    pub fn on_participant_connected(&self, info: &RemoteParticipantInfo) {
        let (inserted, count) = {
            let mut inner = self.lock();
            let inserted = inner.insert(info);
            (inserted, inner.participants.len())
        };
        if !inserted {
            return;
        }
        metrics::set_remote_participants(count);
        info!(
            target: "ms.remote_sync",
            identity = %info.identity,
            participants = count,
            "Participant joined"
        );
        emit(
            &self.events,
            SessionEvent::ParticipantJoined {
                identity: info.identity.clone(),
                name: info.name.clone(),
            },
        );
    }

    pub fn on_participant_disconnected(&self, identity: &str) {
        let (removed, count) = {
            let mut inner = self.lock();
            let removed = inner.remove(identity);
            (removed, inner.participants.len())
        };
        if !removed {
            return;
        }
        metrics::set_remote_participants(count);
        info!(
            target: "ms.remote_sync",
            identity = %identity,
            participants = count,
            "Participant left"
        );
        emit(
            &self.events,
            SessionEvent::ParticipantLeft {
                identity: identity.to_string(),
            },
        );
    }

    pub fn on_track_published(&self, identity: &str, publication: &PublicationInfo) {
        let mut inner = self.lock();
        let Some(entry) = inner.participants.get_mut(identity) else {
            debug!(target: "ms.remote_sync", identity = %identity, "Publication for unknown participant");
            return;
        };
        entry.state.tracks.retain(|t| t.sid != publication.sid);
        entry.state.tracks.push(RemoteTrackState::from(publication));
    }

    pub fn on_track_unpublished(&self, identity: &str, sid: &str) {
        let mut inner = self.lock();
        if let Some(entry) = inner.participants.get_mut(identity) {
            entry.state.tracks.retain(|t| t.sid != sid);
            entry.release_sid(sid);
        }
    }

    /// Materialize a playable handle for a subscribed camera or microphone.
    ///
    /// Returns the new handle, or `None` for screen-share sources and
    /// unknown participants.
    pub fn on_track_subscribed(
        &self,
        identity: &str,
        publication: &PublicationInfo,
    ) -> Option<Arc<MediaHandle>> {
        let mut inner = self.lock();
        let entry = inner.participants.get_mut(identity)?;

        match entry.state.tracks.iter_mut().find(|t| t.sid == publication.sid) {
            Some(track) => track.subscribed = true,
            None => {
                let mut track = RemoteTrackState::from(publication);
                track.subscribed = true;
                entry.state.tracks.push(track);
            }
        }

        let slot = entry.handle_slot(publication.source)?;
        if let Some(existing) = slot.as_ref() {
            if existing.sid() == publication.sid && !existing.is_released() {
                return Some(Arc::clone(existing));
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
        debug!(
            target: "ms.remote_sync",
            identity = %identity,
            source = publication.source.as_str(),
            "Remote track materialized"
        );
        Some(handle)
    }

    pub fn on_track_unsubscribed(&self, identity: &str, sid: &str) {
        let mut inner = self.lock();
        if let Some(entry) = inner.participants.get_mut(identity) {
            if let Some(track) = entry.state.tracks.iter_mut().find(|t| t.sid == sid) {
                track.subscribed = false;
            }
            entry.release_sid(sid);
        }
    }

    pub fn on_track_muted(&self, identity: &str, sid: &str, muted: bool) {
        let mut inner = self.lock();
        let Some(entry) = inner.participants.get_mut(identity) else {
            return;
        };
        if let Some(track) = entry.state.tracks.iter_mut().find(|t| t.sid == sid) {
            track.muted = muted;
        }
        for handle in entry.handles().filter(|h| h.sid() == sid) {
            handle.set_silenced(muted);
        }
    }

    /// Diff the live roster against the map and repair missed events.
    pub fn full_sync(&self, live: &[RemoteParticipantInfo]) -> SyncDiff {
        let (diff, count) = {
            let mut inner = self.lock();
            let mut live_peers: Vec<&RemoteParticipantInfo> = Vec::with_capacity(live.len());
            for info in live {
                let key = ParticipantKey::from_remote(info);
                if inner.is_local(&key) {
                    inner.local_aliases.insert(info.identity.clone(), key);
                } else {
                    live_peers.push(info);
                }
            }
            let live = live_peers;

            let live_ids: BTreeSet<&str> = live.iter().map(|info| info.identity.as_str()).collect();
            let known_ids: BTreeSet<&str> = inner.participants.keys().map(String::as_str).collect();

            if live_ids.len() == known_ids.len() && live_ids == known_ids {
                return SyncDiff::default();
            }

            let removed: Vec<String> = known_ids
                .difference(&live_ids)
                .map(|id| (*id).to_string())
                .collect();
            let added: Vec<String> = live_ids
                .difference(&known_ids)
                .map(|id| (*id).to_string())
                .collect();

            for identity in &removed {
                inner.remove(identity);
            }
            for info in live.iter().filter(|info| added.contains(&info.identity)) {
                inner.insert(info);
            }

            (SyncDiff { added, removed }, inner.participants.len())
        };

        metrics::set_remote_participants(count);
        info!(
            target: "ms.remote_sync",
            added = diff.added.len(),
            removed = diff.removed.len(),
            participants = count,
            "Roster repaired by full sync"
        );
        for identity in &diff.removed {
            emit(
                &self.events,
                SessionEvent::ParticipantLeft {
                    identity: identity.clone(),
                },
            );
        }
        for identity in &diff.added {
            let name = self.get(identity).and_then(|p| p.name);
            emit(
                &self.events,
                SessionEvent::ParticipantJoined {
                    identity: identity.clone(),
                    name,
                },
            );
        }
        diff
    }

    pub fn set_video_hint(&self, alias: &str, video_enabled: bool) -> bool {
        self.update(alias, |state| state.video_enabled_hint = Some(video_enabled))
    }

    pub fn touch(&self, alias: &str, timestamp_ms: i64) -> bool {
        self.update(alias, |state| state.last_seen_ms = Some(timestamp_ms))
    }

    fn update(&self, alias: &str, f: impl FnOnce(&mut RemoteParticipantState)) -> bool {
        let mut inner = self.lock();
        let Some(identity) = inner.resolve(alias).map(str::to_string) else {
            return false;
        };
        match inner.participants.get_mut(&identity) {
            Some(entry) => {
                f(&mut entry.state);
                true
            }
            None => false,
        }
    }

    /// Identity of the participant `alias` names.
    #[must_use]
    pub fn resolve(&self, alias: &str) -> Option<String> {
        self.lock().resolve(alias).map(str::to_string)
    }

    #[must_use]
    pub fn get(&self, alias: &str) -> Option<RemoteParticipantState> {
        let inner = self.lock();
        let identity = inner.resolve(alias)?;
        inner.participants.get(identity).map(|e| e.state.clone())
    }

    /// Key for `alias`, including peers kept out because they are us.
    #[must_use]
    pub fn key_for(&self, alias: &str) -> Option<ParticipantKey> {
        let inner = self.lock();
        if let Some(entry) = inner.resolve(alias).and_then(|id| inner.participants.get(id)) {
            return Some(entry.state.key.clone());
        }
        inner.local_aliases.get(alias).cloned()
    }

    /// Playable camera or microphone handle for `alias`.
    #[must_use]
    pub fn stream(&self, alias: &str, source: TrackSource) -> Option<Arc<MediaHandle>> {
        let inner = self.lock();
        let identity = inner.resolve(alias)?;
        let entry = inner.participants.get(identity)?;
        let handle = match source {
            TrackSource::Camera => entry.camera.as_ref(),
            TrackSource::Microphone => entry.microphone.as_ref(),
            TrackSource::ScreenShare | TrackSource::ScreenShareAudio => None,
        }?;
        handle.is_playable().then(|| Arc::clone(handle))
    }

    /// Snapshot sorted by identity.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RemoteParticipantState> {
        let inner = self.lock();
        let mut participants: Vec<RemoteParticipantState> =
            inner.participants.values().map(|e| e.state.clone()).collect();
        participants.sort_by(|a, b| a.key.identity().cmp(b.key.identity()));
        participants
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of camera/microphone handles not yet released.
    #[must_use]
    pub fn live_handle_count(&self) -> usize {
        self.lock()
            .participants
            .values()
            .flat_map(PeerEntry::handles)
            .filter(|h| !h.is_released())
            .count()
    }

    /// Drop every participant and release every handle.
    pub fn clear(&self) {
        let mut inner = self.lock();
        for entry in inner.participants.values_mut() {
            entry.release_all();
        }
        inner.participants.clear();
        inner.aliases.clear();
        inner.local = None;
        inner.local_aliases.clear();
        drop(inner);
        metrics::set_remote_participants(0);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn publication(sid: &str, source: TrackSource) -> PublicationInfo {
        PublicationInfo {
            sid: sid.to_string(),
            source,
            muted: false,
            subscribed: false,
        }
    }

    fn peer(identity: &str, sid: &str, publications: Vec<PublicationInfo>) -> RemoteParticipantInfo {
        RemoteParticipantInfo {
            identity: identity.to_string(),
            sid: sid.to_string(),
            name: Some(format!("Name of {identity}")),
            metadata: None,
            publications,
        }
    }

    fn sync() -> (RemoteParticipantSync, broadcast::Receiver<SessionEvent>) {
        let (tx, rx) = broadcast::channel(64);
        (RemoteParticipantSync::new(tx), rx)
    }

    #[test]
    fn test_all_aliases_resolve_to_same_handle() {
        let (sync, _rx) = sync();
        sync.on_participant_connected(&peer("user-42", "PA_1", vec![]));
        let handle = sync
            .on_track_subscribed("user-42", &publication("TR_cam", TrackSource::Camera))
            .unwrap();

        for alias in ["PA_1", "user-42", "42", "user_42"] {
            let found = sync.stream(alias, TrackSource::Camera).unwrap();
            assert!(Arc::ptr_eq(&found, &handle), "alias {alias} resolved elsewhere");
        }
    }

    #[test]
    fn test_unsubscribe_releases_handle_for_every_alias() {
        let (sync, _rx) = sync();
        sync.on_participant_connected(&peer("user-42", "PA_1", vec![]));
        let handle = sync
            .on_track_subscribed("user-42", &publication("TR_mic", TrackSource::Microphone))
            .unwrap();

        sync.on_track_unsubscribed("user-42", "TR_mic");

        assert!(handle.is_released());
        for alias in ["PA_1", "user-42", "42", "user_42"] {
            assert!(sync.stream(alias, TrackSource::Microphone).is_none());
        }
        assert_eq!(sync.live_handle_count(), 0);
    }

    #[test]
    fn test_mute_silences_only_matching_handle() {
        let (sync, _rx) = sync();
        sync.on_participant_connected(&peer("user-42", "PA_1", vec![]));
        let mic = sync
            .on_track_subscribed("user-42", &publication("TR_mic", TrackSource::Microphone))
            .unwrap();
        let cam = sync
            .on_track_subscribed("user-42", &publication("TR_cam", TrackSource::Camera))
            .unwrap();

        sync.on_track_muted("user-42", "TR_mic", true);
        assert!(mic.is_silenced());
        assert!(!cam.is_silenced());
        assert!(sync.stream("42", TrackSource::Microphone).is_none());
        assert!(sync.stream("42", TrackSource::Camera).is_some());

        sync.on_track_muted("user-42", "TR_mic", false);
        assert!(sync.stream("42", TrackSource::Microphone).is_some());
    }

    #[test]
    fn test_screen_share_tracks_are_not_materialized_here() {
        let (sync, _rx) = sync();
        sync.on_participant_connected(&peer("user-42", "PA_1", vec![]));
        assert!(sync
            .on_track_subscribed("user-42", &publication("TR_scr", TrackSource::ScreenShare))
            .is_none());
        let state = sync.get("42").unwrap();
        assert!(state.track(TrackSource::ScreenShare).unwrap().subscribed);
    }

    #[test]
    fn test_leave_releases_handles_and_aliases() {
        let (sync, mut rx) = sync();
        sync.on_participant_connected(&peer("user-42", "PA_1", vec![]));
        let handle = sync
            .on_track_subscribed("user-42", &publication("TR_cam", TrackSource::Camera))
            .unwrap();

        sync.on_participant_disconnected("user-42");

        assert!(handle.is_released());
        assert!(sync.resolve("PA_1").is_none());
        assert!(sync.is_empty());
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::ParticipantJoined { .. }));
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::ParticipantLeft { .. }));
    }

    #[test]
    fn test_local_participant_is_never_added() {
        let (sync, _rx) = sync();
        sync.set_local(ParticipantKey::new("user-1").with_sid("PA_local"));

        sync.on_participant_connected(&peer("user-1", "PA_local", vec![]));
        assert!(sync.is_empty());

        let diff = sync.full_sync(&[peer("user-1", "PA_local", vec![])]);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_local_alias_under_other_identity_keeps_full_key() {
        let (sync, _rx) = sync();
        sync.set_local(ParticipantKey::new("opaque-a").with_metadata(Some(r#"{"userId":"42"}"#)));
        let mut ghost = peer("opaque-b", "PA_b", vec![]);
        ghost.metadata = Some(r#"{"userId":"42"}"#.to_string());

        sync.on_participant_connected(&ghost);

        assert!(sync.is_empty());
        let key = sync.key_for("opaque-b").unwrap();
        assert_eq!(key.user_id(), "42");
        assert!(ParticipantKey::new("opaque-a")
            .with_metadata(Some(r#"{"userId":"42"}"#))
            .matches(&key));

        sync.clear();
        assert!(sync.key_for("opaque-b").is_none());
    }

    #[test]
    fn test_full_sync_repairs_missed_events() {
        let (sync, _rx) = sync();
        sync.on_participant_connected(&peer("user-1", "PA_1", vec![]));
        sync.on_participant_connected(&peer("user-2", "PA_2", vec![]));

        // user-2 left and user-3 joined without events
        let mut user3 = peer("user-3", "PA_3", vec![publication("TR_cam3", TrackSource::Camera)]);
        if let Some(p) = user3.publications.first_mut() {
            p.subscribed = true;
        }
        let diff = sync.full_sync(&[peer("user-1", "PA_1", vec![]), user3]);

        assert_eq!(diff.added, vec!["user-3".to_string()]);
        assert_eq!(diff.removed, vec!["user-2".to_string()]);
        assert!(sync.stream("3", TrackSource::Camera).is_some());
        assert_eq!(sync.len(), 2);
    }

    #[test]
    fn test_full_sync_noop_when_identity_sets_match() {
        let (sync, _rx) = sync();
        sync.on_participant_connected(&peer("user-1", "PA_1", vec![]));
        let diff = sync.full_sync(&[peer("user-1", "PA_1", vec![])]);
        assert!(diff.is_empty());
    }

    #[test]
    fn test_hints_and_heartbeats_by_alias() {
        let (sync, _rx) = sync();
        sync.on_participant_connected(&peer("user-42", "PA_1", vec![]));

        assert!(sync.set_video_hint("42", false));
        assert!(sync.touch("user_42", 1234));
        assert!(!sync.touch("nobody", 1));

        let state = sync.get("PA_1").unwrap();
        assert_eq!(state.video_enabled_hint, Some(false));
        assert_eq!(state.last_seen_ms, Some(1234));
    }

    #[test]
    fn test_clear_releases_everything() {
        let (sync, _rx) = sync();
        sync.on_participant_connected(&peer("user-42", "PA_1", vec![]));
        let handle = sync
            .on_track_subscribed("user-42", &publication("TR_cam", TrackSource::Camera))
            .unwrap();

        sync.clear();
        sync.clear();

        assert!(handle.is_released());
        assert!(sync.is_empty());
        assert_eq!(sync.live_handle_count(), 0);
    }
}
