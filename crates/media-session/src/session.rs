//! `MediaSession` - the facade UI collaborators talk to.
//!
//! Composes the connection manager, the mute guard and the roster with the
//! services of the live session (screen-share permission and lifecycle,
//! device health). Those services are created when a session is
//! established and dropped when it ends; their background tasks run under
//! the session's cancellation token:
//!
//! - transport event pump
//! - mute reconcile tick
//! - device health loop
//! - maintenance loop (roster sync, heartbeat, ended-capture detection)

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use common::join_token::JoinTokenClient;
use common::meeting_api::{MeetingApiClient, RecordingJob, RecordingOptions};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::{Config, SessionTimings};
use crate::connection::{
    ConnectionManager, ConnectionParts, DisconnectKind, DisconnectOutcome, SessionHandle,
    SessionHooks, TokenProvider,
};
use crate::context::SessionContext;
use crate::device_health::DeviceHealthMonitor;
use crate::directory::{EmptyDirectory, ParticipantDirectory};
use crate::errors::SessionError;
use crate::event_pump;
use crate::events::{emit, ChatMessage, SessionEvent};
use crate::maintenance;
use crate::remote_sync::{MediaHandle, RemoteParticipantState, RemoteParticipantSync};
use crate::screen_share::{
    DiscoveryOutcome, PendingRequest, PermissionGrant, ScreenShareManager, ScreenSharePermission,
    ScreenShareSnapshot, ShareStartResult,
};
use crate::signaling::{now_millis, QueueStatus, SignalMessage, SignalingOutbox};
use crate::track_guard::{LocalMediaState, TrackStateGuard};
use crate::transport::{MediaDevices, RoomTransport, TransportEvents};
use crate::types::{ConnectionStatus, JoinOptions, MediaKind, TrackSource};

/// Capacity of the session event channel. Slow subscribers lag, they never
/// block the core.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Services of one established session.
pub(crate) struct ActiveSession {
    pub(crate) ctx: Arc<SessionContext>,
    pub(crate) permission: ScreenSharePermission,
    pub(crate) share: ScreenShareManager,
    pub(crate) device_health: Arc<DeviceHealthMonitor>,
}

/// Long-lived collaborators plus the currently active session.
struct SessionCore {
    transport: Arc<dyn RoomTransport>,
    devices: Arc<dyn MediaDevices>,
    guard: Arc<TrackStateGuard>,
    remote: Arc<RemoteParticipantSync>,
    directory: Arc<dyn ParticipantDirectory>,
    events: broadcast::Sender<SessionEvent>,
    timings: SessionTimings,
    active: Mutex<Option<Arc<ActiveSession>>>,
}

impl SessionCore {
    fn lock(&self) -> MutexGuard<'_, Option<Arc<ActiveSession>>> {
        self.active
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn active(&self) -> Option<Arc<ActiveSession>> {
        self.lock().clone()
    }
}

#[async_trait]
impl SessionHooks for SessionCore {
    async fn session_started(
        &self,
        connection: &Arc<ConnectionManager>,
        handle: &SessionHandle,
        events: TransportEvents,
    ) {
        let cancel_token = handle.cancel_token();
        let outbox = SignalingOutbox::spawn(
            Arc::clone(&self.transport),
            self.timings.signaling_queue_capacity,
            cancel_token.clone(),
        );

        let ctx = Arc::new(SessionContext {
            handle: handle.clone(),
            transport: Arc::clone(&self.transport),
            devices: Arc::clone(&self.devices),
            outbox,
            remote: Arc::clone(&self.remote),
            guard: Arc::clone(&self.guard),
            directory: Arc::clone(&self.directory),
            events: self.events.clone(),
            timings: self.timings,
        });
        let active = Arc::new(ActiveSession {
            permission: ScreenSharePermission::new(Arc::clone(&ctx)),
            share: ScreenShareManager::new(Arc::clone(&ctx)),
            device_health: Arc::new(DeviceHealthMonitor::new(Arc::clone(&ctx))),
            ctx,
        });
        *self.lock() = Some(Arc::clone(&active));

        tokio::spawn(event_pump::run(
            Arc::clone(&active),
            Arc::downgrade(connection),
            events,
            cancel_token.clone(),
        ));
        self.guard
            .spawn_reconcile_loop(self.timings.mute_reconcile_interval, cancel_token.clone());
        active.device_health.spawn(
            self.timings.device_health_interval,
            self.timings.device_change_debounce,
            cancel_token.clone(),
        );
        tokio::spawn(maintenance::run(Arc::clone(&active), cancel_token));

        let discovery = active.share.check_for_existing_share().await;
        debug!(target: "ms.session", outcome = ?discovery, "Initial screen share discovery");
    }

    fn publish_in_progress(&self) -> bool {
        self.active()
            .is_some_and(|active| active.share.publish_in_progress())
    }

    async fn session_ending(&self, handle: &SessionHandle) {
        let active = {
            let mut slot = self.lock();
            if slot
                .as_ref()
                .is_some_and(|a| a.ctx.handle.connection_id == handle.connection_id)
            {
                slot.take()
            } else {
                None
            }
        };
        if let Some(active) = active {
            active.share.teardown();
            active.permission.cancel_all();
        }
    }
}

/// Result of `toggle_screen_share`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShareToggle {
    Started(ShareStartResult),
    Stopped,
}

/// Builder for `MediaSession`.
pub struct MediaSessionBuilder {
    transport: Arc<dyn RoomTransport>,
    devices: Arc<dyn MediaDevices>,
    tokens: Arc<dyn TokenProvider>,
    timings: SessionTimings,
    directory: Arc<dyn ParticipantDirectory>,
    meeting_api: Option<Arc<MeetingApiClient>>,
}

impl MediaSessionBuilder {
    #[must_use]
    pub fn timings(mut self, timings: SessionTimings) -> Self {
        self.timings = timings;
        self
    }

    #[must_use]
    pub fn directory(mut self, directory: Arc<dyn ParticipantDirectory>) -> Self {
        self.directory = directory;
        self
    }

    #[must_use]
    pub fn meeting_api(mut self, client: MeetingApiClient) -> Self {
        self.meeting_api = Some(Arc::new(client));
        self
    }

    #[must_use]
    pub fn build(self) -> MediaSession {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let guard = Arc::new(TrackStateGuard::new());
        let remote = Arc::new(RemoteParticipantSync::new(events.clone()));

        let core = Arc::new(SessionCore {
            transport: Arc::clone(&self.transport),
            devices: Arc::clone(&self.devices),
            guard: Arc::clone(&guard),
            remote: Arc::clone(&remote),
            directory: self.directory,
            events: events.clone(),
            timings: self.timings,
            active: Mutex::new(None),
        });
        let hooks: Arc<dyn SessionHooks> = core.clone();
        let connection = ConnectionManager::new(ConnectionParts {
            transport: self.transport,
            devices: self.devices,
            tokens: self.tokens,
            guard,
            remote,
            hooks,
            events,
            timings: self.timings,
        });

        MediaSession {
            core,
            connection,
            meeting_api: self.meeting_api,
        }
    }
}

/// Media session of one client.
pub struct MediaSession {
    core: Arc<SessionCore>,
    connection: Arc<ConnectionManager>,
    meeting_api: Option<Arc<MeetingApiClient>>,
}

impl MediaSession {
    #[must_use]
    pub fn builder(
        transport: Arc<dyn RoomTransport>,
        devices: Arc<dyn MediaDevices>,
        tokens: Arc<dyn TokenProvider>,
    ) -> MediaSessionBuilder {
        MediaSessionBuilder {
            transport,
            devices,
            tokens,
            timings: SessionTimings::default(),
            directory: Arc::new(EmptyDirectory),
            meeting_api: None,
        }
    }

    /// Session wired to the token service and meeting API named by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error if either HTTP client cannot be built.
    pub fn from_config(
        config: &Config,
        transport: Arc<dyn RoomTransport>,
        devices: Arc<dyn MediaDevices>,
    ) -> Result<Self, SessionError> {
        let tokens = JoinTokenClient::new(config.join_token_config())?;
        let meeting_api = config.meeting_api_client()?;
        Ok(Self::builder(transport, devices, Arc::new(tokens))
            .timings(config.timings)
            .meeting_api(meeting_api)
            .build())
    }

    fn active(&self) -> Result<Arc<ActiveSession>, SessionError> {
        self.core.active().ok_or(SessionError::NotConnected)
    }

    fn require_privileged(active: &ActiveSession, action: &str) -> Result<(), SessionError> {
        if active.ctx.is_privileged() {
            Ok(())
        } else {
            Err(SessionError::PermissionDenied(format!(
                "Only hosts and co-hosts can {action}"
            )))
        }
    }

    fn emit(&self, event: SessionEvent) {
        emit(&self.core.events, event);
    }

    // --- Lifecycle ---

    /// Join a meeting. Concurrent calls for the same meeting share one attempt.
    ///
    /// # Errors
    ///
    /// See `ConnectionManager::connect`.
    pub async fn connect(&self, options: JoinOptions) -> Result<SessionHandle, SessionError> {
        self.connection.connect(options).await
    }

    /// User-initiated leave.
    ///
    /// # Errors
    ///
    /// `Busy` while a screen-share publish or a connect attempt is running.
    pub async fn leave(&self) -> Result<DisconnectOutcome, SessionError> {
        self.connection.disconnect(DisconnectKind::UserLeave).await
    }

    /// Component cleanup. A live session is kept and torn down when it next
    /// ends.
    ///
    /// # Errors
    ///
    /// `Busy` while a screen-share publish is running.
    pub async fn cleanup(&self) -> Result<DisconnectOutcome, SessionError> {
        self.connection.disconnect(DisconnectKind::Cleanup).await
    }

    /// End the meeting for everyone (host and co-host only).
    ///
    /// # Errors
    ///
    /// - `NotConnected` without a live session
    /// - `PermissionDenied` for participants
    /// - `Service` if the meeting API rejected the request
    #[instrument(skip_all, name = "ms.session.end_meeting")]
    pub async fn end_meeting(&self) -> Result<(), SessionError> {
        let active = self.active()?;
        Self::require_privileged(&active, "end the meeting")?;
        let meeting_id = active.ctx.handle.meeting_id.clone();

        if let Some(api) = &self.meeting_api {
            api.end_meeting(&meeting_id).await?;
        }

        let message = SignalMessage::MeetingEnded {
            ended_by: Some(active.ctx.local_identity().to_string()),
            timestamp: now_millis(),
        };
        if let Err(e) = active.ctx.outbox.send(&message, Vec::new()).await {
            warn!(target: "ms.session", error = %e, "Failed to broadcast meeting end");
        }
        drop(active);

        info!(target: "ms.session", meeting_id = %meeting_id, "Meeting ended");
        self.connection
            .disconnect(DisconnectKind::MeetingEnded)
            .await
            .map(|_| ())
    }

    // --- Local media ---

    /// # Errors
    ///
    /// Returns an error if unmuting needed a new track and it could not be
    /// published. Mute intent is restored in that case.
    pub async fn toggle_audio(&self) -> Result<LocalMediaState, SessionError> {
        let muted = self.core.guard.toggle(MediaKind::Audio);
        self.apply_mute(MediaKind::Audio, muted, !muted).await
    }

    /// # Errors
    ///
    /// See `toggle_audio`.
    pub async fn toggle_video(&self) -> Result<LocalMediaState, SessionError> {
        let muted = self.core.guard.toggle(MediaKind::Video);
        self.apply_mute(MediaKind::Video, muted, !muted).await
    }

    /// # Errors
    ///
    /// See `toggle_audio`.
    pub async fn enable_audio(&self, enabled: bool) -> Result<LocalMediaState, SessionError> {
        self.set_muted(MediaKind::Audio, !enabled).await
    }

    /// # Errors
    ///
    /// See `toggle_audio`.
    pub async fn enable_video(&self, enabled: bool) -> Result<LocalMediaState, SessionError> {
        self.set_muted(MediaKind::Video, !enabled).await
    }

    async fn set_muted(&self, kind: MediaKind, muted: bool) -> Result<LocalMediaState, SessionError> {
        let previous = self.core.guard.set_intended_mute(kind, muted);
        self.apply_mute(kind, muted, previous).await
    }

    /// Follow up on recorded intent: publish a missing track when unmuting
    /// in a live session, and tell peers about camera changes.
    ///
    /// Works before `connect`: the intent becomes the lobby choice and is
    /// honored by the initial publish.
    async fn apply_mute(
        &self,
        kind: MediaKind,
        muted: bool,
        previous: bool,
    ) -> Result<LocalMediaState, SessionError> {
        let guard = &self.core.guard;
        if !muted && guard.track(kind).is_none() && self.connection.session().is_some() {
            if let Err(e) = self.connection.publish_local(kind).await {
                warn!(target: "ms.session", kind = kind.as_str(), error = %e, "Unmute failed, restoring mute");
                guard.set_intended_mute(kind, previous);
                self.emit(SessionEvent::LocalMediaChanged(guard.snapshot()));
                return Err(e);
            }
        }

        if kind == MediaKind::Video {
            if let Some(active) = self.core.active() {
                let message = SignalMessage::ParticipantVideoStateChanged {
                    participant_identity: active.ctx.local_identity().to_string(),
                    video_enabled: !muted,
                    timestamp: now_millis(),
                };
                active.ctx.outbox.try_send(&message, Vec::new());
            }
        }

        let state = guard.snapshot();
        debug!(target: "ms.session", kind = kind.as_str(), muted, "Mute intent changed");
        self.emit(SessionEvent::LocalMediaChanged(state));
        Ok(state)
    }

    // --- Screen share ---

    /// # Errors
    ///
    /// See `ScreenShareManager::start`.
    pub async fn start_screen_share(&self) -> Result<ShareStartResult, SessionError> {
        let active = self.active()?;
        active.share.start(&active.permission).await
    }

    /// Stop the local share, or force-stop `target`'s share (host only).
    ///
    /// # Errors
    ///
    /// See `ScreenShareManager::stop`.
    pub async fn stop_screen_share(&self, target: Option<&str>) -> Result<bool, SessionError> {
        let active = self.active()?;
        active.share.stop(target).await
    }

    /// # Errors
    ///
    /// See `start_screen_share` and `stop_screen_share`.
    pub async fn toggle_screen_share(&self) -> Result<ShareToggle, SessionError> {
        let active = self.active()?;
        if active.share.has_local_share() {
            active.share.stop(None).await?;
            Ok(ShareToggle::Stopped)
        } else {
            active
                .share
                .start(&active.permission)
                .await
                .map(ShareToggle::Started)
        }
    }

    /// # Errors
    ///
    /// See `ScreenSharePermission::request_permission`.
    pub async fn request_screen_share_permission(&self) -> Result<PermissionGrant, SessionError> {
        self.active()?.permission.request_permission().await
    }

    /// # Errors
    ///
    /// `PermissionDenied` for participants, `NotConnected` without a session.
    pub async fn approve_screen_share(&self, request_id: &str) -> Result<bool, SessionError> {
        self.active()?.permission.approve(request_id).await
    }

    /// # Errors
    ///
    /// `PermissionDenied` for participants, `NotConnected` without a session.
    pub async fn deny_screen_share(&self, request_id: &str) -> Result<bool, SessionError> {
        self.active()?.permission.deny(request_id).await
    }

    #[must_use]
    pub fn pending_screen_share_requests(&self) -> Vec<PendingRequest> {
        self.core
            .active()
            .map(|active| active.permission.pending_requests())
            .unwrap_or_default()
    }

    /// Run late-joiner discovery now.
    ///
    /// # Errors
    ///
    /// `NotConnected` without a session.
    pub async fn check_for_existing_share(&self) -> Result<DiscoveryOutcome, SessionError> {
        Ok(self.active()?.share.check_for_existing_share().await)
    }

    // --- Signaling pass-through ---

    /// Broadcast a chat message. Blank messages are not sent.
    ///
    /// # Errors
    ///
    /// `NotConnected` without a session, `Transport` if the send failed.
    pub async fn send_chat(&self, text: &str) -> Result<Option<ChatMessage>, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(None);
        }
        let active = self.active()?;
        let chat = ChatMessage {
            message_id: Uuid::new_v4().to_string(),
            sender_identity: active.ctx.local_identity().to_string(),
            sender_name: active.ctx.local_name(),
            text: text.to_string(),
            timestamp_ms: now_millis(),
            local: true,
        };
        let message = SignalMessage::ChatMessage {
            message_id: chat.message_id.clone(),
            sender_identity: chat.sender_identity.clone(),
            sender_name: chat.sender_name.clone(),
            text: chat.text.clone(),
            timestamp: chat.timestamp_ms,
        };
        active.ctx.outbox.send(&message, Vec::new()).await?;
        Ok(Some(chat))
    }

    /// # Errors
    ///
    /// `NotConnected` without a session, `Transport` if the send failed.
    pub async fn send_reaction(&self, emoji: &str) -> Result<(), SessionError> {
        let active = self.active()?;
        let message = SignalMessage::Reaction {
            sender_identity: active.ctx.local_identity().to_string(),
            sender_name: active.ctx.local_name(),
            emoji: emoji.to_string(),
            timestamp: now_millis(),
        };
        active.ctx.outbox.send(&message, Vec::new()).await
    }

    /// Remove a participant from the meeting (host and co-host only).
    ///
    /// # Errors
    ///
    /// `PermissionDenied` for participants, `NotConnected` without a session.
    #[instrument(skip_all, name = "ms.session.remove_participant")]
    pub async fn remove_participant(&self, identity: &str) -> Result<(), SessionError> {
        let active = self.active()?;
        Self::require_privileged(&active, "remove participants")?;
        let target = active
            .ctx
            .remote
            .resolve(identity)
            .unwrap_or_else(|| identity.to_string());

        let message = SignalMessage::ParticipantRemoved {
            target_identity: target.clone(),
            removed_by: active.ctx.local_identity().to_string(),
            timestamp: now_millis(),
        };
        active.ctx.outbox.send(&message, Vec::new()).await?;
        info!(target: "ms.session", target_identity = %target, "Participant removed");
        Ok(())
    }

    // --- Recording ---

    /// # Errors
    ///
    /// - `PermissionDenied` for participants
    /// - `Service` if no meeting API is configured or the request failed
    pub async fn start_recording(
        &self,
        options: &RecordingOptions,
    ) -> Result<RecordingJob, SessionError> {
        let (api, meeting_id) = self.recording_target()?;
        Ok(api.start_recording(&meeting_id, options).await?)
    }

    /// # Errors
    ///
    /// See `start_recording`.
    pub async fn stop_recording(&self) -> Result<RecordingJob, SessionError> {
        let (api, meeting_id) = self.recording_target()?;
        Ok(api.stop_recording(&meeting_id).await?)
    }

    fn recording_target(&self) -> Result<(Arc<MeetingApiClient>, String), SessionError> {
        let active = self.active()?;
        Self::require_privileged(&active, "control recording")?;
        let api = self
            .meeting_api
            .clone()
            .ok_or_else(|| SessionError::Service("Meeting API is not configured".to_string()))?;
        Ok((api, active.ctx.handle.meeting_id.clone()))
    }

    // --- Reactive state ---

    #[must_use]
    pub fn connection_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connection.subscribe_status()
    }

    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.core.events.subscribe()
    }

    #[must_use]
    pub fn session(&self) -> Option<SessionHandle> {
        self.connection.session()
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.connection.is_terminal()
    }

    #[must_use]
    pub fn local_media(&self) -> LocalMediaState {
        self.core.guard.snapshot()
    }

    #[must_use]
    pub fn participants(&self) -> Vec<RemoteParticipantState> {
        self.core.remote.snapshot()
    }

    /// Playable handle for `alias`'s track of `source`.
    #[must_use]
    pub fn participant_stream(&self, alias: &str, source: TrackSource) -> Option<Arc<MediaHandle>> {
        if source.is_screen_share() {
            let active = self.core.active()?;
            let identity = self.core.remote.resolve(alias)?;
            let handle = active.share.remote_handle(source)?;
            (handle.participant_identity() == identity).then_some(handle)
        } else {
            self.core.remote.stream(alias, source)
        }
    }

    #[must_use]
    pub fn screen_share(&self) -> ScreenShareSnapshot {
        self.core
            .active()
            .map(|active| active.share.snapshot())
            .unwrap_or_default()
    }

    /// Outbox depth and counters of the live session.
    #[must_use]
    pub fn queue_status(&self) -> Option<QueueStatus> {
        self.core.active().map(|active| active.ctx.outbox.status())
    }
}
