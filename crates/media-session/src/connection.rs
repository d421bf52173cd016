//! `ConnectionManager` - the single connect/disconnect state machine.
//!
//! The manager is the only writer of connection state:
//!
//! ```text
//! Idle -> Connecting -> Connected -> Idle
//!                           |
//!                           +-> Reconnecting -> Connecting -> ...
//! ```
//!
//! - One connect attempt is in flight at a time. Callers arriving while it
//!   runs share its result through a `watch` channel.
//! - A connect acquires a join token, opens the room, waits for the
//!   transport to stabilize, syncs the roster and publishes pre-muted local
//!   tracks before the session counts as established.
//! - Involuntary transport loss schedules exactly one reconnect attempt.
//!   Forced removal and meeting end are terminal: no reconnect follows.
//!
//! Per-session services are created by the `SessionHooks` implementation
//! once a session is established and torn down before the transport is
//! closed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use common::join_token::{JoinTokenClient, TokenError};
use common::types::{JoinGrant, JoinMeetingRequest};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::SessionTimings;
use crate::errors::SessionError;
use crate::events::{emit, DeviceNotice, SessionEvent, TerminalReason};
use crate::observability::metrics;
use crate::participant_key::ParticipantKey;
use crate::remote_sync::RemoteParticipantSync;
use crate::track_guard::TrackStateGuard;
use crate::transport::{
    DisconnectReason, MediaDevices, RoomTransport, SharedTrack, TrackSid, TransportEvents,
    TransportState,
};
use crate::types::{ConnectionStatus, JoinOptions, MediaKind, ParticipantRole};

/// Source of join grants.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn acquire(&self, request: &JoinMeetingRequest) -> Result<JoinGrant, TokenError>;
}

#[async_trait]
impl TokenProvider for JoinTokenClient {
    async fn acquire(&self, request: &JoinMeetingRequest) -> Result<JoinGrant, TokenError> {
        JoinTokenClient::acquire(self, request).await
    }
}

/// Handle to one established session.
///
/// Two handles are equal when they describe the same room connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub meeting_id: String,
    /// Unique per established room connection.
    pub connection_id: Uuid,
    pub local: ParticipantKey,
    pub display_name: String,
    pub role: ParticipantRole,
    pub transport_url: String,
    pub meeting_info: serde_json::Value,
    pub(crate) cancel_token: CancellationToken,
}

impl SessionHandle {
    /// Cancelled when the session is torn down.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.cancel_token.is_cancelled()
    }
}

impl PartialEq for SessionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.connection_id == other.connection_id
            && self.meeting_id == other.meeting_id
            && self.local == other.local
    }
}

impl Eq for SessionHandle {}

/// Callbacks into the per-session services.
#[async_trait]
pub trait SessionHooks: Send + Sync {
    /// The session is established. `events` is the room's SDK event stream.
    async fn session_started(
        &self,
        connection: &Arc<ConnectionManager>,
        handle: &SessionHandle,
        events: TransportEvents,
    );

    /// A screen-share publish is running and must not be interrupted.
    fn publish_in_progress(&self) -> bool;

    /// The session is about to be torn down.
    async fn session_ending(&self, handle: &SessionHandle);
}

/// Why `disconnect` was called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectKind {
    /// The user pressed leave.
    UserLeave,
    /// Component cleanup (view unmount). Deferred while a session is live.
    Cleanup,
    /// The meeting was ended by a host.
    MeetingEnded,
    /// The local participant was removed by a host.
    Removed,
}

impl DisconnectKind {
    const fn terminal_reason(self) -> Option<TerminalReason> {
        match self {
            DisconnectKind::MeetingEnded => Some(TerminalReason::MeetingEnded),
            DisconnectKind::Removed => Some(TerminalReason::RemovedByHost),
            DisconnectKind::UserLeave | DisconnectKind::Cleanup => None,
        }
    }
}

/// Result of `disconnect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectOutcome {
    Disconnected,
    AlreadyDisconnected,
    /// The session stays up; it is cleaned up when it next ends.
    Deferred,
}

type AttemptResult = Option<Result<SessionHandle, SessionError>>;

enum Lifecycle {
    Idle,
    Connecting {
        meeting_id: String,
        result: watch::Receiver<AttemptResult>,
    },
    Connected(SessionHandle),
    Reconnecting {
        meeting_id: String,
        cancel_token: CancellationToken,
    },
}

struct ConnectionInner {
    lifecycle: Lifecycle,
    last_options: Option<JoinOptions>,
    cleanup_deferred: bool,
}

/// Owns the room connection of one client.
pub struct ConnectionManager {
    transport: Arc<dyn RoomTransport>,
    devices: Arc<dyn MediaDevices>,
    tokens: Arc<dyn TokenProvider>,
    guard: Arc<TrackStateGuard>,
    remote: Arc<RemoteParticipantSync>,
    hooks: Arc<dyn SessionHooks>,
    events: broadcast::Sender<SessionEvent>,
    status: watch::Sender<ConnectionStatus>,
    timings: SessionTimings,
    inner: Mutex<ConnectionInner>,
    terminal: AtomicBool,
    root_token: CancellationToken,
}

/// Collaborators of a `ConnectionManager`.
pub struct ConnectionParts {
    pub transport: Arc<dyn RoomTransport>,
    pub devices: Arc<dyn MediaDevices>,
    pub tokens: Arc<dyn TokenProvider>,
    pub guard: Arc<TrackStateGuard>,
    pub remote: Arc<RemoteParticipantSync>,
    pub hooks: Arc<dyn SessionHooks>,
    pub events: broadcast::Sender<SessionEvent>,
    pub timings: SessionTimings,
}

impl ConnectionManager {
    #[must_use]
    pub fn new(parts: ConnectionParts) -> Arc<Self> {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Arc::new(Self {
            transport: parts.transport,
            devices: parts.devices,
            tokens: parts.tokens,
            guard: parts.guard,
            remote: parts.remote,
            hooks: parts.hooks,
            events: parts.events,
            status,
            timings: parts.timings,
            inner: Mutex::new(ConnectionInner {
                lifecycle: Lifecycle::Idle,
                last_options: None,
                cleanup_deferred: false,
            }),
            terminal: AtomicBool::new(false),
            root_token: CancellationToken::new(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionInner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    /// The current established session, if any.
    #[must_use]
    pub fn session(&self) -> Option<SessionHandle> {
        match &self.lock().lifecycle {
            Lifecycle::Connected(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    /// Set after a forced removal or meeting end; cleared by the next
    /// explicit `connect`.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::Acquire)
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.send_replace(status);
    }

    /// Connect to a meeting, or join the attempt already in flight.
    ///
    /// # Errors
    ///
    /// - `Auth` if no join token could be acquired
    /// - `ConnectionTimeout` if the transport did not stabilize in time
    /// - `AlreadyConnected` / `Busy` if a different meeting is connected or connecting
    #[instrument(skip_all, name = "ms.connection.connect", fields(meeting_id = %options.meeting_id))]
    pub async fn connect(self: &Arc<Self>, options: JoinOptions) -> Result<SessionHandle, SessionError> {
        let mut result = {
            let mut inner = self.lock();
            match &inner.lifecycle {
                Lifecycle::Connected(handle) => {
                    return if handle.meeting_id == options.meeting_id {
                        Ok(handle.clone())
                    } else {
                        Err(SessionError::AlreadyConnected(handle.meeting_id.clone()))
                    };
                }
                Lifecycle::Connecting { meeting_id, result } => {
                    if *meeting_id != options.meeting_id {
                        return Err(SessionError::Busy(format!(
                            "Connect to meeting {meeting_id} is in progress"
                        )));
                    }
                    debug!(target: "ms.connection", "Joining in-flight connect attempt");
                    result.clone()
                }
                Lifecycle::Reconnecting { cancel_token, .. } => {
                    cancel_token.cancel();
                    self.start_attempt(&mut inner, options, ConnectionStatus::Connecting)
                }
                Lifecycle::Idle => {
                    self.start_attempt(&mut inner, options, ConnectionStatus::Connecting)
                }
            }
        };

        let outcome = result
            .wait_for(Option::is_some)
            .await
            .map_err(|_| SessionError::Internal("Connect attempt was abandoned".to_string()))?
            .clone();
        outcome.unwrap_or_else(|| Err(SessionError::Internal("Connect attempt produced no result".to_string())))
    }

    /// Move to `Connecting` and spawn the attempt. Caller holds the lock.
    fn start_attempt(
        self: &Arc<Self>,
        inner: &mut ConnectionInner,
        options: JoinOptions,
        status: ConnectionStatus,
    ) -> watch::Receiver<AttemptResult> {
        let (tx, rx) = watch::channel(None);
        inner.lifecycle = Lifecycle::Connecting {
            meeting_id: options.meeting_id.clone(),
            result: rx.clone(),
        };
        inner.last_options = Some(options.clone());
        inner.cleanup_deferred = false;
        self.terminal.store(false, Ordering::Release);
        self.set_status(status);

        // The attempt runs detached so a caller dropping its future does not
        // abandon the other waiters.
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            manager.run_attempt(options, tx).await;
        });
        rx
    }

    async fn run_attempt(self: Arc<Self>, options: JoinOptions, result_tx: watch::Sender<AttemptResult>) {
        let result = self.establish(&options).await;

        match &result {
            Ok(handle) => {
                self.lock().lifecycle = Lifecycle::Connected(handle.clone());
                self.set_status(ConnectionStatus::Connected);
                metrics::record_connect_attempt("success");
                info!(
                    target: "ms.connection",
                    meeting_id = %handle.meeting_id,
                    identity = %handle.local.identity(),
                    "Session established"
                );
                emit(
                    &self.events,
                    SessionEvent::Connected {
                        meeting_id: handle.meeting_id.clone(),
                        identity: handle.local.identity().to_string(),
                    },
                );
            }
            Err(e) => {
                self.lock().lifecycle = Lifecycle::Idle;
                self.set_status(ConnectionStatus::Disconnected);
                warn!(
                    target: "ms.connection",
                    meeting_id = %options.meeting_id,
                    error = %e,
                    "Connect attempt failed"
                );
            }
        }

        // Waiters are released only after the lifecycle reflects the result.
        result_tx.send_replace(Some(result));
    }

    async fn establish(self: &Arc<Self>, options: &JoinOptions) -> Result<SessionHandle, SessionError> {
        let grant = match self.tokens.acquire(&options.join_request()).await {
            Ok(grant) => {
                metrics::record_token_attempt("success");
                grant
            }
            Err(e) => {
                metrics::record_token_attempt("error");
                metrics::record_connect_attempt("auth_error");
                return Err(SessionError::from(e));
            }
        };

        let events = self
            .transport
            .connect(&grant.transport_url, &grant.access_token)
            .await
            .map_err(|e| {
                metrics::record_connect_attempt("transport_error");
                SessionError::from(e)
            })?;

        if let Err(e) = self.wait_until_stable().await {
            metrics::record_connect_attempt("timeout");
            self.transport.disconnect().await;
            return Err(e);
        }

        let local = self.transport.local_participant().map_or_else(
            || ParticipantKey::new(grant.participant_identity.clone()),
            |info| ParticipantKey::from_local(&info),
        );

        // Roster first, so the session never starts without pre-existing peers.
        self.remote.set_local(local.clone());
        let diff = self.remote.full_sync(&self.transport.remote_participants());
        debug!(
            target: "ms.connection",
            participants = diff.added.len(),
            "Initial roster synchronized"
        );

        self.publish_initial_tracks().await;

        let handle = SessionHandle {
            meeting_id: options.meeting_id.clone(),
            connection_id: Uuid::new_v4(),
            local,
            display_name: options.display_name.clone(),
            role: options.role(),
            transport_url: grant.transport_url.clone(),
            meeting_info: grant.meeting_info.clone(),
            cancel_token: self.root_token.child_token(),
        };

        self.hooks.session_started(self, &handle, events).await;
        Ok(handle)
    }

    async fn wait_until_stable(&self) -> Result<(), SessionError> {
        let timeout = self.timings.stabilization_timeout;
        let poll = self.timings.stabilization_poll;
        let transport = &self.transport;

        let stabilized = async {
            while transport.state() != TransportState::Connected {
                tokio::time::sleep(poll).await;
            }
        };

        tokio::time::timeout(timeout, stabilized)
            .await
            .map_err(|_| SessionError::ConnectionTimeout(timeout))
    }

    /// Publish microphone and camera, both held to mute intent before the
    /// publish call. Capture failures degrade the session instead of failing it.
    async fn publish_initial_tracks(&self) {
        for kind in [MediaKind::Audio, MediaKind::Video] {
            self.guard.apply_default(kind, true);
            if let Err(e) = self.publish_local(kind).await {
                warn!(
                    target: "ms.connection",
                    kind = kind.as_str(),
                    error = %e,
                    "Local track unavailable at join"
                );
                emit(
                    &self.events,
                    SessionEvent::DeviceNotice(DeviceNotice::CaptureUnavailable {
                        kind,
                        message: e.user_message(),
                    }),
                );
            }
        }
        emit(
            &self.events,
            SessionEvent::LocalMediaChanged(self.guard.snapshot()),
        );
    }

    /// Create, pre-mute and publish the local track of `kind`.
    ///
    /// Order: disable capture, mute the SDK flag, publish, re-apply intent.
    pub(crate) async fn publish_local(&self, kind: MediaKind) -> Result<TrackSid, SessionError> {
        let track: SharedTrack = match kind {
            MediaKind::Audio => self.devices.create_microphone(None).await?,
            MediaKind::Video => self.devices.create_camera().await?,
        };

        let muted = self.guard.intended_mute(kind);
        track.set_capture_enabled(!muted);
        track.set_muted(muted);

        let sid = match self.transport.publish_track(Arc::clone(&track)).await {
            Ok(sid) => sid,
            Err(e) => {
                track.stop();
                return Err(SessionError::from(e));
            }
        };

        // Intent may have changed while the publish was suspended.
        if let Some((previous, previous_sid)) = self.guard.attach_track(kind, track, Some(sid.clone())) {
            previous.stop();
            if let Some(previous_sid) = previous_sid {
                if let Err(e) = self.transport.unpublish_track(&previous_sid).await {
                    warn!(target: "ms.connection", error = %e, "Failed to unpublish replaced track");
                }
            }
        }
        debug!(
            target: "ms.connection",
            kind = kind.as_str(),
            muted = self.guard.intended_mute(kind),
            "Local track published"
        );
        Ok(sid)
    }

    /// Disconnect according to `kind`.
    ///
    /// # Errors
    ///
    /// `Busy` while a screen-share publish or a connect attempt is running.
    #[instrument(skip_all, name = "ms.connection.disconnect", fields(kind = ?kind))]
    pub async fn disconnect(&self, kind: DisconnectKind) -> Result<DisconnectOutcome, SessionError> {
        if matches!(kind, DisconnectKind::UserLeave | DisconnectKind::Cleanup)
            && self.hooks.publish_in_progress()
        {
            return Err(SessionError::Busy(
                "Screen share publish is in progress".to_string(),
            ));
        }

        let handle = {
            let mut inner = self.lock();
            match &inner.lifecycle {
                Lifecycle::Idle => None,
                Lifecycle::Connecting { .. } => {
                    if kind == DisconnectKind::Cleanup {
                        inner.cleanup_deferred = true;
                        info!(target: "ms.connection", "Cleanup deferred until connect completes");
                        return Ok(DisconnectOutcome::Deferred);
                    }
                    return Err(SessionError::Busy("Connect is in progress".to_string()));
                }
                Lifecycle::Reconnecting { cancel_token, .. } => {
                    cancel_token.cancel();
                    inner.lifecycle = Lifecycle::Idle;
                    None
                }
                Lifecycle::Connected(handle) => {
                    if kind == DisconnectKind::Cleanup && !self.is_terminal() {
                        inner.cleanup_deferred = true;
                        info!(target: "ms.connection", "Cleanup deferred while session is active");
                        return Ok(DisconnectOutcome::Deferred);
                    }
                    let handle = handle.clone();
                    inner.lifecycle = Lifecycle::Idle;
                    Some(handle)
                }
            }
        };

        if let Some(reason) = kind.terminal_reason() {
            self.terminal.store(true, Ordering::Release);
            emit(&self.events, SessionEvent::Terminated(reason));
        }

        let Some(handle) = handle else {
            // Idempotent: make sure nothing from an earlier session lingers.
            let was_reconnecting = self.status() == ConnectionStatus::Reconnecting;
            self.reset_local_state();
            self.set_status(ConnectionStatus::Disconnected);
            if was_reconnecting {
                emit(&self.events, SessionEvent::Disconnected);
                return Ok(DisconnectOutcome::Disconnected);
            }
            return Ok(DisconnectOutcome::AlreadyDisconnected);
        };

        self.teardown(&handle).await;
        self.guard.reset();
        emit(&self.events, SessionEvent::Disconnected);
        info!(
            target: "ms.connection",
            meeting_id = %handle.meeting_id,
            "Session disconnected"
        );
        Ok(DisconnectOutcome::Disconnected)
    }

    /// Stop session services, local tracks and the room connection.
    async fn teardown(&self, handle: &SessionHandle) {
        handle.cancel_token.cancel();
        self.hooks.session_ending(handle).await;
        for (track, _) in self.guard.release_tracks() {
            track.stop();
        }
        self.transport.disconnect().await;
        self.remote.clear();
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn reset_local_state(&self) {
        for (track, _) in self.guard.reset() {
            track.stop();
        }
        self.remote.clear();
    }

    /// Map SDK-level state changes of a live session to the public status.
    pub(crate) fn on_transport_state(&self, state: TransportState) {
        if !matches!(self.lock().lifecycle, Lifecycle::Connected(_)) {
            return;
        }
        match state {
            TransportState::Reconnecting => {
                if self.status() != ConnectionStatus::Reconnecting {
                    self.set_status(ConnectionStatus::Reconnecting);
                    emit(&self.events, SessionEvent::Reconnecting { reason: "transport" });
                }
            }
            TransportState::Connected => {
                if self.status() == ConnectionStatus::Reconnecting {
                    self.set_status(ConnectionStatus::Connected);
                    emit(&self.events, SessionEvent::Reconnected);
                }
            }
            TransportState::Connecting | TransportState::Disconnected => {}
        }
    }

    /// The room connection closed underneath a live session.
    #[instrument(skip_all, name = "ms.connection.transport_lost", fields(reason = reason.as_str()))]
    pub async fn handle_transport_lost(self: &Arc<Self>, reason: DisconnectReason) {
        enum Next {
            Teardown,
            Terminal(TerminalReason),
            Reconnect(CancellationToken, JoinOptions),
        }

        let (handle, next) = {
            let mut inner = self.lock();
            let Lifecycle::Connected(handle) = &inner.lifecycle else {
                debug!(target: "ms.connection", "Transport loss outside a live session ignored");
                return;
            };
            let handle = handle.clone();

            let next = if reason.is_voluntary() || inner.cleanup_deferred {
                Next::Teardown
            } else if reason.is_terminal() {
                Next::Terminal(match reason {
                    DisconnectReason::ParticipantRemoved => TerminalReason::RemovedByHost,
                    DisconnectReason::DuplicateIdentity => TerminalReason::DuplicateIdentity,
                    _ => TerminalReason::RoomDeleted,
                })
            } else if let Some(options) = inner.last_options.clone() {
                Next::Reconnect(self.root_token.child_token(), options)
            } else {
                Next::Teardown
            };

            inner.lifecycle = match &next {
                Next::Reconnect(cancel_token, options) => Lifecycle::Reconnecting {
                    meeting_id: options.meeting_id.clone(),
                    cancel_token: cancel_token.clone(),
                },
                Next::Teardown | Next::Terminal(_) => Lifecycle::Idle,
            };
            (handle, next)
        };

        match next {
            Next::Teardown => {
                info!(target: "ms.connection", "Session closed by transport");
                self.teardown(&handle).await;
                self.guard.reset();
                emit(&self.events, SessionEvent::Disconnected);
            }
            Next::Terminal(terminal) => {
                self.terminal.store(true, Ordering::Release);
                warn!(target: "ms.connection", reason = reason.as_str(), "Session terminated");
                self.teardown(&handle).await;
                self.guard.reset();
                emit(&self.events, SessionEvent::Terminated(terminal));
            }
            Next::Reconnect(cancel_token, options) => {
                warn!(
                    target: "ms.connection",
                    reason = reason.as_str(),
                    delay_ms = u64::try_from(self.timings.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
                    "Connection lost, scheduling reconnect"
                );
                // Mute intent survives the reconnect; only tracks are released.
                self.teardown(&handle).await;
                self.set_status(ConnectionStatus::Reconnecting);
                emit(
                    &self.events,
                    SessionEvent::Reconnecting {
                        reason: reason.as_str(),
                    },
                );
                self.schedule_reconnect(cancel_token, options);
            }
        }
    }

    /// Single delayed reconnect attempt. No loop: on failure the user rejoins.
    fn schedule_reconnect(self: &Arc<Self>, cancel_token: CancellationToken, options: JoinOptions) {
        let manager = Arc::clone(self);
        let delay = self.timings.reconnect_delay;

        tokio::spawn(async move {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!(target: "ms.connection", "Scheduled reconnect cancelled");
                    return;
                }
                () = tokio::time::sleep(delay) => {}
            }

            let mut result = {
                let mut inner = manager.lock();
                let still_pending = matches!(
                    &inner.lifecycle,
                    Lifecycle::Reconnecting { cancel_token: pending, .. }
                        if !pending.is_cancelled()
                );
                if !still_pending || cancel_token.is_cancelled() {
                    return;
                }
                manager.start_attempt(&mut inner, options, ConnectionStatus::Reconnecting)
            };

            let outcome = match result.wait_for(Option::is_some).await {
                Ok(outcome) => outcome.clone(),
                Err(_) => None,
            };
            match outcome {
                Some(Ok(_)) => {
                    info!(target: "ms.connection", "Reconnected");
                    emit(&manager.events, SessionEvent::Reconnected);
                }
                Some(Err(e)) => {
                    warn!(target: "ms.connection", error = %e, "Reconnect failed");
                    emit(
                        &manager.events,
                        SessionEvent::ReconnectFailed {
                            message: "Connection lost. Please rejoin the meeting.".to_string(),
                        },
                    );
                }
                None => {}
            }
        });
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.root_token.cancel();
    }
}
