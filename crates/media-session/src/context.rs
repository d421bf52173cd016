//! Shared collaborators of one established session.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::config::SessionTimings;
use crate::connection::SessionHandle;
use crate::directory::{resolve_display_name, ParticipantDirectory};
use crate::events::{emit, SessionEvent};
use crate::participant_key::ParticipantKey;
use crate::remote_sync::RemoteParticipantSync;
use crate::signaling::SignalingOutbox;
use crate::track_guard::TrackStateGuard;
use crate::transport::{MediaDevices, RoomTransport};

/// Everything a per-session service needs. Dropped with the session.
pub(crate) struct SessionContext {
    pub(crate) handle: SessionHandle,
    pub(crate) transport: Arc<dyn RoomTransport>,
    pub(crate) devices: Arc<dyn MediaDevices>,
    pub(crate) outbox: SignalingOutbox,
    pub(crate) remote: Arc<RemoteParticipantSync>,
    pub(crate) guard: Arc<TrackStateGuard>,
    pub(crate) directory: Arc<dyn ParticipantDirectory>,
    pub(crate) events: broadcast::Sender<SessionEvent>,
    pub(crate) timings: SessionTimings,
}

impl SessionContext {
    pub(crate) fn local_identity(&self) -> &str {
        self.handle.local.identity()
    }

    pub(crate) fn is_privileged(&self) -> bool {
        self.handle.role.is_privileged()
    }

    /// Local display name resolved through the fallback chain.
    pub(crate) fn local_name(&self) -> String {
        resolve_display_name(
            Some(&self.handle.display_name),
            &self.handle.local,
            self.directory.as_ref(),
        )
    }

    /// Display name of `identity`, preferring a non-empty `announced` name.
    pub(crate) fn display_name_of(&self, identity: &str, announced: Option<&str>) -> String {
        let participant = self.remote.get(identity);
        let key = participant
            .as_ref()
            .map_or_else(|| ParticipantKey::new(identity), |p| p.key.clone());
        let sdk_name = announced
            .filter(|n| !n.trim().is_empty())
            .or_else(|| participant.as_ref().and_then(|p| p.name.as_deref()));
        resolve_display_name(sdk_name, &key, self.directory.as_ref())
    }

    /// Key for `identity` with every alias the roster knows.
    pub(crate) fn key_for(&self, identity: &str) -> ParticipantKey {
        self.remote
            .key_for(identity)
            .or_else(|| {
                self.transport
                    .remote_participants()
                    .iter()
                    .find(|p| p.identity == identity)
                    .map(ParticipantKey::from_remote)
            })
            .unwrap_or_else(|| ParticipantKey::new(identity))
    }

    /// Whether `key` names the local participant under any matching strategy.
    pub(crate) fn is_local(&self, key: &ParticipantKey) -> bool {
        self.handle.local.matches(key)
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        emit(&self.events, event);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
pub(crate) mod testing {
    use tokio_util::sync::CancellationToken;
    use uuid::Uuid;

    use super::*;
    use crate::directory::EmptyDirectory;
    use crate::transport::testing::{StubDevices, StubTransport};
    use crate::types::ParticipantRole;

    /// Context for `identity` with a running outbox over `transport`.
    pub(crate) fn test_context(
        identity: &str,
        role: ParticipantRole,
        transport: Arc<StubTransport>,
    ) -> (Arc<SessionContext>, broadcast::Receiver<SessionEvent>) {
        let (events, rx) = broadcast::channel(64);
        let cancel_token = CancellationToken::new();
        let transport: Arc<dyn RoomTransport> = transport;
        let outbox = SignalingOutbox::spawn(Arc::clone(&transport), 16, cancel_token.clone());
        let remote = Arc::new(RemoteParticipantSync::new(events.clone()));
        remote.set_local(ParticipantKey::new(identity));

        let ctx = SessionContext {
            handle: SessionHandle {
                meeting_id: "m-1".to_string(),
                connection_id: Uuid::new_v4(),
                local: ParticipantKey::new(identity),
                display_name: format!("Name of {identity}"),
                role,
                transport_url: "wss://sfu.example.com".to_string(),
                meeting_info: serde_json::Value::Null,
                cancel_token,
            },
            transport,
            devices: StubDevices::new(),
            outbox,
            remote,
            guard: Arc::new(TrackStateGuard::new()),
            directory: Arc::new(EmptyDirectory),
            events,
            timings: SessionTimings::default(),
        };
        (Arc::new(ctx), rx)
    }
}
