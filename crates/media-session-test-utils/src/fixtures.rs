//! Pre-built test data: grants, roster entries, timings and a static
//! participant directory.

use std::collections::HashMap;
use std::time::Duration;

use common::secret::SecretString;
use common::types::JoinGrant;
use media_session::transport::{PublicationInfo, RemoteParticipantInfo};
use media_session::{
    DirectoryEntry, JoinOptions, ParticipantDirectory, ParticipantRole, SessionTimings,
    TrackSource,
};

pub const TEST_MEETING_ID: &str = "meeting-123";
pub const TEST_TRANSPORT_URL: &str = "wss://sfu.test.local";

/// Grant for the given transport identity.
pub fn grant_for(identity: &str) -> JoinGrant {
    JoinGrant {
        access_token: SecretString::from(format!("token-for-{identity}")),
        transport_url: TEST_TRANSPORT_URL.to_string(),
        participant_identity: identity.to_string(),
        meeting_info: serde_json::json!({ "title": "Test meeting" }),
    }
}

pub fn participant_options(user_id: &str) -> JoinOptions {
    JoinOptions::new(TEST_MEETING_ID, user_id, format!("Display {user_id}"))
}

pub fn host_options(user_id: &str) -> JoinOptions {
    participant_options(user_id).as_host()
}

/// Timings scaled down so paused-time tests stay short.
pub fn fast_timings() -> SessionTimings {
    SessionTimings {
        stabilization_timeout: Duration::from_secs(2),
        stabilization_poll: Duration::from_millis(50),
        reconnect_delay: Duration::from_millis(500),
        mute_reconcile_interval: Duration::from_millis(100),
        device_health_interval: Duration::from_secs(1),
        device_change_debounce: Duration::from_millis(200),
        permission_timeout: Duration::from_secs(5),
        share_discovery_throttle: Duration::from_secs(1),
        share_publish_settle: Duration::from_millis(50),
        roster_sync_interval: Duration::from_secs(3),
        heartbeat_interval: Duration::from_secs(30),
        signaling_queue_capacity: 32,
    }
}

pub fn publication(sid: &str, source: TrackSource) -> PublicationInfo {
    PublicationInfo {
        sid: sid.to_string(),
        source,
        muted: false,
        subscribed: false,
    }
}

/// Builder for roster entries.
#[derive(Debug, Clone)]
pub struct TestParticipant {
    info: RemoteParticipantInfo,
}

impl TestParticipant {
    pub fn new(identity: &str) -> Self {
        Self {
            info: RemoteParticipantInfo {
                identity: identity.to_string(),
                sid: format!("PA_{identity}"),
                name: None,
                metadata: None,
                publications: Vec::new(),
            },
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.info.name = Some(name.to_string());
        self
    }

    pub fn sid(mut self, sid: &str) -> Self {
        self.info.sid = sid.to_string();
        self
    }

    /// Metadata carrying an application user id and role.
    pub fn metadata(mut self, user_id: &str, role: ParticipantRole) -> Self {
        self.info.metadata = Some(
            serde_json::json!({ "userId": user_id, "role": role.as_str() }).to_string(),
        );
        self
    }

    pub fn publishing(mut self, sid: &str, source: TrackSource) -> Self {
        self.info.publications.push(publication(sid, source));
        self
    }

    pub fn build(self) -> RemoteParticipantInfo {
        self.info
    }
}

/// Directory backed by a fixed map of user id to entry.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    entries: HashMap<String, DirectoryEntry>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, display_name: &str, role: ParticipantRole) -> Self {
        self.entries.insert(
            id.to_string(),
            DirectoryEntry {
                id: id.to_string(),
                display_name: display_name.to_string(),
                role,
            },
        );
        self
    }
}

impl ParticipantDirectory for StaticDirectory {
    fn lookup(&self, user_id: &str) -> Option<DirectoryEntry> {
        self.entries.get(user_id).cloned()
    }
}
