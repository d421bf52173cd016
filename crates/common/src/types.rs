//! Common data types shared between the session core and its REST collaborators.

use crate::secret::SecretString;
use serde::{Deserialize, Serialize};

/// Role of a participant within a meeting.
///
/// Hosts and co-hosts are "privileged": they bypass the screen-share
/// permission protocol and may force-stop other participants' shares.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticipantRole {
    /// Meeting owner.
    Host,
    /// Delegated host privileges.
    CoHost,
    /// Regular attendee.
    #[default]
    Participant,
}

impl ParticipantRole {
    /// Build a role from the `isHost` / `isCoHost` join options.
    #[must_use]
    pub const fn from_flags(is_host: bool, is_co_host: bool) -> Self {
        if is_host {
            Self::Host
        } else if is_co_host {
            Self::CoHost
        } else {
            Self::Participant
        }
    }

    /// Whether this role may approve screen shares and stop other shares.
    #[must_use]
    pub const fn is_privileged(self) -> bool {
        matches!(self, Self::Host | Self::CoHost)
    }

    /// Returns the role as a static string for metric labels and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Host => "host",
            Self::CoHost => "co-host",
            Self::Participant => "participant",
        }
    }
}

/// Body of `POST /join-meeting`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinMeetingRequest {
    /// Meeting (room) identifier.
    pub meeting_id: String,
    /// Application user id of the joining participant.
    pub user_id: String,
    /// Human readable name shown to peers.
    pub display_name: String,
    /// Whether the participant joins as host.
    pub is_host: bool,
}

/// Successful response of `POST /join-meeting`.
///
/// The access token is wrapped in `SecretString`, so deriving `Debug` is safe.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGrant {
    /// Transport access token (JWT issued by the token service).
    pub access_token: SecretString,
    /// URL of the media transport (SFU) to connect to.
    pub transport_url: String,
    /// Identity the transport will assign to the local participant.
    pub participant_identity: String,
    /// Opaque meeting metadata echoed back to the UI.
    #[serde(default)]
    pub meeting_info: serde_json::Value,
}
