//! Participant identity resolution.
//!
//! The transport identity, the transport session id and the application
//! user id all name the same participant, and different call sites use
//! different ones. `ParticipantKey` carries all three; every identity
//! comparison in the crate goes through `matches` / `matches_alias`.

use serde::Deserialize;

use crate::transport::{LocalParticipantInfo, RemoteParticipantInfo};
use crate::types::ParticipantRole;

/// Identity prefixes stripped when deriving the application user id.
pub const IDENTITY_PREFIXES: [&str; 4] = ["user-", "user_", "participant-", "participant_"];

/// Strip one known prefix from a transport identity.
#[must_use]
pub fn strip_identity_prefix(identity: &str) -> &str {
    IDENTITY_PREFIXES
        .iter()
        .find_map(|prefix| identity.strip_prefix(prefix))
        .filter(|rest| !rest.is_empty())
        .unwrap_or(identity)
}

/// Participant metadata attached by the token service.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ParticipantMetadata {
    #[serde(default, alias = "user_id")]
    user_id: Option<serde_json::Value>,
    #[serde(default)]
    role: Option<ParticipantRole>,
    #[serde(default)]
    is_host: bool,
    #[serde(default)]
    is_co_host: bool,
}

impl ParticipantMetadata {
    fn parse(raw: Option<&str>) -> Self {
        raw.filter(|s| !s.trim().is_empty())
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }

    fn user_id(&self) -> Option<String> {
        match self.user_id.as_ref()? {
            serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn role(&self) -> ParticipantRole {
        self.role
            .unwrap_or_else(|| ParticipantRole::from_flags(self.is_host, self.is_co_host))
    }
}

/// Role advertised in participant metadata. Defaults to `Participant`.
#[must_use]
pub fn role_from_metadata(metadata: Option<&str>) -> ParticipantRole {
    ParticipantMetadata::parse(metadata).role()
}

/// All the ids a participant may be looked up by.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParticipantKey {
    identity: String,
    sid: Option<String>,
    user_id: String,
}

impl ParticipantKey {
    /// Key from a transport identity; the user id is derived from it.
    #[must_use]
    pub fn new(identity: impl Into<String>) -> Self {
        let identity = identity.into();
        let user_id = strip_identity_prefix(&identity).to_string();
        Self {
            identity,
            sid: None,
            user_id,
        }
    }

    #[must_use]
    pub fn with_sid(mut self, sid: impl Into<String>) -> Self {
        let sid = sid.into();
        self.sid = (!sid.is_empty()).then_some(sid);
        self
    }

    /// Take the user id from metadata when it carries one.
    #[must_use]
    pub fn with_metadata(mut self, metadata: Option<&str>) -> Self {
        if let Some(user_id) = ParticipantMetadata::parse(metadata).user_id() {
            self.user_id = user_id;
        }
        self
    }

    #[must_use]
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        if !user_id.is_empty() {
            self.user_id = user_id;
        }
        self
    }

    #[must_use]
    pub fn from_local(info: &LocalParticipantInfo) -> Self {
        Self::new(info.identity.clone())
            .with_sid(info.sid.clone())
            .with_metadata(info.metadata.as_deref())
    }

    #[must_use]
    pub fn from_remote(info: &RemoteParticipantInfo) -> Self {
        Self::new(info.identity.clone())
            .with_sid(info.sid.clone())
            .with_metadata(info.metadata.as_deref())
    }

    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[must_use]
    pub fn sid(&self) -> Option<&str> {
        self.sid.as_deref()
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Every alias this participant resolves under, without duplicates.
    ///
    /// Order: sid, identity, user id, `user-{id}`, `user_{id}`.
    #[must_use]
    pub fn aliases(&self) -> Vec<String> {
        let mut aliases = Vec::with_capacity(5);
        let candidates = [
            self.sid.clone(),
            Some(self.identity.clone()),
            Some(self.user_id.clone()),
            Some(format!("user-{}", self.user_id)),
            Some(format!("user_{}", self.user_id)),
        ];
        for alias in candidates.into_iter().flatten() {
            if !alias.is_empty() && !aliases.contains(&alias) {
                aliases.push(alias);
            }
        }
        aliases
    }

    /// True when sid, identity or user id agree.
    #[must_use]
    pub fn matches(&self, other: &ParticipantKey) -> bool {
        if self.identity == other.identity {
            return true;
        }
        if let (Some(a), Some(b)) = (&self.sid, &other.sid) {
            if a == b {
                return true;
            }
        }
        !self.user_id.is_empty() && self.user_id == other.user_id
    }

    /// True when `alias` names this participant under any id scheme.
    #[must_use]
    pub fn matches_alias(&self, alias: &str) -> bool {
        if alias.is_empty() {
            return false;
        }
        alias == self.identity
            || self.sid.as_deref() == Some(alias)
            || alias == self.user_id
            || strip_identity_prefix(alias) == self.user_id
    }
}
