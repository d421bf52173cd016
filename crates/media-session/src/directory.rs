//! Friendly-name resolution for protocol messages.
//!
//! The transport identity is often an opaque id. Names are resolved through
//! a fallback chain: the SDK name, then the injected participant directory,
//! then a synthesized `"User {id}"` placeholder.

use serde::{Deserialize, Serialize};

use crate::participant_key::ParticipantKey;
use crate::types::ParticipantRole;

/// One entry of the application's participant directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub role: ParticipantRole,
}

/// Read-only, best-effort participant directory.
pub trait ParticipantDirectory: Send + Sync {
    fn lookup(&self, user_id: &str) -> Option<DirectoryEntry>;
}

/// Directory with no entries.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyDirectory;

impl ParticipantDirectory for EmptyDirectory {
    fn lookup(&self, _user_id: &str) -> Option<DirectoryEntry> {
        None
    }
}

/// Resolve a human-readable name for `key`.
#[must_use]
pub fn resolve_display_name(
    sdk_name: Option<&str>,
    key: &ParticipantKey,
    directory: &dyn ParticipantDirectory,
) -> String {
    if let Some(name) = sdk_name.map(str::trim) {
        if !name.is_empty() && name != key.identity() {
            return name.to_string();
        }
    }

    let from_directory = directory
        .lookup(key.user_id())
        .or_else(|| directory.lookup(key.identity()))
        .map(|entry| entry.display_name)
        .filter(|name| !name.trim().is_empty());

    from_directory.unwrap_or_else(|| format!("User {}", key.user_id()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    struct OneEntry;

    impl ParticipantDirectory for OneEntry {
        fn lookup(&self, user_id: &str) -> Option<DirectoryEntry> {
            (user_id == "42").then(|| DirectoryEntry {
                id: "42".to_string(),
                display_name: "Alice Example".to_string(),
                role: ParticipantRole::Host,
            })
        }
    }

    #[test]
    fn test_sdk_name_wins() {
        let key = ParticipantKey::new("user-42");
        assert_eq!(resolve_display_name(Some("Alice"), &key, &OneEntry), "Alice");
    }

    #[test]
    fn test_sdk_name_equal_to_identity_is_skipped() {
        let key = ParticipantKey::new("user-42");
        assert_eq!(
            resolve_display_name(Some("user-42"), &key, &OneEntry),
            "Alice Example"
        );
        assert_eq!(resolve_display_name(Some("  "), &key, &OneEntry), "Alice Example");
    }

    #[test]
    fn test_placeholder_when_unknown() {
        let key = ParticipantKey::new("user-7");
        assert_eq!(resolve_display_name(None, &key, &EmptyDirectory), "User 7");
    }

    #[test]
    fn test_directory_entry_serde() {
        let entry: DirectoryEntry =
            serde_json::from_str(r#"{"id": "1", "displayName": "Bob"}"#).unwrap();
        assert_eq!(entry.display_name, "Bob");
        assert_eq!(entry.role, ParticipantRole::Participant);
    }
}
