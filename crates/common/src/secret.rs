//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports the [`secrecy`] types used for transport access tokens and
//! API credentials. `SecretString` implements `Debug` with redaction, so a
//! struct deriving `Debug` around it is safe to log.
//!
//! # Example
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct Credentials {
//!     meeting_id: String,
//!     access_token: SecretString,
//! }
//!
//! let creds = Credentials {
//!     meeting_id: "m-1".to_string(),
//!     access_token: SecretString::from("eyJ-token"),
//! };
//!
//! assert!(!format!("{creds:?}").contains("eyJ-token"));
//! let token: &str = creds.access_token.expose_secret();
//! assert_eq!(token, "eyJ-token");
//! ```
//!
//! Use `SecretString` for transport access tokens and meeting API bearer
//! tokens. Secrets are zeroized on drop.

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_grant_token_is_redacted_after_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Grant {
            identity: String,
            token: SecretString,
        }

        let grant: Grant =
            serde_json::from_str(r#"{"identity": "user-7", "token": "eyJ-transport"}"#).unwrap();

        assert_eq!(grant.token.expose_secret(), "eyJ-transport");
        let debug = format!("{grant:?}");
        assert!(debug.contains("user-7"));
        assert!(debug.contains("REDACTED"));
        assert!(!debug.contains("eyJ-transport"));
    }
}
